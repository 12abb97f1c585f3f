use glam::Vec3;

use crate::voxel::grid::ScalarGrid;

/// Source of density values for a celestial body.
///
/// Densities are positive inside the body and negative outside; the surface
/// is wherever the density crosses the configured iso level.
pub trait FieldProvider: Send + Sync {
    fn sample(&self, point: Vec3) -> f32;

    /// Body radius in world units.
    fn radius(&self) -> f32;

    /// Cells per axis of every chunk grid.
    fn resolution(&self) -> u32;

    /// Samples a `(resolution + 1)^3` lattice starting at `origin`.
    fn grid(&self, origin: Vec3, voxel_size: f32) -> ScalarGrid {
        let n = self.resolution() as usize + 1;
        ScalarGrid::sample_region([n, n, n], origin, voxel_size, |p| self.sample(p))
    }
}

/// Converts octree depth into lattice spacing for a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelScale {
    pub radius: f32,
    pub resolution: u32,
    pub max_depth: u32,
}

impl VoxelScale {
    pub fn new(provider: &dyn FieldProvider, max_depth: u32) -> Self {
        Self {
            radius: provider.radius(),
            resolution: provider.resolution(),
            max_depth,
        }
    }

    /// Spacing at the deepest level.
    pub fn base_voxel_size(&self) -> f32 {
        (self.radius * 2.0) / (self.resolution as f32 * 2f32.powi(self.max_depth as i32))
    }

    pub fn voxel_size(&self, depth: u32) -> f32 {
        self.base_voxel_size() * 2f32.powi(self.max_depth.saturating_sub(depth) as i32)
    }

    /// Edge length of a chunk at `depth`; the root covers the whole diameter.
    pub fn chunk_size(&self, depth: u32) -> f32 {
        self.voxel_size(depth) * self.resolution as f32
    }
}

/// Solid ball with a one-unit density ramp across its surface.
#[derive(Debug, Clone, Copy)]
pub struct SphereField {
    pub center: Vec3,
    pub radius: f32,
    pub resolution: u32,
}

impl SphereField {
    pub fn new(center: Vec3, radius: f32, resolution: u32) -> Self {
        Self {
            center,
            radius,
            resolution,
        }
    }
}

impl FieldProvider for SphereField {
    fn sample(&self, point: Vec3) -> f32 {
        (self.radius - point.distance(self.center)).clamp(-1.0, 1.0)
    }

    fn radius(&self) -> f32 {
        self.radius
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }
}
