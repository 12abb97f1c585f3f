use glam::Vec3;

use crate::utils::{ray_triangle, AABB};
use crate::voxel::mesh::MeshData;

/// Result of a ray query against collision geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Triangle-soup collision geometry built from a finished chunk mesh.
#[derive(Debug, Clone)]
pub struct CollisionShape {
    triangles: Vec<[Vec3; 3]>,
    bounds: AABB,
}

impl CollisionShape {
    /// Returns `None` for an empty mesh; there is nothing to collide with.
    pub fn from_mesh(mesh: &MeshData) -> Option<Self> {
        let triangles: Vec<[Vec3; 3]> = mesh.triangles().collect();
        let bounds = AABB::from_points(triangles.iter().flatten())?;
        Some(Self { triangles, bounds })
    }

    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Nearest hit within `max_distance`. `direction` does not need to be normalized.
    pub fn ray_cast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }

        // Early out against the bounding box
        self.bounds.ray_intersects(origin, dir, max_distance)?;

        let mut best: Option<(f32, &[Vec3; 3])> = None;
        for triangle in &self.triangles {
            if let Some(t) = ray_triangle(origin, dir, triangle) {
                if t <= max_distance && best.map_or(true, |(d, _)| t < d) {
                    best = Some((t, triangle));
                }
            }
        }

        best.map(|(distance, tri)| {
            let mut normal = (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize_or_zero();
            // Report the face as seen from the ray
            if normal.dot(dir) > 0.0 {
                normal = -normal;
            }
            RayHit {
                distance,
                point: origin + dir * distance,
                normal,
            }
        })
    }
}
