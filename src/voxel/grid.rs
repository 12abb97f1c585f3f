use glam::Vec3;
use rayon::prelude::*;

use crate::error::{Result, TerrainError};

/// Dense density samples over the integer lattice `[0, nx) x [0, ny) x [0, nz)`.
///
/// Samples are stored x-fastest: `index = x + nx * (y + ny * z)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarGrid {
    dims: [usize; 3],
    data: Vec<f32>,
}

impl ScalarGrid {
    pub fn new(dims: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let expected = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or_else(|| TerrainError::InvalidGrid(format!("dimensions {:?} overflow", dims)))?;

        if data.len() != expected {
            return Err(TerrainError::InvalidGrid(format!(
                "dimensions {:?} need {} samples, got {}",
                dims,
                expected,
                data.len()
            )));
        }

        Ok(Self { dims, data })
    }

    /// Fills a grid by evaluating `f` at every lattice point, in parallel over z-slices.
    pub fn from_fn<F>(dims: [usize; 3], f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> f32 + Sync,
    {
        let [nx, ny, nz] = dims;
        let slice = nx * ny;
        let mut data = vec![0.0f32; slice * nz];

        if slice > 0 {
            data.par_chunks_mut(slice).enumerate().for_each(|(z, plane)| {
                for y in 0..ny {
                    for x in 0..nx {
                        plane[x + nx * y] = f(x, y, z);
                    }
                }
            });
        }

        Self { dims, data }
    }

    /// Samples `density` on a lattice placed at `origin` with spacing `voxel_size`.
    pub fn sample_region<F>(dims: [usize; 3], origin: Vec3, voxel_size: f32, density: F) -> Self
    where
        F: Fn(Vec3) -> f32 + Sync,
    {
        Self::from_fn(dims, |x, y, z| {
            density(origin + Vec3::new(x as f32, y as f32, z as f32) * voxel_size)
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when at least one cell exists on every axis.
    pub fn has_cells(&self) -> bool {
        self.dims.iter().all(|&n| n >= 2)
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[self.index(x, y, z)]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copies the sub-block starting at `min` with extent `dims` into a new grid.
    pub fn sub_grid(&self, min: [usize; 3], dims: [usize; 3]) -> Result<Self> {
        for axis in 0..3 {
            if min[axis] + dims[axis] > self.dims[axis] {
                return Err(TerrainError::InvalidGrid(format!(
                    "sub grid {:?}+{:?} exceeds {:?}",
                    min, dims, self.dims
                )));
            }
        }

        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                let start = self.index(min[0], min[1] + y, min[2] + z);
                data.extend_from_slice(&self.data[start..start + dims[0]]);
            }
        }

        Ok(Self { dims, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_mismatched_length() {
        assert!(ScalarGrid::new([2, 2, 2], vec![0.0; 7]).is_err());
        assert!(ScalarGrid::new([2, 2, 2], vec![0.0; 8]).is_ok());
    }

    #[test]
    fn test_from_fn_layout_is_x_fastest() {
        let grid = ScalarGrid::from_fn([3, 4, 5], |x, y, z| (x + 10 * y + 100 * z) as f32);
        assert_eq!(grid.len(), 60);
        assert_eq!(grid.get(2, 3, 4), 432.0);
        assert_eq!(grid.as_slice()[1], 1.0);
        assert_eq!(grid.as_slice()[3], 10.0);
        assert_eq!(grid.as_slice()[12], 100.0);
    }

    #[test]
    fn test_has_cells_requires_two_samples_per_axis() {
        assert!(ScalarGrid::from_fn([2, 2, 2], |_, _, _| 0.0).has_cells());
        assert!(!ScalarGrid::from_fn([1, 5, 5], |_, _, _| 0.0).has_cells());
        assert!(!ScalarGrid::from_fn([5, 5, 0], |_, _, _| 0.0).has_cells());
    }

    #[test]
    fn test_sample_region_uses_origin_and_spacing() {
        let grid = ScalarGrid::sample_region([2, 2, 2], Vec3::new(1.0, 2.0, 3.0), 0.5, |p| p.x + p.y + p.z);
        assert_eq!(grid.get(0, 0, 0), 6.0);
        assert_eq!(grid.get(1, 1, 1), 7.5);
    }

    #[test]
    fn test_sub_grid_copies_block() {
        let grid = ScalarGrid::from_fn([4, 4, 4], |x, y, z| (x + 10 * y + 100 * z) as f32);
        let sub = grid.sub_grid([1, 2, 1], [2, 2, 3]).unwrap();
        assert_eq!(sub.dims(), [2, 2, 3]);
        assert_eq!(sub.get(0, 0, 0), 121.0);
        assert_eq!(sub.get(1, 1, 2), 332.0);
        assert!(grid.sub_grid([3, 0, 0], [2, 1, 1]).is_err());
    }
}
