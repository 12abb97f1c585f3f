use glam::Vec3;
use parking_lot::Mutex;
use rayon::prelude::*;

use super::cpu::march_slice;
use crate::voxel::grid::ScalarGrid;

/// Marching cubes parallelized over the x axis.
///
/// Each x-slice is marched into a local buffer; only the append of finished
/// triangles to the shared result takes the lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelExtractor;

impl ParallelExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, grid: &ScalarGrid, iso_level: f32, scale: f32) -> Vec<Vec3> {
        if !grid.has_cells() {
            return Vec::new();
        }

        let [nx, _, _] = grid.dims();
        let vertices = Mutex::new(Vec::new());

        (0..nx - 1).into_par_iter().for_each(|x| {
            let mut slice = Vec::new();
            march_slice(grid, x, iso_level, scale, &mut slice);
            if !slice.is_empty() {
                vertices.lock().extend(slice);
            }
        });

        vertices.into_inner()
    }
}
