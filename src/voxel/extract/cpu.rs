use glam::Vec3;

use crate::voxel::grid::ScalarGrid;
use crate::voxel::tables::{self, CORNER_OFFSETS, EDGE_CORNERS};

/// Sequential marching cubes over the whole grid.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuExtractor;

impl CpuExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, grid: &ScalarGrid, iso_level: f32, scale: f32) -> Vec<Vec3> {
        let mut vertices = Vec::new();
        if !grid.has_cells() {
            return vertices;
        }

        let [nx, _, _] = grid.dims();
        for x in 0..nx - 1 {
            march_slice(grid, x, iso_level, scale, &mut vertices);
        }

        vertices
    }
}

/// Marches every cell whose minimum corner has the given x coordinate.
pub(crate) fn march_slice(grid: &ScalarGrid, x: usize, iso_level: f32, scale: f32, out: &mut Vec<Vec3>) {
    let [_, ny, nz] = grid.dims();
    for y in 0..ny - 1 {
        for z in 0..nz - 1 {
            march_cell(grid, [x, y, z], iso_level, scale, out);
        }
    }
}

/// Emits the triangles of one cell as vertex triples.
pub(crate) fn march_cell(grid: &ScalarGrid, cell: [usize; 3], iso_level: f32, scale: f32, out: &mut Vec<Vec3>) {
    let mut corner_values = [0.0f32; 8];
    for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
        corner_values[i] = grid.get(cell[0] + offset[0], cell[1] + offset[1], cell[2] + offset[2]);
    }

    let config = tables::cube_index(&corner_values, iso_level);
    for triangle in tables::triangles(config) {
        for edge in triangle {
            let [a, b] = EDGE_CORNERS[edge];
            let t = tables::interpolation_factor(iso_level, corner_values[a], corner_values[b]);
            let pa = corner_position(cell, a) * scale;
            let pb = corner_position(cell, b) * scale;
            out.push(pa + (pb - pa) * t);
        }
    }
}

#[inline]
fn corner_position(cell: [usize; 3], corner: usize) -> Vec3 {
    let offset = CORNER_OFFSETS[corner];
    Vec3::new(
        (cell[0] + offset[0]) as f32,
        (cell[1] + offset[1]) as f32,
        (cell[2] + offset[2]) as f32,
    )
}
