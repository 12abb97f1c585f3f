use glam::Vec3;
use log::warn;
use serde::{Deserialize, Serialize};

pub mod cpu;
pub mod gpu;
pub mod parallel;
mod shaders;

pub use cpu::CpuExtractor;
pub use gpu::GpuExtractor;
pub use parallel::ParallelExtractor;

use crate::error::Result;
use crate::voxel::grid::ScalarGrid;

/// Execution strategy for isosurface extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshStrategy {
    Cpu,
    CpuMultiThread,
    Gpu,
}

impl MeshStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeshStrategy::Cpu => "CPU",
            MeshStrategy::CpuMultiThread => "CPU Multi-Thread",
            MeshStrategy::Gpu => "GPU Compute",
        }
    }
}

/// Isosurface extractor selected at construction.
///
/// All variants produce the same triangles for the same input; only the
/// order of triangles in the output may differ.
pub enum Extractor {
    Cpu(CpuExtractor),
    CpuMultiThread(ParallelExtractor),
    Gpu(GpuExtractor),
}

impl Extractor {
    /// Builds the requested strategy. Fails only for `Gpu` when no device is available.
    pub fn new(strategy: MeshStrategy, gpu_batch_size: u32) -> Result<Self> {
        Ok(match strategy {
            MeshStrategy::Cpu => Extractor::Cpu(CpuExtractor::new()),
            MeshStrategy::CpuMultiThread => Extractor::CpuMultiThread(ParallelExtractor::new()),
            MeshStrategy::Gpu => Extractor::Gpu(GpuExtractor::new(gpu_batch_size)?),
        })
    }

    /// Like `new`, but falls back to the multi-threaded CPU strategy if the GPU cannot be used.
    pub fn with_fallback(strategy: MeshStrategy, gpu_batch_size: u32) -> Self {
        match Self::new(strategy, gpu_batch_size) {
            Ok(extractor) => extractor,
            Err(e) => {
                warn!("{} extractor unavailable ({}), falling back to CPU", strategy.as_str(), e);
                Extractor::CpuMultiThread(ParallelExtractor::new())
            }
        }
    }

    pub fn strategy(&self) -> MeshStrategy {
        match self {
            Extractor::Cpu(_) => MeshStrategy::Cpu,
            Extractor::CpuMultiThread(_) => MeshStrategy::CpuMultiThread,
            Extractor::Gpu(_) => MeshStrategy::Gpu,
        }
    }

    /// Extracts the isosurface as a triangle list: every three vertices form one triangle.
    pub fn generate(&self, grid: &ScalarGrid, iso_level: f32, scale: f32) -> Result<Vec<Vec3>> {
        match self {
            Extractor::Cpu(cpu) => Ok(cpu.generate(grid, iso_level, scale)),
            Extractor::CpuMultiThread(parallel) => Ok(parallel.generate(grid, iso_level, scale)),
            Extractor::Gpu(gpu) => gpu.generate(grid, iso_level, scale),
        }
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Extractor").field(&self.strategy()).finish()
    }
}

/// Signed distance sphere sampled on an `n^3` lattice with unit spacing.
#[cfg(test)]
pub(crate) fn sphere_grid(n: usize, center: Vec3, radius: f32) -> ScalarGrid {
    ScalarGrid::from_fn([n, n, n], |x, y, z| {
        radius - Vec3::new(x as f32, y as f32, z as f32).distance(center)
    })
}

/// Order-insensitive view of a triangle list, quantized to absorb float noise.
#[cfg(test)]
pub(crate) fn triangle_set(vertices: &[Vec3]) -> Vec<[[i64; 3]; 3]> {
    let quantize = |v: &Vec3| {
        [
            (v.x * 1000.0).round() as i64,
            (v.y * 1000.0).round() as i64,
            (v.z * 1000.0).round() as i64,
        ]
    };

    let mut set: Vec<[[i64; 3]; 3]> = vertices
        .chunks_exact(3)
        .map(|tri| {
            let mut corners = [quantize(&tri[0]), quantize(&tri[1]), quantize(&tri[2])];
            corners.sort();
            corners
        })
        .collect();
    set.sort();
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_strategies_agree_through_enum() {
        let grid = sphere_grid(17, Vec3::splat(8.0), 7.0);
        let single = Extractor::new(MeshStrategy::Cpu, 32).unwrap();
        let multi = Extractor::new(MeshStrategy::CpuMultiThread, 32).unwrap();

        let a = single.generate(&grid, 0.0, 0.5).unwrap();
        let b = multi.generate(&grid, 0.0, 0.5).unwrap();
        assert!(!a.is_empty());
        assert_eq!(triangle_set(&a), triangle_set(&b));
    }

    #[test]
    fn test_single_thread_is_idempotent() {
        let grid = sphere_grid(13, Vec3::new(6.0, 5.5, 6.2), 4.3);
        let extractor = Extractor::new(MeshStrategy::Cpu, 32).unwrap();
        let first = extractor.generate(&grid, 0.0, 1.0).unwrap();
        let second = extractor.generate(&grid, 0.0, 1.0).unwrap();
        assert_eq!(triangle_set(&first), triangle_set(&second));
    }

    #[test]
    fn test_fallback_always_yields_an_extractor() {
        let extractor = Extractor::with_fallback(MeshStrategy::Gpu, 16);
        assert!(matches!(extractor.strategy(), MeshStrategy::Gpu | MeshStrategy::CpuMultiThread));
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(MeshStrategy::Cpu.as_str(), "CPU");
        assert_eq!(MeshStrategy::Gpu.as_str(), "GPU Compute");
    }
}
