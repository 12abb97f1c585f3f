use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TerrainError};
use crate::voxel::extract::gpu::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use crate::voxel::extract::MeshStrategy;
use crate::voxel::octree::LodConfig;
use crate::worker::SchedulerConfig;

pub const DEFAULT_ISO_LEVEL: f32 = 0.0;
pub const DEFAULT_MAX_DEPTH: u32 = 8;
pub const DEFAULT_DISTANCE_FACTOR: f32 = 2.0;
pub const DEFAULT_MAX_WORKERS: usize = 16;
pub const DEFAULT_SPAWNS_PER_TICK: usize = 1;

/// Runtime settings for the terrain core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    pub iso_level: f32,
    pub max_depth: u32,
    /// Subdivide while the viewer is closer than `distance_factor * node size`.
    pub distance_factor: f32,
    pub max_workers: usize,
    /// Child chunks attached per control tick.
    pub spawns_per_tick: usize,
    pub strategy: MeshStrategy,
    pub gpu_batch_size: u32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            iso_level: DEFAULT_ISO_LEVEL,
            max_depth: DEFAULT_MAX_DEPTH,
            distance_factor: DEFAULT_DISTANCE_FACTOR,
            max_workers: DEFAULT_MAX_WORKERS,
            spawns_per_tick: DEFAULT_SPAWNS_PER_TICK,
            strategy: MeshStrategy::CpuMultiThread,
            gpu_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl TerrainConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| TerrainError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| TerrainError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(TerrainError::Config("max_workers must be at least 1".to_string()));
        }
        if !(2..=MAX_BATCH_SIZE).contains(&self.gpu_batch_size) {
            return Err(TerrainError::Config(format!(
                "gpu_batch_size must be within 2..={}",
                MAX_BATCH_SIZE
            )));
        }
        if self.distance_factor.is_nan() || self.distance_factor <= 0.0 {
            return Err(TerrainError::Config("distance_factor must be positive".to_string()));
        }
        if self.spawns_per_tick == 0 {
            return Err(TerrainError::Config("spawns_per_tick must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_workers: self.max_workers,
            iso_level: self.iso_level,
        }
    }

    pub fn lod(&self) -> LodConfig {
        LodConfig {
            max_depth: self.max_depth,
            distance_factor: self.distance_factor,
            spawns_per_tick: self.spawns_per_tick,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TerrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 16);
        assert_eq!(config.max_depth, 8);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TerrainConfig::from_json_str(r#"{ "max_depth": 3, "strategy": "Gpu" }"#).unwrap();
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.strategy, MeshStrategy::Gpu);
        assert_eq!(config.distance_factor, DEFAULT_DISTANCE_FACTOR);
    }

    #[test]
    fn test_json_round_trip() {
        let config = TerrainConfig {
            iso_level: 0.25,
            spawns_per_tick: 4,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(TerrainConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(TerrainConfig::from_json_str(r#"{ "max_workers": 0 }"#).is_err());
        assert!(TerrainConfig::from_json_str(r#"{ "gpu_batch_size": 1 }"#).is_err());
        assert!(TerrainConfig::from_json_str(r#"{ "distance_factor": -1.0 }"#).is_err());
        assert!(TerrainConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            TerrainConfig::load("/nonexistent/terrain.json"),
            Err(TerrainError::Config(_))
        ));
    }
}
