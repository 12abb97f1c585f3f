//! Level-of-detail terrain for spherical bodies.
//!
//! Density fields are polygonised with marching cubes on the CPU or GPU, a
//! bounded worker pool meshes chunks off the control thread, and an octree
//! decides which chunks are shown for a given viewer position.

pub mod config;
pub mod error;
pub mod physics;
pub mod request;
pub mod scene;
pub mod utils;
pub mod voxel;
pub mod worker;

pub use config::TerrainConfig;
pub use error::{Result, TerrainError};
pub use request::{MaterialFn, MaterialHandle, MeshingRequest, RequestId};
pub use scene::{MeshState, Scene, SceneHandle};
pub use worker::{MeshingScheduler, MeshingService, SchedulerConfig};
