pub mod tables;
pub mod grid;
pub mod extract;
pub mod mesh;
pub mod field;
pub mod procedural;
pub mod spawner;
pub mod octree;

pub use extract::{Extractor, MeshStrategy};
pub use field::{FieldProvider, SphereField, VoxelScale};
pub use grid::ScalarGrid;
pub use mesh::{ChunkMesh, MeshData, Vertex};
pub use octree::{LodConfig, LodOctree, NodeId, NodeState};
pub use procedural::{NoisePlanet, PlanetParameters};
pub use spawner::ChunkSpawner;
