use std::sync::Arc;

use glam::Vec3;
use log::debug;

use crate::error::{Result, TerrainError};
use crate::request::{MaterialFn, MeshingRequest, RequestId};
use crate::scene::{Scene, SceneHandle};
use crate::voxel::field::{FieldProvider, VoxelScale};
use crate::worker::MeshingService;

/// Creates chunk attachments and issues the meshing requests that fill them.
pub struct ChunkSpawner {
    provider: Arc<dyn FieldProvider>,
    scale: VoxelScale,
    material: Option<MaterialFn>,
    origin: Vec3,
}

impl ChunkSpawner {
    pub fn new(provider: Arc<dyn FieldProvider>, max_depth: u32) -> Self {
        let scale = VoxelScale::new(provider.as_ref(), max_depth);
        Self {
            provider,
            scale,
            material: None,
            origin: Vec3::ZERO,
        }
    }

    /// Center of the body. Chunk heights are reported relative to it.
    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn with_material(mut self, material: MaterialFn) -> Self {
        self.material = Some(material);
        self
    }

    pub fn scale(&self) -> &VoxelScale {
        &self.scale
    }

    pub fn provider(&self) -> &Arc<dyn FieldProvider> {
        &self.provider
    }

    /// Adds a hidden, collision-less chunk node under `parent` and enqueues
    /// its meshing. The returned handle receives the mesh once attached.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_chunk(
        &self,
        scene: &mut Scene,
        service: &dyn MeshingService,
        parent: SceneHandle,
        center: Vec3,
        size: f32,
        depth: u32,
        id: RequestId,
    ) -> Result<SceneHandle> {
        let mesh = scene
            .add_child(parent, format!("chunk d{} ({:.1}, {:.1}, {:.1})", depth, center.x, center.y, center.z))
            .ok_or(TerrainError::InvalidAttachment)?;
        scene.set_visible(mesh, false);
        scene.set_collision_enabled(mesh, false);

        let mut request = MeshingRequest::new(mesh)
            .with_id(id)
            .with_provider(Arc::clone(&self.provider))
            .with_scale(self.scale.voxel_size(depth))
            .with_offset(center - Vec3::splat(size / 2.0))
            .with_center(center)
            .with_body_origin(self.origin);
        if let Some(material) = &self.material {
            request = request.with_material(Arc::clone(material));
        }

        if let Err(e) = service.enqueue(request) {
            scene.remove(mesh);
            return Err(e);
        }

        debug!("Spawned chunk {} at depth {} (size {})", id, depth, size);
        Ok(mesh)
    }
}
