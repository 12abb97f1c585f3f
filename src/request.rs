use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Vec3;

use crate::scene::SceneHandle;
use crate::voxel::field::FieldProvider;
use crate::voxel::grid::ScalarGrid;

/// Opaque material produced by the theming collaborator.
pub type MaterialHandle = Arc<dyn Any + Send + Sync>;

/// Builds a material from `(min_height, max_height, chunk_center)`.
pub type MaterialFn = Arc<dyn Fn(f32, f32, Vec3) -> MaterialHandle + Send + Sync>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a meshing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a worker gets its densities from.
#[derive(Clone)]
pub enum FieldSource {
    /// Densities sampled ahead of time.
    Grid(Arc<ScalarGrid>),
    /// Sampled by the worker at the request's offset and scale.
    Provider(Arc<dyn FieldProvider>),
}

impl fmt::Debug for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSource::Grid(grid) => f.debug_tuple("Grid").field(&grid.dims()).finish(),
            FieldSource::Provider(provider) => f
                .debug_struct("Provider")
                .field("radius", &provider.radius())
                .field("resolution", &provider.resolution())
                .finish(),
        }
    }
}

/// One meshing job. Built by the caller, consumed once by a worker.
#[derive(Clone)]
pub struct MeshingRequest {
    id: RequestId,
    field: Option<FieldSource>,
    scale: f32,
    offset: Vec3,
    center: Vec3,
    body_origin: Vec3,
    target: SceneHandle,
    placeholder: Option<SceneHandle>,
    material: Option<MaterialFn>,
}

impl MeshingRequest {
    pub fn new(target: SceneHandle) -> Self {
        Self {
            id: RequestId::next(),
            field: None,
            scale: 1.0,
            offset: Vec3::ZERO,
            center: Vec3::ZERO,
            body_origin: Vec3::ZERO,
            target,
            placeholder: None,
            material: None,
        }
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_grid(mut self, grid: impl Into<Arc<ScalarGrid>>) -> Self {
        self.field = Some(FieldSource::Grid(grid.into()));
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn FieldProvider>) -> Self {
        self.field = Some(FieldSource::Provider(provider));
        self
    }

    /// Lattice spacing in world units.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// World position of lattice point `(0, 0, 0)`.
    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_center(mut self, center: Vec3) -> Self {
        self.center = center;
        self
    }

    /// Center of the body the chunk belongs to. Heights are measured from here.
    pub fn with_body_origin(mut self, origin: Vec3) -> Self {
        self.body_origin = origin;
        self
    }

    pub fn with_placeholder(mut self, placeholder: SceneHandle) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn with_material(mut self, material: MaterialFn) -> Self {
        self.material = Some(material);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn field(&self) -> Option<&FieldSource> {
        self.field.as_ref()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn body_origin(&self) -> Vec3 {
        self.body_origin
    }

    pub fn target(&self) -> SceneHandle {
        self.target
    }

    pub fn placeholder(&self) -> Option<SceneHandle> {
        self.placeholder
    }

    pub fn material(&self) -> Option<&MaterialFn> {
        self.material.as_ref()
    }
}

impl fmt::Debug for MeshingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshingRequest")
            .field("id", &self.id)
            .field("field", &self.field)
            .field("scale", &self.scale)
            .field("offset", &self.offset)
            .field("body_origin", &self.body_origin)
            .field("target", &self.target)
            .field("placeholder", &self.placeholder)
            .field("has_material", &self.material.is_some())
            .finish()
    }
}
