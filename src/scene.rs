//! Minimal scene graph that finished chunks are attached to.
//!
//! Nodes live in a generational arena. A handle stays valid until its node is
//! removed; after that every copy of it reports invalid, which is how late
//! meshing results for merged-away chunks are recognised and discarded.

use glam::Vec3;
use log::debug;

use crate::physics::RayHit;
use crate::voxel::mesh::ChunkMesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle {
    index: u32,
    generation: u32,
}

impl SceneHandle {
    /// A handle that never refers to a live node.
    pub fn dangling() -> Self {
        Self {
            index: u32::MAX,
            generation: 0,
        }
    }
}

/// Meshing progress of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    Pending,
    Ready,
    /// Meshing finished but the region has no surface.
    Empty,
    Failed,
}

impl MeshState {
    /// True once meshing finished without error.
    pub fn is_resolved(&self) -> bool {
        matches!(self, MeshState::Ready | MeshState::Empty)
    }
}

#[derive(Debug)]
pub struct SceneNode {
    name: String,
    parent: Option<SceneHandle>,
    children: Vec<SceneHandle>,
    visible: bool,
    collision_enabled: bool,
    mesh_state: MeshState,
    chunk: Option<ChunkMesh>,
}

impl SceneNode {
    fn new(name: String, parent: Option<SceneHandle>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            visible: true,
            collision_enabled: true,
            mesh_state: MeshState::Pending,
            chunk: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<SceneHandle> {
        self.parent
    }

    pub fn children(&self) -> &[SceneHandle] {
        &self.children
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn collision_enabled(&self) -> bool {
        self.collision_enabled
    }

    pub fn mesh_state(&self) -> MeshState {
        self.mesh_state
    }

    pub fn chunk(&self) -> Option<&ChunkMesh> {
        self.chunk.as_ref()
    }
}

struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

pub struct Scene {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: SceneHandle,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut scene = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: SceneHandle::dangling(),
        };
        scene.root = scene.insert(SceneNode::new("root".to_string(), None));
        scene
    }

    pub fn root(&self) -> SceneHandle {
        self.root
    }

    fn insert(&mut self, node: SceneNode) -> SceneHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                SceneHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                SceneHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    /// Adds a node under `parent`. Returns `None` if the parent is gone.
    pub fn add_child(&mut self, parent: SceneHandle, name: impl Into<String>) -> Option<SceneHandle> {
        if !self.is_valid(parent) {
            return None;
        }
        let handle = self.insert(SceneNode::new(name.into(), Some(parent)));
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.push(handle);
        }
        Some(handle)
    }

    pub fn is_valid(&self, handle: SceneHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: SceneHandle) -> Option<&SceneNode> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn get_mut(&mut self, handle: SceneHandle) -> Option<&mut SceneNode> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Removes the node and its whole subtree. The root cannot be removed.
    pub fn remove(&mut self, handle: SceneHandle) -> bool {
        if handle == self.root || !self.is_valid(handle) {
            return false;
        }

        if let Some(parent) = self.get(handle).and_then(|n| n.parent) {
            if let Some(parent_node) = self.get_mut(parent) {
                parent_node.children.retain(|&c| c != handle);
            }
        }

        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let slot = &mut self.slots[current.index as usize];
            if let Some(node) = slot.node.take() {
                stack.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
            }
        }
        true
    }

    pub fn set_visible(&mut self, handle: SceneHandle, visible: bool) -> bool {
        self.get_mut(handle).map(|n| n.visible = visible).is_some()
    }

    pub fn set_collision_enabled(&mut self, handle: SceneHandle, enabled: bool) -> bool {
        self.get_mut(handle).map(|n| n.collision_enabled = enabled).is_some()
    }

    /// Visible itself and through every ancestor.
    pub fn is_visible_in_tree(&self, handle: SceneHandle) -> bool {
        let mut current = Some(handle);
        while let Some(h) = current {
            match self.get(h) {
                Some(node) if node.visible => current = node.parent,
                _ => return false,
            }
        }
        true
    }

    pub fn mesh_state(&self, handle: SceneHandle) -> Option<MeshState> {
        self.get(handle).map(|n| n.mesh_state)
    }

    pub fn attach_chunk(&mut self, handle: SceneHandle, chunk: ChunkMesh) -> bool {
        match self.get_mut(handle) {
            Some(node) => {
                node.chunk = Some(chunk);
                node.mesh_state = MeshState::Ready;
                true
            }
            None => false,
        }
    }

    pub fn set_mesh_state(&mut self, handle: SceneHandle, state: MeshState) -> bool {
        match self.get_mut(handle) {
            Some(node) => {
                if state != MeshState::Ready {
                    node.chunk = None;
                }
                node.mesh_state = state;
                true
            }
            None => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    /// Live nodes that currently carry an attached chunk.
    pub fn chunks(&self) -> impl Iterator<Item = (SceneHandle, &ChunkMesh)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let chunk = slot.node.as_ref()?.chunk.as_ref()?;
            Some((
                SceneHandle {
                    index: index as u32,
                    generation: slot.generation,
                },
                chunk,
            ))
        })
    }

    /// Nearest hit against every chunk whose collision is enabled.
    pub fn ray_cast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<(SceneHandle, RayHit)> {
        let mut best: Option<(SceneHandle, RayHit)> = None;
        for (handle, chunk) in self.chunks() {
            if !self.get(handle).map_or(false, |n| n.collision_enabled) {
                continue;
            }
            if let Some(hit) = chunk.collision.ray_cast(origin, direction, max_distance) {
                if best.as_ref().map_or(true, |(_, b)| hit.distance < b.distance) {
                    best = Some((handle, hit));
                }
            }
        }
        if let Some((handle, hit)) = &best {
            debug!("Ray hit chunk {:?} at distance {}", handle, hit.distance);
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::CollisionShape;
    use crate::voxel::mesh::MeshData;

    fn plate(y: f32) -> ChunkMesh {
        let soup = vec![
            Vec3::new(-1.0, y, -1.0),
            Vec3::new(1.0, y, -1.0),
            Vec3::new(0.0, y, 1.0),
        ];
        let mesh = MeshData::from_triangles(&soup, Vec3::ZERO);
        let collision = CollisionShape::from_mesh(&mesh).unwrap();
        ChunkMesh {
            mesh,
            collision,
            material: None,
            min_height: y,
            max_height: y,
            chunk_center: Vec3::new(0.0, y, 0.0),
        }
    }

    #[test]
    fn test_removed_handles_stay_invalid() {
        let mut scene = Scene::new();
        let a = scene.add_child(scene.root(), "a").unwrap();
        let b = scene.add_child(a, "b").unwrap();
        assert!(scene.remove(a));
        assert!(!scene.is_valid(a));
        assert!(!scene.is_valid(b));

        // the freed slot is reused with a new generation
        let c = scene.add_child(scene.root(), "c").unwrap();
        assert!(scene.is_valid(c));
        assert!(!scene.is_valid(a));
        assert!(!scene.set_visible(a, false));
        assert!(scene.add_child(a, "orphan").is_none());
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut scene = Scene::new();
        assert!(!scene.remove(scene.root()));
        assert_eq!(scene.node_count(), 1);
    }

    #[test]
    fn test_visibility_is_inherited() {
        let mut scene = Scene::new();
        let planet = scene.add_child(scene.root(), "planet").unwrap();
        let chunk = scene.add_child(planet, "chunk").unwrap();
        assert!(scene.is_visible_in_tree(chunk));
        scene.set_visible(planet, false);
        assert!(!scene.is_visible_in_tree(chunk));
        assert!(scene.get(chunk).unwrap().is_visible());
    }

    #[test]
    fn test_ray_cast_skips_disabled_collision() {
        let mut scene = Scene::new();
        let upper = scene.add_child(scene.root(), "upper").unwrap();
        let lower = scene.add_child(scene.root(), "lower").unwrap();
        scene.attach_chunk(upper, plate(2.0));
        scene.attach_chunk(lower, plate(0.0));
        assert_eq!(scene.mesh_state(upper), Some(MeshState::Ready));

        let down = Vec3::NEG_Y;
        let (hit_handle, hit) = scene.ray_cast(Vec3::new(0.0, 5.0, 0.0), down, 10.0).unwrap();
        assert_eq!(hit_handle, upper);
        assert!((hit.distance - 3.0).abs() < 1e-5);

        scene.set_collision_enabled(upper, false);
        let (hit_handle, _) = scene.ray_cast(Vec3::new(0.0, 5.0, 0.0), down, 10.0).unwrap();
        assert_eq!(hit_handle, lower);
    }

    #[test]
    fn test_failed_state_clears_chunk() {
        let mut scene = Scene::new();
        let node = scene.add_child(scene.root(), "node").unwrap();
        scene.attach_chunk(node, plate(1.0));
        scene.set_mesh_state(node, MeshState::Failed);
        assert!(scene.get(node).unwrap().chunk().is_none());
        assert!(!MeshState::Failed.is_resolved());
        assert!(MeshState::Empty.is_resolved());
    }
}
