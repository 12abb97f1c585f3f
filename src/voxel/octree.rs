//! Level-of-detail octree over a celestial body.
//!
//! Nodes live in an arena and are addressed by generational [`NodeId`]s. Every
//! node owns one chunk in the scene. A node close to the viewer splits into
//! eight children; the children are spawned a few per tick from a shared
//! queue and only replace the parent once all of them have finished meshing.
//! Moving away merges them again. The controller runs on the control thread
//! and never blocks on meshing, it only polls [`MeshingService::is_in_flight`].

use std::collections::VecDeque;

use glam::Vec3;
use hashbrown::HashSet;
use log::{debug, info, warn};

use crate::error::Result;
use crate::request::RequestId;
use crate::scene::{MeshState, Scene, SceneHandle};
use crate::voxel::spawner::ChunkSpawner;
use crate::worker::MeshingService;

/// Child center directions, scaled by a quarter of the parent size.
pub const OCTANT_DIRECTIONS: [Vec3; 8] = [
    Vec3::new(1.0, 1.0, 1.0),
    Vec3::new(-1.0, 1.0, 1.0),
    Vec3::new(-1.0, 1.0, -1.0),
    Vec3::new(1.0, 1.0, -1.0),
    Vec3::new(-1.0, -1.0, -1.0),
    Vec3::new(1.0, -1.0, 1.0),
    Vec3::new(-1.0, -1.0, 1.0),
    Vec3::new(1.0, -1.0, -1.0),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodConfig {
    pub max_depth: u32,
    pub distance_factor: f32,
    pub spawns_per_tick: usize,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            max_depth: crate::config::DEFAULT_MAX_DEPTH,
            distance_factor: crate::config::DEFAULT_DISTANCE_FACTOR,
            spawns_per_tick: crate::config::DEFAULT_SPAWNS_PER_TICK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    LeafUnmeshed,
    LeafMeshed,
    /// Children are still waiting in the spawn queue.
    Subdividing,
    /// All children exist, at least one is not meshed yet.
    SubdividedPending,
    SubdividedReady,
    /// Parent is shown again; the subtree goes once nothing in it is in flight.
    Merging,
}

#[derive(Debug)]
pub struct OctreeNode {
    center: Vec3,
    size: f32,
    depth: u32,
    parent: Option<NodeId>,
    children: [Option<NodeId>; 8],
    mesh: SceneHandle,
    request: RequestId,
    subdivided: bool,
    children_ready: bool,
    merging: bool,
}

impl OctreeNode {
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Edge length of the cube this node covers.
    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn half_size(&self) -> f32 {
        self.size * 0.5
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[Option<NodeId>; 8] {
        &self.children
    }

    pub fn mesh(&self) -> SceneHandle {
        self.mesh
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    pub fn is_subdivided(&self) -> bool {
        self.subdivided
    }

    pub fn children_ready(&self) -> bool {
        self.children_ready
    }

    fn child_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }
}

struct NodeSlot {
    generation: u32,
    node: Option<OctreeNode>,
}

#[derive(Debug, Clone, Copy)]
struct SpawnJob {
    parent: NodeId,
    octant: usize,
}

/// Counters from one `update` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub spawned: usize,
    pub subdivided: usize,
    pub swapped: usize,
    pub merged: usize,
}

pub struct LodOctree {
    config: LodConfig,
    spawner: ChunkSpawner,
    attachment: SceneHandle,
    nodes: Vec<NodeSlot>,
    free: Vec<u32>,
    root: NodeId,
    spawn_queue: VecDeque<SpawnJob>,
}

impl LodOctree {
    /// Creates the root node covering the whole body around `center` and
    /// requests its mesh. Chunks are attached under `attachment` and report
    /// their heights relative to `center`.
    pub fn new(
        config: LodConfig,
        spawner: ChunkSpawner,
        scene: &mut Scene,
        service: &dyn MeshingService,
        attachment: SceneHandle,
        center: Vec3,
    ) -> Result<Self> {
        let spawner = spawner.with_origin(center);
        let size = spawner.scale().chunk_size(0);
        let request = RequestId::next();
        let mesh = spawner.spawn_chunk(scene, service, attachment, center, size, 0, request)?;
        scene.set_visible(mesh, true);
        scene.set_collision_enabled(mesh, true);

        let mut tree = Self {
            config,
            spawner,
            attachment,
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
            spawn_queue: VecDeque::new(),
        };
        tree.root = tree.insert(OctreeNode {
            center,
            size,
            depth: 0,
            parent: None,
            children: [None; 8],
            mesh,
            request,
            subdivided: false,
            children_ready: false,
            merging: false,
        });

        info!("LOD octree created: size {}, max depth {}", size, config.max_depth);
        Ok(tree)
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut OctreeNode> {
        self.nodes
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|s| s.node.as_ref())
            .filter(|n| !n.subdivided)
            .count()
    }

    pub fn pending_spawns(&self) -> usize {
        self.spawn_queue.len()
    }

    pub fn state(&self, id: NodeId, scene: &Scene) -> Option<NodeState> {
        let node = self.node(id)?;
        Some(if node.merging {
            NodeState::Merging
        } else if node.subdivided {
            if node.children_ready {
                NodeState::SubdividedReady
            } else if node.children.iter().any(Option::is_none) {
                NodeState::Subdividing
            } else {
                NodeState::SubdividedPending
            }
        } else if scene.mesh_state(node.mesh) == Some(MeshState::Pending) {
            NodeState::LeafUnmeshed
        } else {
            NodeState::LeafMeshed
        })
    }

    fn insert(&mut self, node: OctreeNode) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.nodes[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.nodes.push(NodeSlot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: (self.nodes.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Option<OctreeNode> {
        let slot = self.nodes.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    /// Runs one control tick for the given viewer position.
    pub fn update(&mut self, viewer: Vec3, scene: &mut Scene, service: &dyn MeshingService) -> TickReport {
        let mut report = TickReport::default();
        self.process_spawn_queue(scene, service, &mut report);

        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            self.evaluate(id, viewer, scene, service, &mut stack, &mut report);
        }

        report
    }

    fn evaluate(
        &mut self,
        id: NodeId,
        viewer: Vec3,
        scene: &mut Scene,
        service: &dyn MeshingService,
        stack: &mut Vec<NodeId>,
        report: &mut TickReport,
    ) {
        let Some(node) = self.node(id) else {
            return;
        };

        let dist_sq = viewer.distance_squared(node.center);
        let reach = node.size * self.config.distance_factor;
        let reach_sq = reach * reach;

        if node.merging {
            if self.finish_merge(id, scene, service) {
                report.merged += 1;
            }
            return;
        }

        if node.subdivided {
            if dist_sq > reach_sq {
                self.begin_merge(id, scene);
                if self.finish_merge(id, scene, service) {
                    report.merged += 1;
                }
                return;
            }

            if !node.children_ready {
                if !self.children_resolved(id, scene, service) {
                    return;
                }
                self.show_children(id, scene);
                report.swapped += 1;
            }

            if let Some(node) = self.node(id) {
                stack.extend(node.child_ids());
            }
            return;
        }

        let can_refine = node.depth < self.config.max_depth
            && dist_sq < reach_sq
            && !service.is_in_flight(node.request)
            && scene.mesh_state(node.mesh) == Some(MeshState::Ready);

        if can_refine {
            self.begin_subdivide(id);
            report.subdivided += 1;
        }
    }

    fn begin_subdivide(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.subdivided = true;
        node.children_ready = false;
        debug!("Subdividing node at depth {} around {:?}", node.depth, node.center);

        for octant in 0..OCTANT_DIRECTIONS.len() {
            self.spawn_queue.push_back(SpawnJob { parent: id, octant });
        }
    }

    fn process_spawn_queue(&mut self, scene: &mut Scene, service: &dyn MeshingService, report: &mut TickReport) {
        let mut budget = self.config.spawns_per_tick;
        while budget > 0 {
            let Some(job) = self.spawn_queue.pop_front() else {
                break;
            };

            let (center, size, depth) = match self.node(job.parent) {
                Some(parent) if parent.subdivided && !parent.merging && parent.children[job.octant].is_none() => (
                    parent.center + OCTANT_DIRECTIONS[job.octant] * (parent.size / 4.0),
                    parent.size / 2.0,
                    parent.depth + 1,
                ),
                _ => {
                    debug!("Dropping stale spawn job for octant {}", job.octant);
                    continue;
                }
            };

            budget -= 1;
            let request = RequestId::next();
            match self
                .spawner
                .spawn_chunk(scene, service, self.attachment, center, size, depth, request)
            {
                Ok(mesh) => {
                    let child = self.insert(OctreeNode {
                        center,
                        size,
                        depth,
                        parent: Some(job.parent),
                        children: [None; 8],
                        mesh,
                        request,
                        subdivided: false,
                        children_ready: false,
                        merging: false,
                    });
                    if let Some(parent) = self.node_mut(job.parent) {
                        parent.children[job.octant] = Some(child);
                    }
                    report.spawned += 1;
                }
                // The octant stays empty, so the parent keeps showing until it merges
                Err(e) => warn!("Failed to spawn chunk at depth {}: {}", depth, e),
            }
        }
    }

    fn children_resolved(&self, id: NodeId, scene: &Scene, service: &dyn MeshingService) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        node.children.iter().all(|child| {
            child.and_then(|c| self.node(c)).map_or(false, |child| {
                !service.is_in_flight(child.request)
                    && scene.mesh_state(child.mesh).map_or(false, |state| state.is_resolved())
            })
        })
    }

    /// Shows the children, then hides the parent, so there is never a tick with neither.
    fn show_children(&mut self, id: NodeId, scene: &mut Scene) {
        let Some(node) = self.node(id) else {
            return;
        };
        for child in node.child_ids() {
            if let Some(child) = self.node(child) {
                scene.set_visible(child.mesh, true);
                scene.set_collision_enabled(child.mesh, true);
            }
        }
        scene.set_visible(node.mesh, false);
        scene.set_collision_enabled(node.mesh, false);
        debug!("Depth {} node around {:?} swapped to children", node.depth, node.center);

        if let Some(node) = self.node_mut(id) {
            node.children_ready = true;
        }
    }

    fn begin_merge(&mut self, id: NodeId, scene: &mut Scene) {
        let Some(node) = self.node(id) else {
            return;
        };
        scene.set_visible(node.mesh, true);
        scene.set_collision_enabled(node.mesh, true);

        let mut subtree: HashSet<NodeId> = HashSet::new();
        for descendant in self.descendants(id) {
            if let Some(d) = self.node(descendant) {
                scene.set_visible(d.mesh, false);
                scene.set_collision_enabled(d.mesh, false);
            }
            subtree.insert(descendant);
        }
        subtree.insert(id);

        // Nothing below a merging node may spawn again.
        self.spawn_queue.retain(|job| !subtree.contains(&job.parent));
        if let Some(node) = self.node_mut(id) {
            node.merging = true;
            node.children_ready = false;
        }
    }

    /// Discards the subtree once none of it is still meshing. Returns true when done.
    fn finish_merge(&mut self, id: NodeId, scene: &mut Scene, service: &dyn MeshingService) -> bool {
        let descendants = self.descendants(id);
        let busy = descendants
            .iter()
            .filter_map(|&d| self.node(d))
            .any(|d| service.is_in_flight(d.request));
        if busy {
            return false;
        }

        for descendant in descendants {
            if let Some(node) = self.release(descendant) {
                scene.remove(node.mesh);
            }
        }

        match self.node_mut(id) {
            Some(node) => {
                node.children = [None; 8];
                node.subdivided = false;
                node.merging = false;
                node.children_ready = false;
                debug!("Merged node at depth {} around {:?}", node.depth, node.center);
                true
            }
            None => false,
        }
    }

    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).map(|n| n.child_ids().collect()).unwrap_or_default();
        while let Some(current) = stack.pop() {
            if let Some(node) = self.node(current) {
                stack.extend(node.child_ids());
                found.push(current);
            }
        }
        found
    }

    /// True when every region is drawn by exactly one node: a visible node has
    /// no visible descendants, and a hidden node is fully covered by its children.
    pub fn check_visibility(&self, scene: &Scene) -> bool {
        self.covered_once(self.root, scene)
    }

    fn covered_once(&self, id: NodeId, scene: &Scene) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let visible = scene.get(node.mesh).map_or(false, |n| n.is_visible());

        if visible {
            self.descendants(id)
                .iter()
                .filter_map(|&d| self.node(d))
                .all(|d| !scene.get(d.mesh).map_or(false, |n| n.is_visible()))
        } else {
            node.children_ready
                && node.children.iter().all(|child| match child {
                    Some(c) => self.covered_once(*c, scene),
                    None => false,
                })
        }
    }

    /// Chunks currently shown.
    pub fn visible_count(&self, scene: &Scene) -> usize {
        self.nodes
            .iter()
            .filter_map(|s| s.node.as_ref())
            .filter(|n| scene.get(n.mesh).map_or(false, |m| m.is_visible()))
            .count()
    }

    /// Removes every chunk from the scene. Results still in flight become stale.
    pub fn clear(&mut self, scene: &mut Scene) {
        for slot in &mut self.nodes {
            if let Some(node) = slot.node.take() {
                scene.remove(node.mesh);
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.nodes.len() as u32).collect();
        self.spawn_queue.clear();
        info!("LOD octree cleared");
    }
}
