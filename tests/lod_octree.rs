//! Integration tests: octree level-of-detail control.

mod common;

use std::sync::Arc;

use celestial_terrain::voxel::{ChunkSpawner, LodConfig, LodOctree, NodeId, NodeState, SphereField};
use celestial_terrain::{MeshState, MeshingService, Scene, SceneHandle};
use common::*;
use glam::Vec3;

/// Just above the north pole of the test body.
const NEAR: Vec3 = Vec3::new(0.0, 9.0, 0.0);
const FAR: Vec3 = Vec3::new(0.0, 1000.0, 0.0);

struct Fixture {
    tree: LodOctree,
    scene: Scene,
    service: ManualService,
    planet: SceneHandle,
}

fn fixture(max_depth: u32, spawns_per_tick: usize) -> Fixture {
    let mut scene = Scene::new();
    let service = ManualService::default();
    let planet = scene.add_child(scene.root(), "planet").unwrap();
    let spawner = ChunkSpawner::new(Arc::new(SphereField::new(Vec3::ZERO, 8.0, 8)), max_depth);
    let config = LodConfig {
        max_depth,
        distance_factor: 1.0,
        spawns_per_tick,
    };
    let tree = LodOctree::new(config, spawner, &mut scene, &service, planet, Vec3::ZERO).unwrap();
    Fixture {
        tree,
        scene,
        service,
        planet,
    }
}

impl Fixture {
    fn tick(&mut self, viewer: Vec3) {
        self.tree.update(viewer, &mut self.scene, &self.service);
    }

    fn visible(&self, id: NodeId) -> bool {
        let mesh = self.tree.node(id).unwrap().mesh();
        self.scene.get(mesh).unwrap().is_visible()
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.tree.node(id).unwrap().children().iter().flatten().copied().collect()
    }

    /// Meshes the root, subdivides it and spawns all eight children.
    fn subdivide_root(&mut self) {
        self.service.complete_all(&mut self.scene);
        while self.children(self.tree.root()).len() < 8 {
            self.tick(NEAR);
        }
    }
}

#[test]
fn depth_zero_tree_never_subdivides() {
    let mut f = fixture(0, 8);
    f.service.complete_all(&mut f.scene);
    for _ in 0..5 {
        f.tick(Vec3::ZERO);
    }
    assert_eq!(f.tree.node_count(), 1);
    assert_eq!(f.tree.state(f.tree.root(), &f.scene), Some(NodeState::LeafMeshed));
    assert!(f.visible(f.tree.root()));
}

#[test]
fn root_chunk_lives_under_the_planet_node() {
    let f = fixture(2, 1);
    let root = f.tree.node(f.tree.root()).unwrap();
    assert_eq!(f.scene.get(root.mesh()).unwrap().parent(), Some(f.planet));
    assert!(f.visible(f.tree.root()));
    assert_eq!(f.service.queued_len(), 1);
}

#[test]
fn children_spawn_one_per_tick() {
    let mut f = fixture(2, 1);
    f.service.complete_all(&mut f.scene);

    f.tick(NEAR);
    assert_eq!(f.tree.state(f.tree.root(), &f.scene), Some(NodeState::Subdividing));
    assert_eq!(f.tree.pending_spawns(), 8);

    for expected in 1..=8 {
        f.tick(NEAR);
        assert_eq!(f.children(f.tree.root()).len(), expected);
    }
    assert_eq!(f.tree.pending_spawns(), 0);
    assert_eq!(f.tree.state(f.tree.root(), &f.scene), Some(NodeState::SubdividedPending));

    for child in f.children(f.tree.root()) {
        let node = f.tree.node(child).unwrap();
        assert_eq!(node.depth(), 1);
        assert_eq!(node.size(), 8.0);
        assert!(f.service.is_in_flight(node.request()));
        assert_eq!(f.scene.get(node.mesh()).unwrap().parent(), Some(f.planet));
        assert!(!f.visible(child));
    }
}

#[test]
fn parent_stays_visible_until_every_child_is_meshed() {
    let mut f = fixture(2, 8);
    f.subdivide_root();
    let root = f.tree.root();
    let children = f.children(root);

    // mesh seven of the eight children
    let last = f.tree.node(children[7]).unwrap().request();
    f.service.complete_where(&mut f.scene, |r| r.id() != last);
    for _ in 0..3 {
        f.tick(NEAR);
        assert!(f.visible(root));
        assert!(children.iter().all(|&c| !f.visible(c)));
        assert!(f.tree.check_visibility(&f.scene));
    }

    f.service.complete_where(&mut f.scene, |r| r.id() == last);
    f.tick(NEAR);
    assert!(!f.visible(root));
    assert!(children.iter().all(|&c| f.visible(c)));
    assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::SubdividedReady));
    assert!(f.tree.check_visibility(&f.scene));
}

#[test]
fn failed_child_blocks_the_swap() {
    let mut f = fixture(1, 8);
    f.subdivide_root();
    let root = f.tree.root();
    let broken = f.tree.node(f.children(root)[3]).unwrap().request();

    f.service.fail_where(&mut f.scene, |r| r.id() == broken);
    f.service.complete_all(&mut f.scene);
    for _ in 0..3 {
        f.tick(NEAR);
    }

    assert!(f.visible(root));
    assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::SubdividedPending));
    let failed = f.tree.node(f.children(root)[3]).unwrap().mesh();
    assert_eq!(f.scene.mesh_state(failed), Some(MeshState::Failed));
}

#[test]
fn merge_restores_the_parent() {
    let mut f = fixture(1, 8);
    f.subdivide_root();
    f.service.complete_all(&mut f.scene);
    f.tick(NEAR);
    let root = f.tree.root();
    assert!(!f.visible(root));
    let child_meshes: Vec<SceneHandle> = f
        .children(root)
        .iter()
        .map(|&c| f.tree.node(c).unwrap().mesh())
        .collect();

    f.tick(FAR);
    assert!(f.visible(root));
    assert!(f.scene.get(f.tree.node(root).unwrap().mesh()).unwrap().collision_enabled());
    assert_eq!(f.tree.node_count(), 1);
    assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::LeafMeshed));
    assert!(child_meshes.iter().all(|&m| !f.scene.is_valid(m)));
    assert!(f.tree.check_visibility(&f.scene));
}

#[test]
fn merge_waits_for_children_in_flight() {
    let mut f = fixture(1, 8);
    f.subdivide_root();
    let root = f.tree.root();

    f.tick(FAR);
    assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::Merging));
    assert_eq!(f.tree.node_count(), 9);
    assert!(f.visible(root));
    assert!(f.tree.check_visibility(&f.scene));

    // late results still land on their hidden chunks
    f.service.complete_all(&mut f.scene);
    f.tick(FAR);
    assert_eq!(f.tree.node_count(), 1);
    assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::LeafMeshed));
}

#[test]
fn merging_drops_queued_spawns() {
    let mut f = fixture(1, 1);
    f.service.complete_all(&mut f.scene);
    f.tick(NEAR);
    f.tick(NEAR);
    assert_eq!(f.children(f.tree.root()).len(), 1);
    assert_eq!(f.tree.pending_spawns(), 7);

    f.tick(FAR);
    assert_eq!(f.tree.pending_spawns(), 0);
    let spawned = f.children(f.tree.root()).len();

    f.service.complete_all(&mut f.scene);
    f.tick(FAR);
    f.tick(FAR);
    assert_eq!(f.tree.node_count(), 1);
    // nothing new was spawned for the merged parent
    assert_eq!(f.service.queued_len(), 0);
    assert!(spawned <= 2);
}

#[test]
fn merging_drops_queued_spawns_of_grandchildren() {
    let mut f = fixture(2, 2);
    f.subdivide_root();
    f.service.complete_all(&mut f.scene);
    let root = f.tree.root();

    // the upper children subdivide and start trickling out grandchildren
    f.tick(NEAR);
    f.tick(NEAR);
    f.tick(NEAR);
    let grandchildren: usize = f.children(root).iter().map(|&c| f.children(c).len()).sum();
    assert!(grandchildren > 0);
    assert!(f.tree.pending_spawns() > 0);

    f.tick(FAR);
    assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::Merging));
    assert_eq!(f.tree.pending_spawns(), 0);
    let nodes = f.tree.node_count();
    let queued = f.service.queued_len();

    // grandchildren are still meshing, so the merge holds without growing
    for _ in 0..4 {
        f.tick(FAR);
        assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::Merging));
        assert_eq!(f.tree.node_count(), nodes);
        assert_eq!(f.service.queued_len(), queued);
        assert!(f.tree.check_visibility(&f.scene));
    }

    f.service.complete_all(&mut f.scene);
    f.tick(FAR);
    assert_eq!(f.tree.node_count(), 1);
    assert_eq!(f.tree.state(root, &f.scene), Some(NodeState::LeafMeshed));
}

#[test]
fn empty_children_count_as_meshed() {
    // an off-centre body leaves the far octant of the root without surface
    let mut scene = Scene::new();
    let service = ManualService::default();
    let planet = scene.add_child(scene.root(), "planet").unwrap();
    let body = SphereField::new(Vec3::new(3.0, 3.0, 3.0), 4.0, 8);
    let spawner = ChunkSpawner::new(Arc::new(body), 1);
    let config = LodConfig {
        max_depth: 1,
        distance_factor: 4.0,
        spawns_per_tick: 8,
    };
    let mut tree = LodOctree::new(config, spawner, &mut scene, &service, planet, Vec3::ZERO).unwrap();

    for _ in 0..4 {
        service.complete_all(&mut scene);
        tree.update(Vec3::new(3.0, 3.0, 3.0), &mut scene, &service);
    }

    let root = tree.node(tree.root()).unwrap();
    let empty = root
        .children()
        .iter()
        .flatten()
        .filter(|&&c| scene.mesh_state(tree.node(c).unwrap().mesh()) == Some(MeshState::Empty))
        .count();
    assert!(empty > 0);
    assert_eq!(tree.state(tree.root(), &scene), Some(NodeState::SubdividedReady));
    assert!(tree.check_visibility(&scene));
}

#[test]
fn deeper_levels_follow_the_viewer() {
    let mut f = fixture(2, 8);
    for _ in 0..12 {
        f.service.complete_all(&mut f.scene);
        f.tick(NEAR);
        assert!(f.tree.check_visibility(&f.scene));
    }

    let deepest = f
        .children(f.tree.root())
        .into_iter()
        .flat_map(|c| f.children(c))
        .count();
    assert!(deepest > 0);
    assert!(f.tree.leaf_count() > 8);

    for _ in 0..4 {
        f.service.complete_all(&mut f.scene);
        f.tick(FAR);
    }
    assert_eq!(f.tree.node_count(), 1);
    assert!(f.visible(f.tree.root()));
}

#[test]
fn chunk_heights_follow_the_body_center() {
    let mut scene = Scene::new();
    let service = ManualService::default();
    let planet = scene.add_child(scene.root(), "planet").unwrap();
    let center = Vec3::new(50.0, -20.0, 10.0);
    let spawner = ChunkSpawner::new(Arc::new(SphereField::new(center, 8.0, 8)), 1);
    let config = LodConfig {
        max_depth: 1,
        distance_factor: 1.0,
        spawns_per_tick: 8,
    };
    let tree = LodOctree::new(config, spawner, &mut scene, &service, planet, center).unwrap();
    service.complete_all(&mut scene);

    let mesh = tree.node(tree.root()).unwrap().mesh();
    let chunk = scene.get(mesh).and_then(|n| n.chunk()).unwrap();
    assert!(chunk.min_height > 6.0 && chunk.max_height < 10.0);
}

#[test]
fn clear_removes_every_chunk() {
    let mut f = fixture(1, 8);
    f.subdivide_root();
    let before = f.scene.node_count();
    assert_eq!(before, 2 + 9);

    f.tree.clear(&mut f.scene);
    assert_eq!(f.tree.node_count(), 0);
    assert_eq!(f.scene.node_count(), 2);
    assert!(f.scene.is_valid(f.planet));
}
