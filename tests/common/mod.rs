//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;

use celestial_terrain::voxel::{Extractor, MeshStrategy, ScalarGrid};
use celestial_terrain::worker::{attach_result, execute, AttachOutcome, MeshingOutcome, MeshingResult};
use celestial_terrain::{MeshingRequest, MeshingService, RequestId, Result, Scene, TerrainError};
use glam::Vec3;

/// Signed distance sphere on an `n^3` lattice with unit spacing, positive inside.
pub fn sphere_grid(n: usize, center: Vec3, radius: f32) -> ScalarGrid {
    ScalarGrid::from_fn([n, n, n], |x, y, z| {
        radius - Vec3::new(x as f32, y as f32, z as f32).distance(center)
    })
}

/// Triangle list reduced to a sorted, quantized form so output order and
/// float noise do not matter.
pub fn triangle_set(vertices: &[Vec3]) -> Vec<[[i64; 3]; 3]> {
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

/// Meshing service that holds every request until the test releases it.
#[derive(Default)]
pub struct ManualService {
    queued: RefCell<Vec<MeshingRequest>>,
    in_flight: RefCell<HashSet<RequestId>>,
}

impl MeshingService for ManualService {
    fn enqueue(&self, request: MeshingRequest) -> Result<()> {
        if !self.in_flight.borrow_mut().insert(request.id()) {
            return Err(TerrainError::DuplicateRequest(request.id()));
        }
        self.queued.borrow_mut().push(request);
        Ok(())
    }

    fn is_in_flight(&self, id: RequestId) -> bool {
        self.in_flight.borrow().contains(&id)
    }
}

impl ManualService {
    pub fn queued_len(&self) -> usize {
        self.queued.borrow().len()
    }

    /// Meshes and attaches every held request.
    pub fn complete_all(&self, scene: &mut Scene) -> Vec<AttachOutcome> {
        self.complete_where(scene, |_| true)
    }

    /// Meshes and attaches the held requests matching `filter`.
    pub fn complete_where(&self, scene: &mut Scene, filter: impl Fn(&MeshingRequest) -> bool) -> Vec<AttachOutcome> {
        let extractor = Extractor::new(MeshStrategy::Cpu, 32).unwrap();
        self.release(filter)
            .into_iter()
            .map(|request| attach_result(scene, execute(&request, &extractor, 0.0)))
            .collect()
    }

    /// Attaches a failure for every held request matching `filter`.
    pub fn fail_where(&self, scene: &mut Scene, filter: impl Fn(&MeshingRequest) -> bool) -> Vec<AttachOutcome> {
        self.release(filter)
            .into_iter()
            .map(|request| {
                let result = MeshingResult {
                    id: request.id(),
                    target: request.target(),
                    placeholder: request.placeholder(),
                    outcome: MeshingOutcome::Failed(TerrainError::MissingField(request.id())),
                };
                attach_result(scene, result)
            })
            .collect()
    }

    fn release(&self, filter: impl Fn(&MeshingRequest) -> bool) -> Vec<MeshingRequest> {
        let mut queued = self.queued.borrow_mut();
        let (chosen, kept): (Vec<_>, Vec<_>) = queued.drain(..).partition(|r| filter(r));
        *queued = kept;
        let mut in_flight = self.in_flight.borrow_mut();
        for request in &chosen {
            in_flight.remove(&request.id());
        }
        chosen
    }
}
