//! Bounded meshing scheduler.
//!
//! A dispatch thread pulls requests off the queue in submission order and
//! hands each one to a worker pool. Once `max_workers` tasks are outstanding
//! it waits for the whole batch to finish before pulling more. Workers never
//! touch the scene: finished meshes travel back over a channel and are
//! attached on the control thread by [`MeshingScheduler::attach_completed`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};

use crate::error::{Result, TerrainError};
use crate::physics::CollisionShape;
use crate::request::{FieldSource, MeshingRequest, RequestId};
use crate::scene::{MeshState, Scene, SceneHandle};
use crate::voxel::extract::Extractor;
use crate::voxel::mesh::{ChunkMesh, MeshData};

/// How long the dispatch thread waits on an empty queue before rechecking shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Seam between the LOD controller and whatever runs meshing jobs.
pub trait MeshingService {
    fn enqueue(&self, request: MeshingRequest) -> Result<()>;

    /// True from a successful `enqueue` until the result has been attached.
    fn is_in_flight(&self, id: RequestId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    /// Result produced, waiting for the control thread to attach it.
    Completed,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub iso_level: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: crate::config::DEFAULT_MAX_WORKERS,
            iso_level: crate::config::DEFAULT_ISO_LEVEL,
        }
    }
}

/// What a worker produced for one request.
#[derive(Debug)]
pub enum MeshingOutcome {
    Ready(ChunkMesh),
    /// No surface crosses the region.
    Empty,
    Failed(TerrainError),
}

#[derive(Debug)]
pub struct MeshingResult {
    pub id: RequestId,
    pub target: SceneHandle,
    pub placeholder: Option<SceneHandle>,
    pub outcome: MeshingOutcome,
}

/// What happened to one result on the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    Empty,
    Failed,
    /// Target vanished before the result arrived.
    Stale,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AttachReport {
    pub attached: usize,
    pub empty: usize,
    pub failed: usize,
    pub stale: usize,
}

impl AttachReport {
    pub fn total(&self) -> usize {
        self.attached + self.empty + self.failed + self.stale
    }

    fn record(&mut self, outcome: AttachOutcome) {
        match outcome {
            AttachOutcome::Attached => self.attached += 1,
            AttachOutcome::Empty => self.empty += 1,
            AttachOutcome::Failed => self.failed += 1,
            AttachOutcome::Stale => self.stale += 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    running: AtomicUsize,
    peak_running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl SchedulerStats {
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of workers that were meshing at the same time.
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Runs the full worker pipeline for one request: field, extraction, mesh,
/// collision and material.
pub fn execute(request: &MeshingRequest, extractor: &Extractor, iso_level: f32) -> MeshingResult {
    let outcome = match build_chunk(request, extractor, iso_level) {
        Ok(Some(chunk)) => MeshingOutcome::Ready(chunk),
        Ok(None) => MeshingOutcome::Empty,
        Err(e) => MeshingOutcome::Failed(e),
    };

    MeshingResult {
        id: request.id(),
        target: request.target(),
        placeholder: request.placeholder(),
        outcome,
    }
}

fn build_chunk(request: &MeshingRequest, extractor: &Extractor, iso_level: f32) -> Result<Option<ChunkMesh>> {
    let grid = match request.field() {
        Some(FieldSource::Grid(grid)) => Arc::clone(grid),
        Some(FieldSource::Provider(provider)) => Arc::new(provider.grid(request.offset(), request.scale())),
        None => return Err(TerrainError::MissingField(request.id())),
    };

    if grid.is_empty() {
        return Err(TerrainError::InvalidGrid(format!("zero-dimension grid {:?}", grid.dims())));
    }

    let soup = extractor.generate(&grid, iso_level, request.scale())?;
    let mesh = MeshData::from_triangles(&soup, request.offset());

    let (min_height, max_height) = match mesh.height_range(request.body_origin()) {
        Some(range) => range,
        None => return Ok(None),
    };
    let collision = match CollisionShape::from_mesh(&mesh) {
        Some(shape) => shape,
        None => return Ok(None),
    };

    let material = request
        .material()
        .map(|build| build(min_height, max_height, request.center()));

    Ok(Some(ChunkMesh {
        mesh,
        collision,
        material,
        min_height,
        max_height,
        chunk_center: request.center(),
    }))
}

/// Applies a worker result to the scene. Must run on the control thread.
pub fn attach_result(scene: &mut Scene, result: MeshingResult) -> AttachOutcome {
    let MeshingResult {
        id,
        target,
        placeholder,
        outcome,
    } = result;

    if !scene.is_valid(target) {
        debug!("Discarding result {} for a target that left the scene", id);
        if let Some(placeholder) = placeholder {
            scene.remove(placeholder);
        }
        return AttachOutcome::Stale;
    }

    match outcome {
        MeshingOutcome::Ready(chunk) => {
            if let Some(placeholder) = placeholder {
                scene.remove(placeholder);
            }
            scene.attach_chunk(target, chunk);
            AttachOutcome::Attached
        }
        MeshingOutcome::Empty => {
            if let Some(placeholder) = placeholder {
                scene.remove(placeholder);
            }
            scene.set_mesh_state(target, MeshState::Empty);
            AttachOutcome::Empty
        }
        MeshingOutcome::Failed(e) => {
            warn!("Meshing request {} failed: {}", id, e);
            scene.set_mesh_state(target, MeshState::Failed);
            AttachOutcome::Failed
        }
    }
}

struct DispatchContext {
    queue: Receiver<MeshingRequest>,
    results: Sender<MeshingResult>,
    in_flight: Arc<DashMap<RequestId, TaskState>>,
    running: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
    extractor: Arc<Extractor>,
    pool: rayon::ThreadPool,
    config: SchedulerConfig,
}

pub struct MeshingScheduler {
    config: SchedulerConfig,
    queue_sender: Sender<MeshingRequest>,
    queue_receiver: Receiver<MeshingRequest>,
    result_receiver: Receiver<MeshingResult>,
    in_flight: Arc<DashMap<RequestId, TaskState>>,
    accepting: AtomicBool,
    running: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
    dispatch_thread: Option<thread::JoinHandle<()>>,
}

impl MeshingScheduler {
    pub fn new(config: SchedulerConfig, extractor: Arc<Extractor>) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(TerrainError::Config("max_workers must be at least 1".to_string()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers)
            .thread_name(|i| format!("mesher-{}", i))
            .build()
            .map_err(|e| TerrainError::Config(format!("failed to build worker pool: {}", e)))?;

        let (queue_sender, queue_receiver) = unbounded();
        let (result_sender, result_receiver) = unbounded();
        let in_flight = Arc::new(DashMap::new());
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(SchedulerStats::default());

        let context = DispatchContext {
            queue: queue_receiver.clone(),
            results: result_sender,
            in_flight: Arc::clone(&in_flight),
            running: Arc::clone(&running),
            stats: Arc::clone(&stats),
            extractor,
            pool,
            config,
        };

        let dispatch_thread = thread::Builder::new()
            .name("mesh-dispatch".to_string())
            .spawn(move || dispatch_loop(context))
            .map_err(|e| TerrainError::Config(format!("failed to spawn dispatch thread: {}", e)))?;

        info!("Meshing scheduler started with {} workers", config.max_workers);

        Ok(Self {
            config,
            queue_sender,
            queue_receiver,
            result_receiver,
            in_flight,
            accepting: AtomicBool::new(true),
            running,
            stats,
            dispatch_thread: Some(dispatch_thread),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn task_state(&self, id: RequestId) -> Option<TaskState> {
        self.in_flight.get(&id).map(|state| *state)
    }

    /// Requests that were enqueued but whose result has not been attached yet.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Attaches every finished result to the scene. Call once per control tick.
    pub fn attach_completed(&self, scene: &mut Scene) -> AttachReport {
        let mut report = AttachReport::default();
        while let Ok(result) = self.result_receiver.try_recv() {
            let id = result.id;
            report.record(attach_result(scene, result));
            self.in_flight.remove(&id);
        }

        if report.total() > 0 {
            debug!(
                "Attached {} chunks ({} empty, {} failed, {} stale)",
                report.attached, report.empty, report.failed, report.stale
            );
        }
        report
    }

    /// Stops accepting work, drops queued requests and waits for running ones.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.dispatch_thread.take() else {
            return;
        };

        self.accepting.store(false, Ordering::SeqCst);
        let mut dropped = self.drain_queue();
        self.running.store(false, Ordering::SeqCst);

        if handle.join().is_err() {
            error!("Mesh dispatch thread panicked");
        }
        dropped += self.drain_queue();

        info!("Meshing scheduler shut down, {} queued requests dropped", dropped);
    }

    fn drain_queue(&self) -> usize {
        let mut dropped = 0;
        while let Ok(request) = self.queue_receiver.try_recv() {
            self.in_flight.remove(&request.id());
            dropped += 1;
        }
        dropped
    }
}

impl MeshingService for MeshingScheduler {
    fn enqueue(&self, request: MeshingRequest) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(TerrainError::SchedulerClosed);
        }

        let id = request.id();
        match self.in_flight.entry(id) {
            Entry::Occupied(_) => return Err(TerrainError::DuplicateRequest(id)),
            Entry::Vacant(slot) => {
                slot.insert(TaskState::Queued);
            }
        }

        if self.queue_sender.send(request).is_err() {
            self.in_flight.remove(&id);
            return Err(TerrainError::SchedulerClosed);
        }
        Ok(())
    }

    fn is_in_flight(&self, id: RequestId) -> bool {
        self.in_flight.contains_key(&id)
    }
}

impl Drop for MeshingScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(context: DispatchContext) {
    debug!("Mesh dispatch thread started");

    let (done_sender, done_receiver) = unbounded::<()>();
    let mut outstanding = 0usize;

    loop {
        while done_receiver.try_recv().is_ok() {
            outstanding -= 1;
        }

        match context.queue.recv_timeout(POLL_INTERVAL) {
            Ok(request) => {
                if !context.running.load(Ordering::SeqCst) {
                    context.in_flight.remove(&request.id());
                    continue;
                }

                if let Some(mut state) = context.in_flight.get_mut(&request.id()) {
                    *state = TaskState::Running;
                }

                outstanding += 1;
                spawn_task(&context, request, done_sender.clone());

                if outstanding >= context.config.max_workers {
                    debug!("Meshing pool full ({} tasks), waiting for the batch", outstanding);
                    wait_for_all(&done_receiver, &mut outstanding);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !context.running.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Mesh dispatch exiting - queue closed");
                break;
            }
        }
    }

    wait_for_all(&done_receiver, &mut outstanding);
    debug!("Mesh dispatch thread stopped");
}

fn wait_for_all(done: &Receiver<()>, outstanding: &mut usize) {
    while *outstanding > 0 {
        if done.recv().is_err() {
            break;
        }
        *outstanding -= 1;
    }
}

fn spawn_task(context: &DispatchContext, request: MeshingRequest, done: Sender<()>) {
    let extractor = Arc::clone(&context.extractor);
    let results = context.results.clone();
    let in_flight = Arc::clone(&context.in_flight);
    let stats = Arc::clone(&context.stats);
    let iso_level = context.config.iso_level;

    context.pool.spawn(move || {
        let now_running = stats.running.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_running.fetch_max(now_running, Ordering::SeqCst);

        let id = request.id();
        debug!("Worker meshing request {}", id);

        let result = panic::catch_unwind(AssertUnwindSafe(|| execute(&request, &extractor, iso_level)))
            .unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                MeshingResult {
                    id,
                    target: request.target(),
                    placeholder: request.placeholder(),
                    outcome: MeshingOutcome::Failed(TerrainError::WorkerPanicked(message)),
                }
            });

        if matches!(result.outcome, MeshingOutcome::Failed(_)) {
            stats.failed.fetch_add(1, Ordering::SeqCst);
        }
        stats.completed.fetch_add(1, Ordering::SeqCst);

        if let Some(mut state) = in_flight.get_mut(&id) {
            *state = TaskState::Completed;
        }
        if results.send(result).is_err() {
            error!("Worker failed to hand back result {}", id);
        }

        stats.running.fetch_sub(1, Ordering::SeqCst);
        let _ = done.send(());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::extract::MeshStrategy;
    use crate::voxel::grid::ScalarGrid;
    use glam::Vec3;
    use std::time::Instant;

    fn cpu() -> Arc<Extractor> {
        Arc::new(Extractor::new(MeshStrategy::Cpu, 32).unwrap())
    }

    fn sphere(n: usize, radius: f32) -> ScalarGrid {
        let c = (n - 1) as f32 / 2.0;
        ScalarGrid::from_fn([n, n, n], |x, y, z| radius - Vec3::new(x as f32, y as f32, z as f32).distance(Vec3::splat(c)))
    }

    fn attach_until(scheduler: &MeshingScheduler, scene: &mut Scene, expected: usize) -> AttachReport {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut total = AttachReport::default();
        while total.total() < expected && Instant::now() < deadline {
            let report = scheduler.attach_completed(scene);
            total.attached += report.attached;
            total.empty += report.empty;
            total.failed += report.failed;
            total.stale += report.stale;
            thread::sleep(Duration::from_millis(5));
        }
        total
    }

    #[test]
    fn test_execute_builds_chunk_with_material() {
        let target = SceneHandle::dangling();
        let material: crate::request::MaterialFn =
            Arc::new(|lo: f32, hi: f32, center: Vec3| Arc::new((lo, hi, center)) as crate::request::MaterialHandle);
        let request = MeshingRequest::new(target)
            .with_grid(sphere(9, 3.0))
            .with_offset(Vec3::splat(-4.0))
            .with_center(Vec3::ZERO)
            .with_material(material);

        let result = execute(&request, &cpu(), 0.0);
        let chunk = match result.outcome {
            MeshingOutcome::Ready(chunk) => chunk,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert!(chunk.min_height > 2.0 && chunk.max_height < 4.0);
        let (lo, hi, _) = chunk.material.unwrap().downcast_ref::<(f32, f32, Vec3)>().copied().unwrap();
        assert_eq!((lo, hi), (chunk.min_height, chunk.max_height));
    }

    #[test]
    fn test_heights_are_measured_from_body_origin() {
        // radius 3 sphere whose lattice is shifted so its center lands on (10, 0, 0)
        let request = MeshingRequest::new(SceneHandle::dangling())
            .with_grid(sphere(9, 3.0))
            .with_offset(Vec3::new(6.0, -4.0, -4.0))
            .with_body_origin(Vec3::new(10.0, 0.0, 0.0));

        let chunk = match execute(&request, &cpu(), 0.0).outcome {
            MeshingOutcome::Ready(chunk) => chunk,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert!(chunk.min_height > 2.0 && chunk.max_height < 4.0);
    }

    #[test]
    fn test_execute_reports_missing_field_and_empty() {
        let missing = MeshingRequest::new(SceneHandle::dangling());
        assert!(matches!(
            execute(&missing, &cpu(), 0.0).outcome,
            MeshingOutcome::Failed(TerrainError::MissingField(_))
        ));

        let zero = MeshingRequest::new(SceneHandle::dangling()).with_grid(ScalarGrid::new([0, 0, 0], Vec::new()).unwrap());
        assert!(matches!(
            execute(&zero, &cpu(), 0.0).outcome,
            MeshingOutcome::Failed(TerrainError::InvalidGrid(_))
        ));

        let air = MeshingRequest::new(SceneHandle::dangling()).with_grid(ScalarGrid::from_fn([4, 4, 4], |_, _, _| -1.0));
        assert!(matches!(execute(&air, &cpu(), 0.0).outcome, MeshingOutcome::Empty));
    }

    #[test]
    fn test_in_flight_until_attached() {
        let scheduler = MeshingScheduler::new(SchedulerConfig { max_workers: 2, iso_level: 0.0 }, cpu()).unwrap();
        let mut scene = Scene::new();
        let target = scene.add_child(scene.root(), "chunk").unwrap();
        let request = MeshingRequest::new(target).with_grid(sphere(9, 3.0));
        let id = request.id();

        scheduler.enqueue(request).unwrap();
        assert!(scheduler.is_in_flight(id));

        // finishing on a worker is not enough, the result has to be attached
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.task_state(id) != Some(TaskState::Completed) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(scheduler.is_in_flight(id));

        let report = attach_until(&scheduler, &mut scene, 1);
        assert_eq!(report.attached, 1);
        assert!(!scheduler.is_in_flight(id));
        assert_eq!(scene.mesh_state(target), Some(MeshState::Ready));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let scheduler = MeshingScheduler::new(SchedulerConfig { max_workers: 1, iso_level: 0.0 }, cpu()).unwrap();
        let mut scene = Scene::new();
        let target = scene.add_child(scene.root(), "chunk").unwrap();
        let request = MeshingRequest::new(target).with_grid(sphere(9, 3.0));

        scheduler.enqueue(request.clone()).unwrap();
        assert!(matches!(scheduler.enqueue(request), Err(TerrainError::DuplicateRequest(_))));

        let report = attach_until(&scheduler, &mut scene, 1);
        assert_eq!(report.total(), 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(scheduler.attach_completed(&mut scene).total(), 0);
    }

    #[test]
    fn test_stale_target_is_discarded() {
        let scheduler = MeshingScheduler::new(SchedulerConfig { max_workers: 1, iso_level: 0.0 }, cpu()).unwrap();
        let mut scene = Scene::new();
        let target = scene.add_child(scene.root(), "chunk").unwrap();
        let placeholder = scene.add_child(scene.root(), "placeholder").unwrap();
        let request = MeshingRequest::new(target)
            .with_grid(sphere(9, 3.0))
            .with_placeholder(placeholder);
        let id = request.id();

        scheduler.enqueue(request).unwrap();
        scene.remove(target);

        let report = attach_until(&scheduler, &mut scene, 1);
        assert_eq!(report.stale, 1);
        assert!(!scene.is_valid(placeholder));
        assert!(!scheduler.is_in_flight(id));
    }

    #[test]
    fn test_enqueue_after_shutdown_fails() {
        let mut scheduler = MeshingScheduler::new(SchedulerConfig { max_workers: 2, iso_level: 0.0 }, cpu()).unwrap();
        scheduler.shutdown();
        let request = MeshingRequest::new(SceneHandle::dangling()).with_grid(sphere(5, 1.0));
        assert!(matches!(scheduler.enqueue(request), Err(TerrainError::SchedulerClosed)));
    }

    #[test]
    fn test_zero_workers_is_a_config_error() {
        let result = MeshingScheduler::new(SchedulerConfig { max_workers: 0, iso_level: 0.0 }, cpu());
        assert!(matches!(result, Err(TerrainError::Config(_))));
    }
}
