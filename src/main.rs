use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::Vec3;
use log::info;

use celestial_terrain::request::MaterialHandle;
use celestial_terrain::voxel::{ChunkSpawner, Extractor, LodOctree, NoisePlanet, PlanetParameters};
use celestial_terrain::{MaterialFn, MeshingScheduler, Scene, TerrainConfig};

const PLANET_SEED: u32 = 1337;
const TICKS: usize = 240;
const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Surface colour picked from where a chunk sits between the lowest and highest terrain.
#[derive(Debug, Clone, Copy)]
struct HeightTint {
    low: f32,
    high: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => TerrainConfig::load(&path).with_context(|| format!("loading config from {}", path))?,
        None => TerrainConfig::default(),
    };
    config.max_workers = config.max_workers.min(num_cpus::get().max(1));
    info!("Using {:?}", config);

    let params = PlanetParameters::random(PLANET_SEED, 32.0, 32);
    let planet = Arc::new(NoisePlanet::new(params, Vec3::ZERO));
    let radius = params.radius;

    let extractor = Arc::new(Extractor::with_fallback(config.strategy, config.gpu_batch_size));
    info!("Meshing with {} strategy", extractor.strategy().as_str());
    let mut scheduler =
        MeshingScheduler::new(config.scheduler(), extractor).context("starting meshing scheduler")?;

    let material: MaterialFn = Arc::new(move |min: f32, max: f32, _center: Vec3| {
        Arc::new(HeightTint {
            low: (min / radius).clamp(0.0, 2.0),
            high: (max / radius).clamp(0.0, 2.0),
        }) as MaterialHandle
    });

    let mut scene = Scene::new();
    let body = scene
        .add_child(scene.root(), "planet")
        .context("creating planet node")?;
    let spawner = ChunkSpawner::new(planet, config.max_depth).with_material(material);
    let mut octree = LodOctree::new(config.lod(), spawner, &mut scene, &scheduler, body, Vec3::ZERO)
        .context("creating LOD octree")?;

    let start = Vec3::new(0.0, radius * 6.0, 0.0);
    let end = Vec3::new(0.0, radius * 1.05, 0.0);
    let started = Instant::now();

    for tick in 0..TICKS {
        let t = tick as f32 / (TICKS - 1) as f32;
        let viewer = start.lerp(end, t);

        let attached = scheduler.attach_completed(&mut scene);
        let report = octree.update(viewer, &mut scene, &scheduler);

        if tick % 30 == 0 || tick == TICKS - 1 {
            info!(
                "tick {:>3} altitude {:>6.1}: {} nodes, {} visible, {} in flight, {} attached, {} spawned",
                tick,
                viewer.length() - radius,
                octree.node_count(),
                octree.visible_count(&scene),
                scheduler.in_flight_count(),
                attached.attached,
                report.spawned
            );
        }
        thread::sleep(TICK_INTERVAL);
    }

    let probe = scene.ray_cast(end, Vec3::NEG_Y, radius * 2.0);
    match probe {
        Some((_, hit)) => info!("Ground below the viewer at distance {:.2}", hit.distance),
        None => info!("No ground below the viewer yet"),
    }
    if let Some(tint) = scene
        .chunks()
        .find_map(|(_, chunk)| chunk.material.as_ref()?.downcast_ref::<HeightTint>().copied())
    {
        info!("Sample chunk tint spans {:.2}..{:.2} of the radius", tint.low, tint.high);
    }

    info!(
        "Finished in {:.2?}: peak {} workers, {} meshed, {} failed, visibility consistent: {}",
        started.elapsed(),
        scheduler.stats().peak_running(),
        scheduler.stats().completed(),
        scheduler.stats().failed(),
        octree.check_visibility(&scene)
    );

    octree.clear(&mut scene);
    scheduler.shutdown();
    Ok(())
}
