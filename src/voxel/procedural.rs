use glam::Vec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::voxel::field::FieldProvider;

const MAX_OCTAVES: usize = 8;
const MAX_AMPLITUDE: f32 = 20.0;

/// Shape parameters of a noise planet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanetParameters {
    pub seed: u32,
    pub radius: f32,
    pub resolution: u32,
    pub octaves: usize,
    /// Terrain relief as a percentage of the radius.
    pub amplitude: f32,
    pub frequency: f64,
    pub lacunarity: f64,
    pub persistence: f64,
}

impl Default for PlanetParameters {
    fn default() -> Self {
        Self {
            seed: 42,
            radius: 32.0,
            resolution: 64,
            octaves: 6,
            amplitude: 8.0,
            frequency: 1.5,
            lacunarity: 2.0,
            persistence: 0.5,
        }
    }
}

impl PlanetParameters {
    /// Deterministic random shape for `seed`. The same seed always yields the same planet.
    pub fn random(seed: u32, radius: f32, resolution: u32) -> Self {
        let mut rng = Pcg32::seed_from_u64(seed as u64);
        let round = |v: f32| (v * 100.0).round() / 100.0;

        let octaves = rng.gen_range(4..MAX_OCTAVES);
        let amplitude = (round(rng.gen::<f32>()) * MAX_AMPLITUDE).max(5.0);
        let frequency = (round(rng.gen::<f32>()) * 2.0).max(0.25) as f64;
        let lacunarity = (round(rng.gen::<f32>()) * 4.0).max(1.5) as f64;
        let persistence = round(rng.gen::<f32>()).clamp(0.1, 0.25) as f64;

        Self {
            seed,
            radius,
            resolution,
            octaves,
            amplitude,
            frequency,
            lacunarity,
            persistence,
        }
    }
}

/// Sphere whose surface is displaced radially by fractal Perlin noise.
pub struct NoisePlanet {
    params: PlanetParameters,
    center: Vec3,
    height_noise: Fbm<Perlin>,
}

impl NoisePlanet {
    pub fn new(params: PlanetParameters, center: Vec3) -> Self {
        let height_noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves.clamp(1, MAX_OCTAVES))
            .set_frequency(params.frequency)
            .set_persistence(params.persistence)
            .set_lacunarity(params.lacunarity);

        Self {
            params,
            center,
            height_noise,
        }
    }

    pub fn parameters(&self) -> &PlanetParameters {
        &self.params
    }

    /// Surface radius along the direction of `point` from the planet center.
    pub fn surface_radius(&self, point: Vec3) -> f32 {
        let dir = (point - self.center).normalize_or_zero();
        let n = self.height_noise.get(dir.as_dvec3().to_array()) as f32;
        self.params.radius * (1.0 + n * self.params.amplitude / 100.0)
    }
}

impl FieldProvider for NoisePlanet {
    fn sample(&self, point: Vec3) -> f32 {
        let distance = point.distance(self.center);
        (self.surface_radius(point) - distance).clamp(-1.0, 1.0)
    }

    fn radius(&self) -> f32 {
        self.params.radius
    }

    fn resolution(&self) -> u32 {
        self.params.resolution
    }
}
