//! Sun shadow ray tracing over a height field
//!
//! Two interchangeable tracers share the ray-march rules in [`march_ray`]:
//! - [`SequentialTracer`]: host ray march, parallel across cells with rayon
//! - [`ParallelTracer`]: the same march in a wgpu compute shader

pub mod gpu;
pub mod sequential;

use std::fmt;
use std::str::FromStr;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::bands::{BandTable, ColorBuffer};
use crate::error::{ConfigError, TerrainError};
use crate::heightmap::HeightField;
use crate::tilemap::Tilemap;

pub use gpu::{ComputeProgram, ParallelTracer};
pub use sequential::SequentialTracer;

/// How a tile is shaded after classification.
///
/// Serde goes through [`FromStr`], so JSON accepts the same names as the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TracingMode {
    /// Band colours only.
    #[default]
    Basic,
    /// Ray march on the host.
    Sequential,
    /// Ray march on the GPU.
    Accelerated,
}

impl TracingMode {
    pub fn all() -> &'static [Self] {
        &[Self::Basic, Self::Sequential, Self::Accelerated]
    }
}

impl fmt::Display for TracingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Sequential => write!(f, "cpu"),
            Self::Accelerated => write!(f, "gpu"),
        }
    }
}

impl FromStr for TracingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "basic" | "none" => Ok(Self::Basic),
            "cpu" | "sequential" | "cpuraytracing" => Ok(Self::Sequential),
            "gpu" | "accelerated" | "gpuraytracing" => Ok(Self::Accelerated),
            _ => Err(ConfigError::UnknownTracingMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for TracingMode {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TracingMode> for String {
    fn from(mode: TracingMode) -> Self {
        mode.to_string()
    }
}

/// Ray-march parameters shared by both tracers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceSettings {
    /// Number of steps marched towards the sun.
    pub ray_steps: u32,
    /// Length of one step, in cells.
    pub step_length: f32,
    /// Multiplier applied to the colour of shadowed cells.
    pub brightness_coef: f32,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            ray_steps: 40,
            step_length: 1.0,
            brightness_coef: 0.4,
        }
    }
}

/// Sun position orbiting a square tile.
///
/// The sun moves on a circle of radius `orbit_radius` around the tile centre
/// at a fixed `height`. Heights are in the same units as the height field
/// (0..1) while horizontal distances are in cells, so the sun sits low over
/// the terrain and casts long shadows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunState {
    pub theta: f32,
    pub orbit_radius: f32,
    pub height: f32,
    pub position_2d: [f32; 2],
    pub position_3d: [f32; 3],
    map_size: usize,
}

impl SunState {
    pub const DEFAULT_HEIGHT: f32 = 5.0;
    pub const DEFAULT_ORBIT_FACTOR: f32 = 1.52;

    pub fn new(map_size: usize, height: f32, orbit_factor: f32, theta: f32) -> Self {
        let mut sun = Self {
            theta,
            orbit_radius: orbit_factor * map_size as f32,
            height,
            position_2d: [0.0; 2],
            position_3d: [0.0; 3],
            map_size,
        };
        sun.set_position(theta);
        sun
    }

    /// Sun at an explicit position, e.g. straight above a cell.
    pub fn fixed(map_size: usize, position_3d: [f32; 3]) -> Self {
        let [x, y, z] = position_3d;
        let half = map_size as f32 / 2.0;
        Self {
            theta: (z - half).atan2(x - half),
            orbit_radius: ((x - half).powi(2) + (z - half).powi(2)).sqrt(),
            height: y,
            position_2d: [x, z],
            position_3d,
            map_size,
        }
    }

    /// Move the sun to angle `theta` (radians from the +x axis) on its orbit.
    pub fn set_position(&mut self, theta: f32) {
        let half = self.map_size as f32 / 2.0;
        let (sin_theta, cos_theta) = theta.sin_cos();
        let x = self.orbit_radius * cos_theta + half;
        let z = self.orbit_radius * sin_theta + half;

        self.theta = theta;
        self.position_3d = [x, self.height, z];
        self.position_2d = [x, z];

        tracing::debug!(theta, x, y = self.height, z, "new sun position");
    }
}

/// Occlusion decision for every cell.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowMap {
    occluded: Tilemap<bool>,
    brightness_coef: f32,
}

impl ShadowMap {
    pub fn new(occluded: Tilemap<bool>, brightness_coef: f32) -> Self {
        Self { occluded, brightness_coef }
    }

    pub fn is_shadowed(&self, x: usize, y: usize) -> bool {
        *self.occluded.get(x, y)
    }

    /// Colour multiplier for a cell: the brightness coefficient if shadowed, 1 otherwise.
    pub fn brightness(&self, x: usize, y: usize) -> f32 {
        if self.is_shadowed(x, y) { self.brightness_coef } else { 1.0 }
    }

    pub fn shadowed_count(&self) -> usize {
        self.occluded.as_slice().iter().filter(|&&s| s).count()
    }

    pub fn occlusion(&self) -> &Tilemap<bool> {
        &self.occluded
    }

    /// Darken shadowed cells in place.
    pub fn apply(&self, colors: &mut ColorBuffer) {
        let occluded = &self.occluded;
        let coef = self.brightness_coef;
        colors.par_for_each_mut(|x, y, c| {
            if *occluded.get(x, y) {
                *c = c.scaled(coef);
            }
        });
    }
}

/// Result of shading a classified tile.
pub struct Shading {
    pub shadows: ShadowMap,
    /// Finished pixels when the tracer composes them itself. In that case the
    /// colour buffer passed to [`ShadowTracer::shade`] is left as classified.
    pub image: Option<RgbaImage>,
}

/// A shadow tracer. Both implementations make the same occlusion decision
/// for the same inputs.
pub trait ShadowTracer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide for every cell whether the sun is blocked.
    fn trace(&self, heights: &HeightField, sun: &SunState) -> Result<ShadowMap, TerrainError>;

    /// Shade a classified tile, either by darkening `colors` in place or by
    /// returning a finished image in [`Shading::image`].
    fn shade(
        &self,
        heights: &HeightField,
        bands: &BandTable,
        colors: &mut ColorBuffer,
        sun: &SunState,
    ) -> Result<Shading, TerrainError>;
}

/// March from cell (`x`, `y`) towards the sun. Returns true when terrain
/// blocks the ray.
///
/// Columns are sampled at `floor` of the stepped position. A ray that leaves
/// the field is unoccluded. The WGSL kernel in [`gpu`] mirrors this function
/// operation for operation.
pub fn march_ray(heights: &HeightField, x: usize, y: usize, sun: [f32; 3], settings: &TraceSettings) -> bool {
    let origin_x = x as f32;
    let origin_y = *heights.get(x, y);
    let origin_z = y as f32;

    let dx = sun[0] - origin_x;
    let dy = sun[1] - origin_y;
    let dz = sun[2] - origin_z;
    let len = (dx * dx + dy * dy + dz * dz).sqrt();
    if len <= f32::EPSILON {
        return false;
    }
    let step_x = dx / len * settings.step_length;
    let step_y = dy / len * settings.step_length;
    let step_z = dz / len * settings.step_length;

    for i in 1..=settings.ray_steps {
        let t = i as f32;
        let px = origin_x + step_x * t;
        let py = origin_y + step_y * t;
        let pz = origin_z + step_z * t;

        match heights.try_get(px.floor() as i64, pz.floor() as i64) {
            None => return false,
            Some(&terrain) if py < terrain => return true,
            Some(_) => {}
        }
    }
    false
}
