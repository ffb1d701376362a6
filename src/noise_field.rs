//! Deterministic fractal noise over world-space coordinates.
//!
//! A [`NoiseField`] wraps one seeded base primitive from the `noise` crate and
//! sums octaves of it itself, so the octave loop, normalization and the
//! zero-octave fallback are defined here rather than by the library.

use noise::{NoiseFn, Perlin, Value};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on octave count.
pub const MAX_OCTAVES: u32 = 10;

/// Which base primitive to use and whether to sum octaves of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FractalType {
    /// One octave of value noise at the configured frequency.
    Single,
    /// Fractal sum of value noise.
    #[default]
    ValueFractal,
    /// Fractal sum of Perlin gradient noise.
    PerlinFractal,
}

/// Validated noise parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseParams {
    seed: u32,
    frequency: f64,
    fractal_type: FractalType,
    octaves: u32,
    gain: f64,
    lacunarity: f64,
    noise_scale: f64,
}

impl NoiseParams {
    /// Check every parameter against its documented range. Nothing is
    /// clamped here; see `NoiseSettings::sanitized` for the clamping step.
    pub fn new(
        seed: u32,
        frequency: f64,
        fractal_type: FractalType,
        octaves: u32,
        gain: f64,
        lacunarity: f64,
    ) -> Result<Self, ConfigError> {
        if !(frequency > 0.0 && frequency <= 1.0) {
            return Err(ConfigError::InvalidFrequency(frequency));
        }
        if octaves > MAX_OCTAVES {
            return Err(ConfigError::InvalidOctaves { value: octaves as i64, max: MAX_OCTAVES });
        }
        if !(0.0..=2.0).contains(&gain) {
            return Err(ConfigError::InvalidGain(gain));
        }
        if !(lacunarity >= 1.0 && lacunarity.is_finite()) {
            return Err(ConfigError::InvalidLacunarity(lacunarity));
        }
        Ok(Self {
            seed,
            frequency,
            fractal_type,
            octaves,
            gain,
            lacunarity,
            noise_scale: 1.0,
        })
    }

    /// Divide world coordinates by `scale` before sampling.
    pub fn with_noise_scale(mut self, scale: f64) -> Result<Self, ConfigError> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(ConfigError::InvalidNoiseScale(scale));
        }
        self.noise_scale = scale;
        Ok(self)
    }

    pub fn seed(&self) -> u32 { self.seed }
    pub fn frequency(&self) -> f64 { self.frequency }
    pub fn fractal_type(&self) -> FractalType { self.fractal_type }
    pub fn octaves(&self) -> u32 { self.octaves }
    pub fn gain(&self) -> f64 { self.gain }
    pub fn lacunarity(&self) -> f64 { self.lacunarity }
    pub fn noise_scale(&self) -> f64 { self.noise_scale }
}

enum BaseNoise {
    Value(Value),
    Perlin(Perlin),
}

impl BaseNoise {
    fn get(&self, x: f64, y: f64) -> f64 {
        match self {
            Self::Value(n) => n.get([x, y]),
            Self::Perlin(n) => n.get([x, y]),
        }
    }
}

/// Seeded scalar noise field.
pub struct NoiseField {
    params: NoiseParams,
    base: BaseNoise,
}

impl NoiseField {
    pub fn new(params: NoiseParams) -> Self {
        let base = match params.fractal_type {
            FractalType::Single | FractalType::ValueFractal => BaseNoise::Value(Value::new(params.seed)),
            FractalType::PerlinFractal => BaseNoise::Perlin(Perlin::new(params.seed)),
        };
        Self { params, base }
    }

    /// Base primitive at raw coordinates, in [-1, 1].
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.base.get(x, y).clamp(-1.0, 1.0)
    }

    /// Weighted octave sum normalized by the total amplitude.
    ///
    /// Frequency starts at the configured frequency and is multiplied by
    /// `lacunarity` each octave; amplitude starts at 1 and is multiplied by
    /// `gain`. With `octaves == 0` a single base-frequency octave is used.
    pub fn evaluate_fractal(&self, x: f64, y: f64, octaves: u32, gain: f64, lacunarity: f64) -> f64 {
        let octaves = octaves.max(1);
        let mut frequency = self.params.frequency;
        let mut amplitude = 1.0;
        let mut total = 0.0;
        let mut amplitude_sum = 0.0;

        for _ in 0..octaves {
            total += amplitude * self.evaluate(x * frequency, y * frequency);
            amplitude_sum += amplitude;
            frequency *= lacunarity;
            amplitude *= gain;
        }

        // First octave always contributes amplitude 1, so the sum is >= 1.
        total / amplitude_sum
    }

    /// Sample using the configured fractal type. Result is in [-1, 1].
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        match self.params.fractal_type {
            FractalType::Single => {
                let f = self.params.frequency;
                self.evaluate(x * f, y * f)
            }
            FractalType::ValueFractal | FractalType::PerlinFractal => self.evaluate_fractal(
                x,
                y,
                self.params.octaves,
                self.params.gain,
                self.params.lacunarity,
            ),
        }
    }

    /// Height in [0, 1] at an integer world coordinate.
    pub fn sample_height(&self, world_x: i64, world_y: i64) -> f32 {
        let scale = self.params.noise_scale;
        let v = self.sample(world_x as f64 / scale, world_y as f64 / scale);
        ((v + 1.0) * 0.5).clamp(0.0, 1.0) as f32
    }
}
