//! Terrain settings with sensible defaults and JSON persistence.
//!
//! [`TerrainSettings`] is what a host edits or loads from disk. It is turned
//! into an immutable [`TerrainConfig`] once, through
//! [`TerrainSettings::into_config`], which clamps the parameters a host may
//! push out of range and rejects everything else that is invalid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bands::{default_bands, BandTable, TerrainBand};
use crate::error::{ConfigError, TerrainError};
use crate::noise_field::{FractalType, NoiseParams, MAX_OCTAVES};
use crate::shadow::{SunState, TraceSettings, TracingMode};

/// Edge length of a tile when nothing else is configured.
pub const DEFAULT_MAP_SIZE: usize = 500;

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainSettings {
    /// Tile edge length in cells.
    pub map_size: usize,
    pub noise: NoiseSettings,
    pub falloff: FalloffSettings,
    /// Ascending height bands.
    pub bands: Vec<TerrainBand>,
    pub shadow: ShadowSettings,
}

/// Noise settings as edited by a host, before clamping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoiseSettings {
    /// Noise seed. Left unset, the host picks one with [`NoiseSettings::resolve_seed`].
    pub seed: Option<u32>,
    /// Base frequency, in (0, 1].
    pub frequency: f64,
    pub fractal_type: FractalType,
    /// Octave count. Negative values are clamped to 0, values above 10 to 10.
    pub octaves: i32,
    /// Amplitude multiplier per octave, clamped into [0, 2].
    pub gain: f64,
    /// Frequency multiplier per octave, clamped to at least 1.
    pub lacunarity: f64,
    /// World coordinates are divided by this before sampling.
    pub noise_scale: f64,
}

/// Island mask settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FalloffSettings {
    pub enabled: bool,
    /// Falloff curve exponent; larger is a steeper coast.
    pub island_effect: f32,
}

/// Shadow tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowSettings {
    /// `basic`, `cpu` or `gpu`; parsed by [`TerrainSettings::into_config`].
    pub mode: String,
    /// Sun angle in radians from the +x axis.
    pub sun_angle: f32,
    /// Colour multiplier for shadowed cells, in [0, 1].
    pub brightness_coef: f32,
    /// Number of steps marched towards the sun.
    pub ray_steps: u32,
    /// Step length in cells.
    pub step_length: f32,
    /// Sun height in height-field units.
    pub sun_height: f32,
    /// Orbit radius as a multiple of the map size.
    pub orbit_factor: f32,
    /// Use the CPU tracer when GPU mode is selected but no adapter exists.
    pub cpu_fallback: bool,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            noise: NoiseSettings::default(),
            falloff: FalloffSettings::default(),
            bands: default_bands(),
            shadow: ShadowSettings::default(),
        }
    }
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            seed: None,
            frequency: 0.01,
            fractal_type: FractalType::ValueFractal,
            octaves: 5,
            gain: 0.5,
            lacunarity: 2.0,
            noise_scale: 1.0,
        }
    }
}

impl Default for FalloffSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            island_effect: 3.0,
        }
    }
}

impl Default for ShadowSettings {
    fn default() -> Self {
        let trace = TraceSettings::default();
        Self {
            mode: TracingMode::Basic.to_string(),
            sun_angle: 0.0,
            brightness_coef: trace.brightness_coef,
            ray_steps: trace.ray_steps,
            step_length: trace.step_length,
            sun_height: SunState::DEFAULT_HEIGHT,
            orbit_factor: SunState::DEFAULT_ORBIT_FACTOR,
            cpu_fallback: true,
        }
    }
}

impl NoiseSettings {
    /// Return the configured seed, storing `pick()` first when none is set.
    pub fn resolve_seed(&mut self, pick: impl FnOnce() -> u32) -> u32 {
        *self.seed.get_or_insert_with(pick)
    }

    /// Pull octaves, gain and lacunarity back into range.
    pub fn sanitized(&self) -> Self {
        let mut s = self.clone();
        if s.lacunarity < 1.0 || s.lacunarity.is_nan() {
            s.lacunarity = 1.0;
        }
        s.octaves = s.octaves.clamp(0, MAX_OCTAVES as i32);
        s.gain = if s.gain.is_nan() { 0.0 } else { s.gain.clamp(0.0, 2.0) };
        s
    }

    /// Validate without clamping.
    pub fn to_params(&self) -> Result<NoiseParams, ConfigError> {
        if self.octaves < 0 {
            return Err(ConfigError::InvalidOctaves {
                value: self.octaves as i64,
                max: MAX_OCTAVES,
            });
        }
        NoiseParams::new(
            self.seed.unwrap_or_default(),
            self.frequency,
            self.fractal_type,
            self.octaves as u32,
            self.gain,
            self.lacunarity,
        )?
        .with_noise_scale(self.noise_scale)
    }
}

impl TerrainSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| TerrainError::ReadSettings {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, TerrainError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String, TerrainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp what the host may leave out of range, then validate the rest.
    pub fn into_config(self) -> Result<TerrainConfig, ConfigError> {
        if self.map_size == 0 {
            return Err(ConfigError::InvalidMapSize(self.map_size));
        }

        let noise = self.noise.sanitized().to_params()?;

        if !(self.falloff.island_effect > 0.0 && self.falloff.island_effect.is_finite()) {
            return Err(ConfigError::InvalidIslandEffect(self.falloff.island_effect));
        }

        let bands = BandTable::new(self.bands)?;

        let shadow = &self.shadow;
        let mode: TracingMode = shadow.mode.parse()?;
        if !(0.0..=1.0).contains(&shadow.brightness_coef) {
            return Err(ConfigError::InvalidBrightness(shadow.brightness_coef));
        }
        if shadow.ray_steps == 0 {
            return Err(ConfigError::InvalidRaySteps);
        }
        if !(shadow.step_length > 0.0 && shadow.step_length.is_finite()) {
            return Err(ConfigError::InvalidStepLength(shadow.step_length));
        }
        for (field, value) in [
            ("sun_angle", shadow.sun_angle),
            ("sun_height", shadow.sun_height),
            ("orbit_factor", shadow.orbit_factor),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidSunPlacement { field, value });
            }
        }

        Ok(TerrainConfig {
            map_size: self.map_size,
            noise,
            falloff_enabled: self.falloff.enabled,
            island_effect: self.falloff.island_effect,
            bands,
            mode,
            trace: TraceSettings {
                ray_steps: shadow.ray_steps,
                step_length: shadow.step_length,
                brightness_coef: shadow.brightness_coef,
            },
            sun_angle: shadow.sun_angle,
            sun_height: shadow.sun_height,
            orbit_factor: shadow.orbit_factor,
            cpu_fallback: shadow.cpu_fallback,
        })
    }
}

/// Validated, immutable configuration consumed by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainConfig {
    map_size: usize,
    noise: NoiseParams,
    falloff_enabled: bool,
    island_effect: f32,
    bands: BandTable,
    mode: TracingMode,
    trace: TraceSettings,
    sun_angle: f32,
    sun_height: f32,
    orbit_factor: f32,
    cpu_fallback: bool,
}

impl TerrainConfig {
    pub fn map_size(&self) -> usize { self.map_size }
    pub fn noise(&self) -> &NoiseParams { &self.noise }
    /// Whether the falloff mask is subtracted from generated heights.
    pub fn falloff_enabled(&self) -> bool { self.falloff_enabled }
    /// Falloff exponent. Kept when the mask is disabled so it can still be previewed.
    pub fn island_effect(&self) -> f32 { self.island_effect }
    pub fn bands(&self) -> &BandTable { &self.bands }
    pub fn mode(&self) -> TracingMode { self.mode }
    pub fn trace(&self) -> &TraceSettings { &self.trace }
    pub fn sun_angle(&self) -> f32 { self.sun_angle }
    pub fn sun_height(&self) -> f32 { self.sun_height }
    pub fn orbit_factor(&self) -> f32 { self.orbit_factor }
    pub fn cpu_fallback(&self) -> bool { self.cpu_fallback }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = TerrainSettings::default().into_config().unwrap();
        assert_eq!(config.map_size(), DEFAULT_MAP_SIZE);
        assert_eq!(config.trace().ray_steps, 40);
        assert_eq!(config.trace().brightness_coef, 0.4);
        assert!(config.falloff_enabled());
        assert_eq!(config.island_effect(), 3.0);
    }

    #[test]
    fn test_noise_settings_are_clamped() {
        let mut settings = TerrainSettings::default();
        settings.noise.lacunarity = 0.3;
        settings.noise.octaves = -4;
        settings.noise.gain = 3.0;
        let config = settings.into_config().unwrap();
        assert_eq!(config.noise().lacunarity(), 1.0);
        assert_eq!(config.noise().octaves(), 0);
        assert_eq!(config.noise().gain(), 2.0);
    }

    #[test]
    fn test_unclamped_params_are_rejected() {
        let noise = NoiseSettings { lacunarity: 0.5, ..NoiseSettings::default() };
        assert_eq!(noise.to_params(), Err(ConfigError::InvalidLacunarity(0.5)));

        let noise = NoiseSettings { octaves: -1, ..NoiseSettings::default() };
        assert!(matches!(noise.to_params(), Err(ConfigError::InvalidOctaves { value: -1, .. })));
    }

    #[test]
    fn test_invalid_settings_fail_fast() {
        let mut settings = TerrainSettings::default();
        settings.bands.clear();
        assert_eq!(settings.into_config(), Err(ConfigError::EmptyBandTable));

        let mut settings = TerrainSettings::default();
        settings.bands.reverse();
        assert!(matches!(settings.into_config(), Err(ConfigError::UnsortedBandTable { .. })));

        let mut settings = TerrainSettings::default();
        settings.shadow.brightness_coef = 1.5;
        assert_eq!(settings.into_config(), Err(ConfigError::InvalidBrightness(1.5)));

        let mut settings = TerrainSettings::default();
        settings.shadow.ray_steps = 0;
        assert_eq!(settings.into_config(), Err(ConfigError::InvalidRaySteps));

        let mut settings = TerrainSettings::default();
        settings.falloff.island_effect = 0.0;
        assert_eq!(settings.into_config(), Err(ConfigError::InvalidIslandEffect(0.0)));

        let mut settings = TerrainSettings::default();
        settings.noise.frequency = 2.0;
        assert_eq!(settings.into_config(), Err(ConfigError::InvalidFrequency(2.0)));
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "map_size": 64,
                "noise": {{ "seed": 9, "fractal_type": "perlin_fractal" }},
                "bands": [
                    {{ "name": "water", "height": 0.0, "color": {{ "r": 0.0, "g": 0.0, "b": 1.0 }} }},
                    {{ "name": "land", "height": 0.5, "color": {{ "r": 0.0, "g": 1.0, "b": 0.0 }} }}
                ],
                "shadow": {{ "mode": "CPURayTracing", "sun_angle": 1.0 }}
            }}"#
        )
        .unwrap();

        let settings = TerrainSettings::load(file.path()).unwrap();
        assert_eq!(settings.map_size, 64);
        assert_eq!(settings.noise.seed, Some(9));
        assert_eq!(settings.noise.fractal_type, FractalType::PerlinFractal);
        assert_eq!(settings.noise.octaves, NoiseSettings::default().octaves);
        assert_eq!(settings.bands[1].color.a, 1.0);
        assert_eq!(settings.shadow.mode.parse::<TracingMode>().unwrap(), TracingMode::Sequential);
        assert!(settings.falloff.enabled);
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let settings = TerrainSettings::from_json(r#"{ "shadow": { "mode": "raster" } }"#).unwrap();
        assert_eq!(
            settings.into_config(),
            Err(ConfigError::UnknownTracingMode("raster".to_string()))
        );
    }

    #[test]
    fn test_mode_names_match_cli_parsing() {
        for name in ["none", "gpu-ray-tracing", "CPURayTracing", "accelerated"] {
            let json = format!(r#"{{ "shadow": {{ "mode": "{name}" }} }}"#);
            let config = TerrainSettings::from_json(&json).unwrap().into_config().unwrap();
            assert_eq!(config.mode(), name.parse::<TracingMode>().unwrap());
        }
    }

    #[test]
    fn test_seed_from_file_is_kept() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "map_size": 32, "noise": {{ "seed": 7 }} }}"#).unwrap();

        let mut settings = TerrainSettings::load(file.path()).unwrap();
        assert_eq!(settings.noise.resolve_seed(|| 99), 7);
        let config = settings.into_config().unwrap();
        assert_eq!(config.noise().seed(), 7);
    }

    #[test]
    fn test_missing_seed_is_picked_once() {
        let mut settings = TerrainSettings::from_json(r#"{ "map_size": 32 }"#).unwrap();
        assert_eq!(settings.noise.seed, None);
        assert_eq!(settings.noise.resolve_seed(|| 99), 99);
        assert_eq!(settings.noise.resolve_seed(|| 5), 99);
        assert_eq!(settings.into_config().unwrap().noise().seed(), 99);
    }

    #[test]
    fn test_disabled_falloff_keeps_effect() {
        let mut settings = TerrainSettings::default();
        settings.falloff.enabled = false;
        settings.falloff.island_effect = 4.5;
        let config = settings.into_config().unwrap();
        assert!(!config.falloff_enabled());
        assert_eq!(config.island_effect(), 4.5);
    }

    #[test]
    fn test_non_finite_sun_is_rejected() {
        let mut settings = TerrainSettings::default();
        settings.shadow.sun_angle = f32::NAN;
        assert!(matches!(
            settings.into_config(),
            Err(ConfigError::InvalidSunPlacement { field: "sun_angle", .. })
        ));

        let mut settings = TerrainSettings::default();
        settings.shadow.orbit_factor = f32::INFINITY;
        assert_eq!(
            settings.into_config(),
            Err(ConfigError::InvalidSunPlacement { field: "orbit_factor", value: f32::INFINITY })
        );
    }

    #[test]
    fn test_missing_file() {
        let err = TerrainSettings::load("/nonexistent/terrain.json").unwrap_err();
        assert!(matches!(err, TerrainError::ReadSettings { .. }));
    }

    #[test]
    fn test_json_roundtrip() {
        let settings = TerrainSettings::default();
        let json = settings.to_json().unwrap();
        assert_eq!(TerrainSettings::from_json(&json).unwrap(), settings);
    }
}
