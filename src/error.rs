//! Error types for terrain generation.
//!
//! Configuration problems are always reported before any heavy computation
//! starts. Numeric degeneracies (zero octaves, a sun sitting exactly on a
//! cell, rays leaving the tile) are resolved locally and never surface here.

use std::path::PathBuf;

/// Invalid or missing configuration, detected at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("band table is empty; every cell would keep the unset colour")]
    EmptyBandTable,

    #[error("band '{name}' (index {index}) has threshold {threshold} below the previous threshold {previous}; bands must be sorted ascending")]
    UnsortedBandTable {
        index: usize,
        name: String,
        previous: f32,
        threshold: f32,
    },

    #[error("band '{name}' has threshold {threshold} outside [0, 1]")]
    BandThresholdOutOfRange { name: String, threshold: f32 },

    #[error("unknown tracing mode '{0}' (expected basic, cpu or gpu)")]
    UnknownTracingMode(String),

    #[error("accelerated tracing selected but no compute program was supplied")]
    MissingAcceleratorProgram,

    #[error("map size must be positive, got {0}")]
    InvalidMapSize(usize),

    #[error("noise frequency must be in (0, 1], got {0}")]
    InvalidFrequency(f64),

    #[error("lacunarity must be >= 1, got {0}")]
    InvalidLacunarity(f64),

    #[error("octaves must be in [0, {max}], got {value}")]
    InvalidOctaves { value: i64, max: u32 },

    #[error("gain must be in [0, 2], got {0}")]
    InvalidGain(f64),

    #[error("noise scale must be positive, got {0}")]
    InvalidNoiseScale(f64),

    #[error("island effect must be positive, got {0}")]
    InvalidIslandEffect(f32),

    #[error("brightness coefficient must be in [0, 1], got {0}")]
    InvalidBrightness(f32),

    #[error("ray step count must be positive")]
    InvalidRaySteps,

    #[error("ray step length must be positive, got {0}")]
    InvalidStepLength(f32),

    #[error("sun {field} must be finite, got {value}")]
    InvalidSunPlacement { field: &'static str, value: f32 },

    #[error("falloff mask is {mask}x{mask} but the tile is {tile}x{tile}")]
    FalloffSizeMismatch { mask: usize, tile: usize },
}

/// Everything that can stop a tile from being produced.
#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to read settings from {path}: {source}")]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    ParseSettings(#[from] serde_json::Error),

    #[error("failed to read compute program {path}: {source}")]
    ReadProgram {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no compatible GPU adapter is available")]
    AcceleratorUnavailable,

    #[error("accelerator error: {0}")]
    Accelerator(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl TerrainError {
    /// True for errors that describe bad input rather than a runtime failure.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ParseSettings(_))
    }
}
