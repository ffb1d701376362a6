//! Island terrain generation library
//!
//! Fractal noise heightmaps shaped by an island falloff mask, coloured by
//! height bands and shaded by ray-marched sun shadows on the CPU or GPU.

pub mod bands;
pub mod config;
pub mod error;
pub mod export;
pub mod falloff;
pub mod heightmap;
pub mod noise_field;
pub mod pipeline;
pub mod shadow;
pub mod tilemap;

pub use config::{TerrainConfig, TerrainSettings};
pub use error::{ConfigError, TerrainError};
pub use pipeline::{TerrainPipeline, TileResult};
