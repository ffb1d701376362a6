//! Height field construction for one tile.

use crate::bands::{BandTable, ColorBuffer};
use crate::error::ConfigError;
use crate::falloff::FalloffMask;
use crate::noise_field::NoiseField;
use crate::tilemap::Tilemap;

/// Height samples in [0, 1], `size`x`size`.
pub type HeightField = Tilemap<f32>;

/// World-space position of a tile's (0, 0) cell.
///
/// Noise is sampled at `offset + local index`, so tiles placed one edge
/// length apart line up without seams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileOffset {
    pub x: i64,
    pub y: i64,
}

impl TileOffset {
    pub const ORIGIN: TileOffset = TileOffset { x: 0, y: 0 };

    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Offset of the tile at grid position (`col`, `row`) for tiles of `size`.
    pub fn of_tile(col: i64, row: i64, size: usize) -> Self {
        Self::new(col * size as i64, row * size as i64)
    }
}

/// Combines a noise field and an optional falloff mask into a height field.
pub struct HeightFieldBuilder<'a> {
    size: usize,
    noise: &'a NoiseField,
    falloff: Option<&'a FalloffMask>,
}

impl<'a> HeightFieldBuilder<'a> {
    pub fn new(size: usize, noise: &'a NoiseField) -> Self {
        Self { size, noise, falloff: None }
    }

    /// Subtract `mask` from every sample. The mask must match the tile size.
    pub fn with_falloff(mut self, mask: Option<&'a FalloffMask>) -> Self {
        self.falloff = mask;
        self
    }

    pub fn build(&self, offset: TileOffset) -> Result<HeightField, ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::InvalidMapSize(self.size));
        }
        if let Some(mask) = self.falloff {
            if mask.size() != self.size {
                return Err(ConfigError::FalloffSizeMismatch { mask: mask.size(), tile: self.size });
            }
        }

        let noise = self.noise;
        let falloff = self.falloff;
        Ok(Tilemap::par_from_fn(self.size, self.size, move |x, y| {
            let h = noise.sample_height(offset.x + x as i64, offset.y + y as i64);
            match falloff {
                Some(mask) => (h - mask.get(x, y)).clamp(0.0, 1.0),
                None => h,
            }
        }))
    }
}

/// Classify every height into its band colour.
pub fn classify(heights: &HeightField, bands: &BandTable) -> ColorBuffer {
    bands.color_map(heights)
}
