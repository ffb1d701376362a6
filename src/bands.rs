//! Terrain bands: the step function from height to colour.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tilemap::Tilemap;

/// Linear RGBA colour with components in [0, 1].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default = "opaque")]
    pub a: f32,
}

fn opaque() -> f32 {
    1.0
}

impl Color {
    /// Left in cells no band claims.
    pub const UNSET: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    /// Scale the colour channels, leaving alpha alone.
    pub fn scaled(self, factor: f32) -> Self {
        Self::rgba(self.r * factor, self.g * factor, self.b * factor, self.a)
    }

    /// 8-bit unorm conversion, matching WGSL `pack4x8unorm`.
    pub fn to_rgba8(self) -> [u8; 4] {
        fn unorm(c: f32) -> u8 {
            (c.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [unorm(self.r), unorm(self.g), unorm(self.b), unorm(self.a)]
    }
}

/// Per-cell colours, same shape as the height field.
pub type ColorBuffer = Tilemap<Color>;

/// One step of the classification table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainBand {
    pub name: String,
    /// Lowest height (inclusive) that belongs to this band.
    pub height: f32,
    pub color: Color,
}

impl TerrainBand {
    pub fn new(name: impl Into<String>, height: f32, color: Color) -> Self {
        Self { name: name.into(), height, color }
    }
}

/// A non-empty band list sorted ascending by threshold.
///
/// A height maps to the last band whose threshold does not exceed it. Tables
/// that are empty or out of order are rejected instead of guessed at, since
/// the scan-and-overwrite rule only means "highest threshold wins" when the
/// thresholds ascend.
#[derive(Clone, Debug, PartialEq)]
pub struct BandTable {
    bands: Vec<TerrainBand>,
}

impl BandTable {
    pub fn new(bands: Vec<TerrainBand>) -> Result<Self, ConfigError> {
        if bands.is_empty() {
            return Err(ConfigError::EmptyBandTable);
        }
        for band in &bands {
            if !(0.0..=1.0).contains(&band.height) {
                return Err(ConfigError::BandThresholdOutOfRange {
                    name: band.name.clone(),
                    threshold: band.height,
                });
            }
        }
        for (index, pair) in bands.windows(2).enumerate() {
            if pair[1].height < pair[0].height {
                return Err(ConfigError::UnsortedBandTable {
                    index: index + 1,
                    name: pair[1].name.clone(),
                    previous: pair[0].height,
                    threshold: pair[1].height,
                });
            }
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[TerrainBand] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Index of the band for `height`, or `None` below the first threshold.
    pub fn classify_index(&self, height: f32) -> Option<usize> {
        // Equal thresholds resolve to the later entry.
        self.bands.partition_point(|b| b.height <= height).checked_sub(1)
    }

    pub fn classify(&self, height: f32) -> Option<&TerrainBand> {
        self.classify_index(height).map(|i| &self.bands[i])
    }

    pub fn color_for(&self, height: f32) -> Color {
        self.classify(height).map_or(Color::UNSET, |b| b.color)
    }

    /// Colour every cell of a height field.
    pub fn color_map(&self, heights: &Tilemap<f32>) -> ColorBuffer {
        heights.par_map(|_, _, &h| self.color_for(h))
    }
}

/// The palette used when no band table is configured.
pub fn default_bands() -> Vec<TerrainBand> {
    vec![
        TerrainBand::new("deep water", 0.0, Color::rgb(0.10, 0.22, 0.55)),
        TerrainBand::new("shallow water", 0.30, Color::rgb(0.16, 0.38, 0.74)),
        TerrainBand::new("sand", 0.40, Color::rgb(0.87, 0.82, 0.55)),
        TerrainBand::new("grass", 0.45, Color::rgb(0.33, 0.62, 0.20)),
        TerrainBand::new("forest", 0.60, Color::rgb(0.20, 0.42, 0.15)),
        TerrainBand::new("rock", 0.75, Color::rgb(0.45, 0.38, 0.33)),
        TerrainBand::new("snow", 0.90, Color::rgb(0.95, 0.95, 0.97)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_bands() -> BandTable {
        BandTable::new(vec![
            TerrainBand::new("water", 0.0, Color::rgb(0.0, 0.0, 1.0)),
            TerrainBand::new("sand", 0.4, Color::rgb(1.0, 1.0, 0.0)),
            TerrainBand::new("grass", 0.7, Color::rgb(0.0, 1.0, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_highest_threshold_not_exceeding_wins() {
        let table = three_bands();
        assert_eq!(table.classify(0.5).unwrap().name, "sand");
        assert_eq!(table.classify(0.8).unwrap().name, "grass");
        assert_eq!(table.classify(0.0).unwrap().name, "water");
        assert_eq!(table.classify(0.4).unwrap().name, "sand");
        assert_eq!(table.classify(1.0).unwrap().name, "grass");
    }

    #[test]
    fn test_below_first_threshold_is_unset() {
        let table = BandTable::new(vec![TerrainBand::new("land", 0.2, Color::rgb(1.0, 0.0, 0.0))]).unwrap();
        assert!(table.classify(0.1).is_none());
        assert_eq!(table.color_for(0.1), Color::UNSET);
    }

    #[test]
    fn test_equal_thresholds_take_later_band() {
        let table = BandTable::new(vec![
            TerrainBand::new("a", 0.0, Color::rgb(1.0, 0.0, 0.0)),
            TerrainBand::new("b", 0.0, Color::rgb(0.0, 1.0, 0.0)),
        ])
        .unwrap();
        assert_eq!(table.classify(0.0).unwrap().name, "b");
    }

    #[test]
    fn test_rejects_empty_and_unsorted() {
        assert_eq!(BandTable::new(Vec::new()), Err(ConfigError::EmptyBandTable));

        let unsorted = BandTable::new(vec![
            TerrainBand::new("grass", 0.7, Color::rgb(0.0, 1.0, 0.0)),
            TerrainBand::new("water", 0.0, Color::rgb(0.0, 0.0, 1.0)),
        ]);
        assert!(matches!(unsorted, Err(ConfigError::UnsortedBandTable { index: 1, .. })));

        let out_of_range = BandTable::new(vec![TerrainBand::new("sky", 1.5, Color::rgb(1.0, 1.0, 1.0))]);
        assert!(matches!(out_of_range, Err(ConfigError::BandThresholdOutOfRange { .. })));
    }

    #[test]
    fn test_color_map_shape() {
        let table = three_bands();
        let mut heights = Tilemap::new_with(3, 2, 0.0f32);
        heights.set(1, 0, 0.5);
        heights.set(2, 1, 0.9);
        let colors = table.color_map(&heights);
        assert_eq!((colors.width, colors.height), (3, 2));
        assert_eq!(*colors.get(0, 0), Color::rgb(0.0, 0.0, 1.0));
        assert_eq!(*colors.get(1, 0), Color::rgb(1.0, 1.0, 0.0));
        assert_eq!(*colors.get(2, 1), Color::rgb(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_default_bands_are_valid() {
        assert!(BandTable::new(default_bands()).is_ok());
    }

    #[test]
    fn test_scaled_keeps_alpha() {
        let c = Color::rgba(0.5, 1.0, 0.25, 0.8).scaled(0.4);
        assert_eq!(c.a, 0.8);
        assert!((c.g - 0.4).abs() < 1e-6);
    }
}
