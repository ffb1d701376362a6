//! Host ray tracer. Cells are independent, so the march runs on the rayon pool.

use super::{march_ray, ShadowMap, Shading, ShadowTracer, SunState, TraceSettings};
use crate::bands::{BandTable, ColorBuffer};
use crate::error::TerrainError;
use crate::heightmap::HeightField;

#[derive(Clone, Debug, Default)]
pub struct SequentialTracer {
    settings: TraceSettings,
}

impl SequentialTracer {
    pub fn new(settings: TraceSettings) -> Self {
        Self { settings }
    }
}

impl ShadowTracer for SequentialTracer {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn trace(&self, heights: &HeightField, sun: &SunState) -> Result<ShadowMap, TerrainError> {
        let sun_pos = sun.position_3d;
        let settings = &self.settings;
        let occluded = heights.par_map(|x, y, _| march_ray(heights, x, y, sun_pos, settings));
        Ok(ShadowMap::new(occluded, settings.brightness_coef))
    }

    fn shade(
        &self,
        heights: &HeightField,
        _bands: &BandTable,
        colors: &mut ColorBuffer,
        sun: &SunState,
    ) -> Result<Shading, TerrainError> {
        let shadows = self.trace(heights, sun)?;
        shadows.apply(colors);
        tracing::debug!(shadowed = shadows.shadowed_count(), "cpu shading applied");
        Ok(Shading { shadows, image: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{Color, TerrainBand};
    use crate::tilemap::Tilemap;

    fn spike_field(size: usize, at: (usize, usize)) -> HeightField {
        let mut heights = Tilemap::new_with(size, size, 0.0f32);
        heights.set(at.0, at.1, 1.0);
        heights
    }

    #[test]
    fn test_spike_shadows_cells_away_from_sun() {
        let size = 32;
        let heights = spike_field(size, (16, 16));
        // theta = 0 puts the sun on +x at row 16.
        let sun = SunState::new(size, 1.5, SunState::DEFAULT_ORBIT_FACTOR, 0.0);
        let tracer = SequentialTracer::new(TraceSettings::default());
        let shadows = tracer.trace(&heights, &sun).unwrap();

        assert!(shadows.is_shadowed(15, 16));
        assert!(shadows.is_shadowed(10, 16));
        assert!(!shadows.is_shadowed(17, 16));
        assert!(!shadows.is_shadowed(16, 16));
        assert!(!shadows.is_shadowed(10, 5));
    }

    #[test]
    fn test_flat_field_has_no_shadows() {
        let heights = Tilemap::new_with(16, 16, 0.3f32);
        let sun = SunState::new(16, SunState::DEFAULT_HEIGHT, SunState::DEFAULT_ORBIT_FACTOR, 2.0);
        let shadows = SequentialTracer::default().trace(&heights, &sun).unwrap();
        assert_eq!(shadows.shadowed_count(), 0);
    }

    #[test]
    fn test_shade_darkens_in_place() {
        let size = 32;
        let heights = spike_field(size, (16, 16));
        let bands = BandTable::new(vec![TerrainBand::new("ground", 0.0, Color::rgb(1.0, 1.0, 1.0))]).unwrap();
        let mut colors = bands.color_map(&heights);
        let sun = SunState::new(size, 1.5, SunState::DEFAULT_ORBIT_FACTOR, 0.0);
        let tracer = SequentialTracer::new(TraceSettings { brightness_coef: 0.25, ..TraceSettings::default() });

        let shading = tracer.shade(&heights, &bands, &mut colors, &sun).unwrap();
        assert!(shading.image.is_none());
        assert!(shading.shadows.is_shadowed(15, 16));
        assert_eq!(*colors.get(15, 16), Color::rgb(0.25, 0.25, 0.25));
        assert_eq!(*colors.get(20, 16), Color::rgb(1.0, 1.0, 1.0));
    }
}
