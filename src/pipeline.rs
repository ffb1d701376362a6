//! Tile generation pipeline.
//!
//! Settings → noise field → height field (with optional falloff) → band
//! colours → shadow tracing → [`TileResult`].

use image::RgbaImage;

use crate::bands::ColorBuffer;
use crate::config::TerrainConfig;
use crate::error::{ConfigError, TerrainError};
use crate::falloff::FalloffMask;
use crate::heightmap::{classify, HeightField, HeightFieldBuilder, TileOffset};
use crate::noise_field::NoiseField;
use crate::shadow::{ComputeProgram, ParallelTracer, SequentialTracer, ShadowTracer, SunState, TracingMode};

/// Everything produced for one tile.
pub struct TileResult {
    pub offset: TileOffset,
    pub heights: HeightField,
    /// Band colours. Darkened in place by the CPU tracer; left as classified
    /// when the GPU produced `rendered`.
    pub colors: ColorBuffer,
    /// Finished image from the GPU tracer, which shades and colours in one pass.
    pub rendered: Option<RgbaImage>,
    /// Cells found in shadow, when a tracer ran.
    pub shadowed: Option<usize>,
}

impl TileResult {
    pub fn size(&self) -> usize {
        self.heights.width
    }

    /// True when `rendered` should be shown instead of `colors`.
    pub fn is_prerendered(&self) -> bool {
        self.rendered.is_some()
    }
}

/// Generates tiles from a validated configuration.
pub struct TerrainPipeline {
    config: TerrainConfig,
    noise: NoiseField,
    falloff: FalloffMask,
    tracer: Option<Box<dyn ShadowTracer>>,
    sun: SunState,
}

impl TerrainPipeline {
    /// Set up noise, falloff, sun and tracer.
    ///
    /// `program` is only consulted in GPU mode, where its absence is a
    /// configuration error raised before any device is touched.
    pub fn new(config: TerrainConfig, program: Option<ComputeProgram>) -> Result<Self, TerrainError> {
        let size = config.map_size();
        let noise = NoiseField::new(config.noise().clone());
        let falloff = FalloffMask::generate(size, config.island_effect())?;
        let tracer = select_tracer(&config, program)?;
        let sun = SunState::new(size, config.sun_height(), config.orbit_factor(), config.sun_angle());

        tracing::info!(
            size,
            seed = config.noise().seed(),
            mode = %config.mode(),
            tracer = tracer.as_ref().map_or("none", |t| t.name()),
            falloff = config.falloff_enabled(),
            "terrain pipeline ready"
        );

        Ok(Self { config, noise, falloff, tracer, sun })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn sun(&self) -> &SunState {
        &self.sun
    }

    /// Move the sun. Later calls to [`generate`](Self::generate) use the new position.
    pub fn set_sun_position(&mut self, theta: f32) {
        self.sun.set_position(theta);
    }

    /// Replace the sun outright, e.g. with [`SunState::fixed`].
    pub fn set_sun(&mut self, sun: SunState) {
        self.sun = sun;
    }

    /// The island mask for the configured effect. Built even when it is not
    /// applied to heights, so it can be drawn on its own.
    pub fn falloff_mask(&self) -> &FalloffMask {
        &self.falloff
    }

    /// Name of the active tracer, if any.
    pub fn tracer_name(&self) -> Option<&'static str> {
        self.tracer.as_ref().map(|t| t.name())
    }

    /// Generate the tile whose (0, 0) cell sits at `offset` in world space.
    pub fn generate(&self, offset: TileOffset) -> Result<TileResult, TerrainError> {
        let heights = HeightFieldBuilder::new(self.config.map_size(), &self.noise)
            .with_falloff(self.config.falloff_enabled().then_some(&self.falloff))
            .build(offset)?;
        self.finish_tile(offset, heights)
    }

    /// Classify and shade an existing height field.
    pub fn finish_tile(&self, offset: TileOffset, heights: HeightField) -> Result<TileResult, TerrainError> {
        let mut colors = classify(&heights, self.config.bands());

        let (rendered, shadowed) = match &self.tracer {
            None => (None, None),
            Some(tracer) => {
                let shading = tracer.shade(&heights, self.config.bands(), &mut colors, &self.sun)?;
                (shading.image, Some(shading.shadows.shadowed_count()))
            }
        };

        if let Some((min_h, max_h)) = heights.min_max() {
            tracing::info!(
                x = offset.x,
                y = offset.y,
                min_h,
                max_h,
                shadowed = shadowed.unwrap_or(0),
                prerendered = rendered.is_some(),
                "tile generated"
            );
        }

        Ok(TileResult { offset, heights, colors, rendered, shadowed })
    }
}

/// Pick the tracer for the configured mode.
fn select_tracer(
    config: &TerrainConfig,
    program: Option<ComputeProgram>,
) -> Result<Option<Box<dyn ShadowTracer>>, TerrainError> {
    let settings = *config.trace();
    match config.mode() {
        TracingMode::Basic => Ok(None),
        TracingMode::Sequential => Ok(Some(Box::new(SequentialTracer::new(settings)))),
        TracingMode::Accelerated => {
            let program = program.ok_or(ConfigError::MissingAcceleratorProgram)?;
            match ParallelTracer::new(&program, settings) {
                Ok(tracer) => {
                    tracing::info!(adapter = tracer.adapter_name(), "using GPU shadow tracing");
                    Ok(Some(Box::new(tracer)))
                }
                Err(TerrainError::AcceleratorUnavailable) if config.cpu_fallback() => {
                    tracing::warn!("GPU not available, using CPU shadow tracing");
                    Ok(Some(Box::new(SequentialTracer::new(settings))))
                }
                Err(e) => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{Color, TerrainBand};
    use crate::config::TerrainSettings;
    use crate::tilemap::Tilemap;

    const COLOR_A: Color = Color::rgb(0.2, 0.6, 0.3);

    fn settings(size: usize, mode: TracingMode) -> TerrainSettings {
        let mut settings = TerrainSettings::default();
        settings.map_size = size;
        settings.noise.seed = Some(1234);
        settings.noise.frequency = 0.05;
        settings.shadow.mode = mode.to_string();
        settings
    }

    #[test]
    fn test_flat_tile_overhead_sun_is_fully_lit() {
        let mut settings = settings(4, TracingMode::Sequential);
        settings.falloff.enabled = false;
        settings.bands = vec![TerrainBand::new("a", 0.0, COLOR_A)];
        let mut pipeline = TerrainPipeline::new(settings.into_config().unwrap(), None).unwrap();
        pipeline.set_sun(SunState::fixed(4, [2.0, 10.0, 2.0]));

        let tile = pipeline
            .finish_tile(TileOffset::ORIGIN, Tilemap::new_with(4, 4, 0.0f32))
            .unwrap();

        assert_eq!(tile.shadowed, Some(0));
        assert!(tile.rendered.is_none());
        assert!(tile.colors.as_slice().iter().all(|&c| c == COLOR_A));
    }

    #[test]
    fn test_basic_mode_has_no_shading() {
        let pipeline = TerrainPipeline::new(settings(32, TracingMode::Basic).into_config().unwrap(), None).unwrap();
        let tile = pipeline.generate(TileOffset::ORIGIN).unwrap();
        assert_eq!(tile.size(), 32);
        assert!(tile.shadowed.is_none());
        assert!(!tile.is_prerendered());
        for (x, y, c) in tile.colors.iter() {
            assert_eq!(*c, pipeline.config().bands().color_for(*tile.heights.get(x, y)));
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let config = settings(24, TracingMode::Sequential).into_config().unwrap();
        let a = TerrainPipeline::new(config.clone(), None).unwrap().generate(TileOffset::new(5, -3)).unwrap();
        let b = TerrainPipeline::new(config, None).unwrap().generate(TileOffset::new(5, -3)).unwrap();
        assert_eq!(a.heights, b.heights);
        assert_eq!(a.colors, b.colors);
        assert_eq!(a.shadowed, b.shadowed);
    }

    #[test]
    fn test_sequential_shading_only_darkens() {
        let config = settings(48, TracingMode::Sequential).into_config().unwrap();
        let basic = {
            let mut s = settings(48, TracingMode::Basic);
            s.shadow.sun_angle = 0.0;
            TerrainPipeline::new(s.into_config().unwrap(), None).unwrap()
        };
        let shaded = TerrainPipeline::new(config, None).unwrap().generate(TileOffset::ORIGIN).unwrap();
        let plain = basic.generate(TileOffset::ORIGIN).unwrap();
        for ((_, _, s), (_, _, p)) in shaded.colors.iter().zip(plain.colors.iter()) {
            assert!(*s == *p || *s == p.scaled(0.4));
        }
    }

    #[test]
    fn test_gpu_mode_without_program_fails_before_dispatch() {
        let config = settings(16, TracingMode::Accelerated).into_config().unwrap();
        let err = TerrainPipeline::new(config, None).err().unwrap();
        assert!(matches!(err, TerrainError::Config(ConfigError::MissingAcceleratorProgram)));
    }

    #[test]
    fn test_gpu_mode_with_fallback_produces_tile() {
        let config = settings(16, TracingMode::Accelerated).into_config().unwrap();
        let pipeline = TerrainPipeline::new(config, Some(ComputeProgram::builtin())).unwrap();
        let tile = pipeline.generate(TileOffset::ORIGIN).unwrap();
        assert!(tile.shadowed.is_some());
        match pipeline.tracer_name() {
            Some("gpu") => assert!(tile.is_prerendered()),
            Some("cpu") => assert!(!tile.is_prerendered()),
            other => panic!("unexpected tracer {other:?}"),
        }
    }

    #[test]
    fn test_disabled_falloff_still_has_mask() {
        let mut settings = settings(16, TracingMode::Basic);
        settings.falloff.enabled = false;
        settings.falloff.island_effect = 2.0;
        let pipeline = TerrainPipeline::new(settings.into_config().unwrap(), None).unwrap();

        let mask = pipeline.falloff_mask();
        assert_eq!(mask.size(), 16);
        assert_eq!(mask.get(0, 0), 1.0);
        assert_eq!(mask.get(8, 8), 0.0);

        // Heights are the raw noise, so the border is not forced to zero.
        let tile = pipeline.generate(TileOffset::ORIGIN).unwrap();
        let noise = NoiseField::new(pipeline.config().noise().clone());
        assert_eq!(*tile.heights.get(0, 0), noise.sample_height(0, 0));
    }

    #[test]
    fn test_set_sun_position_is_used() {
        let mut pipeline =
            TerrainPipeline::new(settings(16, TracingMode::Sequential).into_config().unwrap(), None).unwrap();
        pipeline.set_sun_position(1.0);
        let first = *pipeline.sun();
        pipeline.set_sun_position(1.0);
        assert_eq!(*pipeline.sun(), first);
        assert_eq!(pipeline.sun().theta, 1.0);
    }
}
