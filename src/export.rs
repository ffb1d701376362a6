//! PNG output for generated tiles.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};

use crate::bands::ColorBuffer;
use crate::falloff::FalloffMask;
use crate::heightmap::HeightField;
use crate::pipeline::TileResult;

/// What to draw for a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrawMode {
    /// Grayscale heights.
    Noise,
    /// Band colours, shaded when a tracer ran.
    #[default]
    Colour,
    /// Grayscale island mask.
    Falloff,
}

impl DrawMode {
    pub fn all() -> &'static [DrawMode] {
        &[DrawMode::Noise, DrawMode::Colour, DrawMode::Falloff]
    }
}

impl fmt::Display for DrawMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawMode::Noise => write!(f, "noise"),
            DrawMode::Colour => write!(f, "colour"),
            DrawMode::Falloff => write!(f, "falloff"),
        }
    }
}

impl FromStr for DrawMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noise" | "noisemap" => Ok(DrawMode::Noise),
            "colour" | "color" | "colourmap" | "colormap" => Ok(DrawMode::Colour),
            "falloff" | "falloffmap" => Ok(DrawMode::Falloff),
            other => Err(format!("unknown draw mode '{other}' (expected noise, colour or falloff)")),
        }
    }
}

fn to_gray(v: f32) -> Luma<u8> {
    Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
}

/// Heights in [0, 1] as an 8-bit grayscale image.
pub fn height_image(heights: &HeightField) -> GrayImage {
    ImageBuffer::from_fn(heights.width as u32, heights.height as u32, |x, y| {
        to_gray(*heights.get(x as usize, y as usize))
    })
}

pub fn falloff_image(mask: &FalloffMask) -> GrayImage {
    let size = mask.size() as u32;
    ImageBuffer::from_fn(size, size, |x, y| to_gray(mask.get(x as usize, y as usize)))
}

pub fn color_image(colors: &ColorBuffer) -> RgbaImage {
    ImageBuffer::from_fn(colors.width as u32, colors.height as u32, |x, y| {
        Rgba(colors.get(x as usize, y as usize).to_rgba8())
    })
}

/// Render `tile` in the given mode. `Falloff` draws `mask` whether or not it
/// was applied to the tile's heights.
pub fn tile_image(tile: &TileResult, mode: DrawMode, mask: &FalloffMask) -> RgbaImage {
    match mode {
        DrawMode::Noise => gray_to_rgba(&height_image(&tile.heights)),
        DrawMode::Colour => match &tile.rendered {
            Some(image) => image.clone(),
            None => color_image(&tile.colors),
        },
        DrawMode::Falloff => gray_to_rgba(&falloff_image(mask)),
    }
}

fn gray_to_rgba(gray: &GrayImage) -> RgbaImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let Luma([v]) = *gray.get_pixel(x, y);
        Rgba([v, v, v, 255])
    })
}

pub fn save_png(image: &RgbaImage, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
    let path = path.as_ref();
    image.save_with_format(path, image::ImageFormat::Png)?;
    tracing::info!(path = %path.display(), width = image.width(), height = image.height(), "image written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::Color;
    use crate::heightmap::TileOffset;
    use crate::tilemap::Tilemap;

    fn mask(size: usize) -> FalloffMask {
        FalloffMask::generate(size, 3.0).unwrap()
    }

    fn tile(size: usize) -> TileResult {
        let mut heights = Tilemap::new_with(size, size, 0.0f32);
        heights.set(1, 0, 1.0);
        TileResult {
            offset: TileOffset::ORIGIN,
            heights,
            colors: Tilemap::new_with(size, size, Color::rgb(1.0, 0.0, 0.0)),
            rendered: None,
            shadowed: None,
        }
    }

    #[test]
    fn test_draw_mode_parsing() {
        assert_eq!("noise".parse::<DrawMode>().unwrap(), DrawMode::Noise);
        assert_eq!("ColourMap".parse::<DrawMode>().unwrap(), DrawMode::Colour);
        assert_eq!("color".parse::<DrawMode>().unwrap(), DrawMode::Colour);
        assert_eq!("falloff".parse::<DrawMode>().unwrap(), DrawMode::Falloff);
        assert!("mesh".parse::<DrawMode>().is_err());
        for mode in DrawMode::all() {
            assert_eq!(mode.to_string().parse::<DrawMode>().unwrap(), *mode);
        }
    }

    #[test]
    fn test_noise_image_is_grayscale_heights() {
        let image = tile_image(&tile(4), DrawMode::Noise, &mask(4));
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(*image.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*image.get_pixel(1, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_colour_prefers_rendered_image() {
        let mut t = tile(4);
        assert_eq!(*tile_image(&t, DrawMode::Colour, &mask(4)).get_pixel(2, 2), Rgba([255, 0, 0, 255]));

        t.rendered = Some(ImageBuffer::from_pixel(4, 4, Rgba([0, 0, 255, 255])));
        assert_eq!(*tile_image(&t, DrawMode::Colour, &mask(4)).get_pixel(2, 2), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_falloff_image() {
        let image = tile_image(&tile(8), DrawMode::Falloff, &mask(8));
        assert_eq!(*image.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert!(image.get_pixel(4, 4)[0] < 10);
    }

    #[test]
    fn test_falloff_preview_when_not_applied() {
        use crate::config::TerrainSettings;
        use crate::pipeline::TerrainPipeline;

        let mut settings = TerrainSettings::default();
        settings.map_size = 8;
        settings.falloff.enabled = false;
        settings.falloff.island_effect = 3.0;
        let pipeline = TerrainPipeline::new(settings.into_config().unwrap(), None).unwrap();
        let tile = pipeline.generate(TileOffset::ORIGIN).unwrap();

        let image = tile_image(&tile, DrawMode::Falloff, pipeline.falloff_mask());
        assert_eq!(image, tile_image(&tile, DrawMode::Falloff, &mask(8)));
        assert_eq!(*image.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_save_png_round_trips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        save_png(&color_image(&tile(6).colors), &path).unwrap();
        let loaded = image::open(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (6, 6));
    }
}
