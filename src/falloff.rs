//! Island falloff mask.
//!
//! The mask is 0 at the tile centre and rises to 1 at the border, so
//! subtracting it from the height field sinks the edges below the water band.

use crate::error::ConfigError;
use crate::tilemap::Tilemap;

/// Shape constant of the falloff curve; larger values push the rise further
/// out towards the border.
const FALLOFF_SHIFT: f32 = 2.2;

/// Precomputed falloff values for one tile size.
#[derive(Clone, Debug, PartialEq)]
pub struct FalloffMask {
    values: Tilemap<f32>,
}

impl FalloffMask {
    /// Build a `size`x`size` mask. `island_effect` is the curve exponent;
    /// higher values give a flatter interior and a steeper edge.
    pub fn generate(size: usize, island_effect: f32) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidMapSize(size));
        }
        if !(island_effect > 0.0 && island_effect.is_finite()) {
            return Err(ConfigError::InvalidIslandEffect(island_effect));
        }

        let values = Tilemap::par_from_fn(size, size, |x, y| {
            falloff_curve(edge_distance(x, y, size), island_effect)
        });

        Ok(Self { values })
    }

    pub fn size(&self) -> usize {
        self.values.width
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        *self.values.get(x, y)
    }
}

/// Normalized square distance of a cell from the tile centre, in [0, 1].
pub fn edge_distance(x: usize, y: usize, size: usize) -> f32 {
    let nx = (x as f32 * 2.0 / size as f32 - 1.0).abs();
    let ny = (y as f32 * 2.0 / size as f32 - 1.0).abs();
    nx.max(ny).min(1.0)
}

/// `d^a / (d^a + (b - b*d)^a)`: 0 at d = 0, 1 at d = 1, increasing between.
pub fn falloff_curve(d: f32, island_effect: f32) -> f32 {
    let d = d.clamp(0.0, 1.0);
    let a = island_effect;
    let near = d.powf(a);
    let far = (FALLOFF_SHIFT - FALLOFF_SHIFT * d).powf(a);
    let denom = near + far;
    if denom <= 0.0 {
        return 0.0;
    }
    (near / denom).clamp(0.0, 1.0)
}
