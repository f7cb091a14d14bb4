//! Quality level validation per codec family.

use super::types::Codec;
use serde::Serialize;
use std::fmt;

/// Record of a quality value that was pulled back into range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityClamp {
    pub codec: Codec,
    pub original: u32,
    pub clamped: u32,
    pub min: u32,
    pub max: u32,
}

impl fmt::Display for QualityClamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quality {} is outside {}..={} for {}, clamped to {}",
            self.original, self.min, self.max, self.codec, self.clamped
        )
    }
}

/// Clamp a quality level into the codec family's range.
///
/// Out-of-range input is never an error; the returned clamp record is
/// carried on the plan as a warning.
pub fn clamp_quality(codec: Codec, quality: u32) -> (u32, Option<QualityClamp>) {
    let (min, max) = codec.quality_family().range();
    let clamped = quality.clamp(min, max);
    if clamped == quality {
        (quality, None)
    } else {
        (
            clamped,
            Some(QualityClamp {
                codec,
                original: quality,
                clamped,
                min,
                max,
            }),
        )
    }
}
