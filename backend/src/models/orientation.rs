use opencv::core::Point;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Rotation of a video as stored in its container metadata.
///
/// Decoded frames arrive already rotated, so a quarter-turn video has its horizontal and
/// vertical axes swapped relative to the coordinates it was recorded in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    #[strum(to_string = "0°")]
    Deg0,
    #[strum(to_string = "90°")]
    Deg90,
    #[strum(to_string = "180°")]
    Deg180,
    #[strum(to_string = "270°")]
    Deg270,
}

impl Orientation {
    /// Maps metadata `degrees` to the nearest quarter turn.
    pub fn from_degrees(degrees: f64) -> Self {
        if !degrees.is_finite() {
            return Orientation::Deg0;
        }
        match ((degrees / 90.0).round() as i64).rem_euclid(4) {
            0 => Orientation::Deg0,
            1 => Orientation::Deg90,
            2 => Orientation::Deg180,
            _ => Orientation::Deg270,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }

    #[inline]
    pub fn swaps_axes(self) -> bool {
        matches!(self, Orientation::Deg90 | Orientation::Deg270)
    }

    /// Re-expresses `point` in the coordinate frame of this orientation.
    ///
    /// Applying it twice returns the original point.
    #[inline]
    pub fn normalize(self, point: Point) -> Point {
        if self.swaps_axes() {
            Point::new(point.y, point.x)
        } else {
            point
        }
    }
}
