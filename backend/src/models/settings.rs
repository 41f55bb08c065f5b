use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::deserialize_with_ok_or_default;
use crate::{Error, Result};

/// Parameters of a single analysis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// The video to analyze, may be given on the command line instead.
    #[serde(default)]
    pub video_path: PathBuf,
    /// Vertices of the area of interest in unrotated frame coordinates.
    #[serde(default = "area_points_default")]
    pub area_points: Vec<[i32; 2]>,
    /// Minimum proportion of a frame's pixels that must be dark for lighting to be stable.
    #[serde(default = "darkness_fraction_default")]
    pub darkness_fraction: f64,
    /// Exclusive upper intensity bound of a dark pixel.
    #[serde(default = "dark_intensity_default")]
    pub dark_intensity: u8,
    #[serde(default = "max_localize_attempts_default")]
    pub max_localize_attempts: u32,
    /// Starts localization at this frame instead of calibrating and detecting motion onset.
    #[serde(default)]
    pub start_frame: Option<u32>,
    /// Stops tracking upon reading this frame, `0` tracks until the video ends.
    #[serde(default)]
    pub frame_limit: u32,
    /// Shows tracking in real-time.
    #[serde(default)]
    pub live: bool,
    /// Lets the user select the particle when it can't be found automatically.
    #[serde(default)]
    pub manual_fallback: bool,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_with_ok_or_default")]
    pub output_format: TrajectoryFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            video_path: PathBuf::default(),
            area_points: area_points_default(),
            darkness_fraction: darkness_fraction_default(),
            dark_intensity: dark_intensity_default(),
            max_localize_attempts: max_localize_attempts_default(),
            start_frame: None,
            frame_limit: 0,
            live: false,
            manual_fallback: false,
            output: None,
            output_format: TrajectoryFormat::default(),
        }
    }
}

impl Settings {
    /// Rejects settings that can never produce a valid run.
    pub fn validate(&self) -> Result<()> {
        if !(self.darkness_fraction > 0.0 && self.darkness_fraction <= 1.0) {
            return Err(Error::InvalidSettings(format!(
                "darkness fraction {} is outside (0, 1]",
                self.darkness_fraction
            )));
        }
        if self.area_points.len() < 3 {
            return Err(Error::InvalidSettings(format!(
                "area of interest needs at least 3 vertices, got {}",
                self.area_points.len()
            )));
        }
        if self.max_localize_attempts == 0 {
            return Err(Error::InvalidSettings(
                "at least one localization attempt is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn area_points_default() -> Vec<[i32; 2]> {
    vec![[1201, 697], [1201, 381], [767, 381], [767, 697]]
}

fn darkness_fraction_default() -> f64 {
    0.97
}

fn dark_intensity_default() -> u8 {
    35
}

fn max_localize_attempts_default() -> u32 {
    10
}

/// On-disk layout of a recorded trajectory.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum TrajectoryFormat {
    /// One `x y` line per tracked frame.
    #[default]
    Text,
    Json,
}
