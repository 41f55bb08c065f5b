use thiserror::Error;

mod bridge;
mod cancellation;
mod darkness;
mod debug;
mod detect;
mod ecs;
mod localize;
mod mat;
mod models;
mod motion;
mod region;
mod run;
mod tracker;
mod trajectory;

pub use {
    bridge::{DefaultFrameSource, FrameSource},
    cancellation::Cancellation,
    darkness::{Calibration, calibrate},
    debug::{LiveObserver, ManualSelector, Observer, RoiSelector},
    detect::{Circle, DefaultDetector, Detector},
    ecs::Resources,
    localize::{Localization, PADDING, localize, pad_bbox},
    mat::Frame,
    models::*,
    motion::{DetectionWindow, WINDOW_CAPACITY, detect_onset},
    region::{AreaOfInterest, RegionMask},
    run::{Analysis, analyze, run},
    tracker::{CsrtTracker, StopReason, TrackingOutcome, VisualTracker, track},
    trajectory::{JsonRecorder, TextRecorder, Trajectory, TrajectoryRecorder, recorder_for},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Analysis error.
///
/// Every variant aborts the run. Losing the particle while tracking is not an error and is
/// reported through [`StopReason::TrackerLost`] instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no frame reached the required darkness before the video ended")]
    NoQualifyingFrame,
    #[error("no particle visible at frame {0} to establish the baseline area")]
    NoBaselineArea(u32),
    #[error("video ended before the particle started moving")]
    SourceExhausted,
    #[error("particle not found, last analyzed frame {0}")]
    ParticleNotLocalized(u32),
    #[error("analysis was cancelled")]
    Cancelled,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Video(#[from] platforms::Error),
    #[error(transparent)]
    Primitive(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<opencv::Error> for Error {
    fn from(error: opencv::Error) -> Self {
        Error::Primitive(error.into())
    }
}
