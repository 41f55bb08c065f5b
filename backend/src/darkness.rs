use log::{debug, error, info};

use crate::{Error, FrameSource, Orientation, Result, ecs::Resources};

/// The frame where ambient lighting has stabilized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Calibration {
    pub frame: u32,
    pub orientation: Orientation,
}

/// Scans `source` from the start for the first frame where at least `darkness_fraction` of its
/// pixels have intensity below `dark_intensity`.
///
/// The required dark pixel count is relative to the frame resolution.
pub fn calibrate(
    resources: &Resources,
    source: &mut dyn FrameSource,
    darkness_fraction: f64,
    dark_intensity: u8,
) -> Result<Calibration> {
    source.seek(0)?;
    loop {
        resources.cancellation.check()?;
        let Some(frame) = source.read_next()? else {
            error!(target: "darkness", "video ended before reaching {darkness_fraction} darkness");
            return Err(Error::NoQualifyingFrame);
        };

        let size = frame.size()?;
        let required = darkness_fraction * size.area() as f64;
        let grayscale = resources.detector.grayscale(&frame.mat)?;
        let dark = resources.detector.dark_pixels(&grayscale, dark_intensity)?;
        debug!(target: "darkness", "frame {} has {dark} / {required:.0} dark pixels", frame.index);

        if dark as f64 >= required {
            let calibration = Calibration {
                frame: frame.index,
                orientation: source.orientation(),
            };
            info!(
                target: "darkness",
                "lighting stable at frame {} oriented {}",
                calibration.frame, calibration.orientation
            );
            return Ok(calibration);
        }
    }
}
