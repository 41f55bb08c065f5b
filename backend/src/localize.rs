use log::{debug, error, info};
use opencv::core::Rect;

use crate::{Error, Frame, FrameSource, RegionMask, Result, detect::Detector, ecs::Resources};

/// Units the detected circle's bounding box is expanded by.
pub const PADDING: i32 = 4;

/// The particle's initial bounding box and the frame it was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Localization {
    pub bbox: Rect,
    pub frame: u32,
}

#[derive(Debug)]
enum Attempts {
    Found(Localization, Frame),
    Exhausted { last_frame: u32 },
}

/// Shifts `bbox` up-left by `delta` and grows its size by `delta`.
///
/// Growth is independent of the shift, so the box extends `delta` past the original top-left
/// corner but not past the bottom-right one.
#[inline]
pub fn pad_bbox(bbox: Rect, delta: i32) -> Rect {
    Rect::new(
        bbox.x - delta,
        bbox.y - delta,
        bbox.width + delta,
        bbox.height + delta,
    )
}

/// Finds the particle from `start_frame`, advancing one frame per failed attempt.
///
/// A circle outside `mask` counts as a failed attempt. Fails with
/// [`Error::ParticleNotLocalized`] carrying the last analyzed frame once `max_attempts` frames
/// failed or the video ended.
pub fn localize(
    resources: &Resources,
    source: &mut dyn FrameSource,
    start_frame: u32,
    mask: &RegionMask,
    max_attempts: u32,
) -> Result<Localization> {
    match attempt_frames(resources, source, start_frame, mask, max_attempts)? {
        Attempts::Found(localization, frame) => {
            info!(
                target: "localize",
                "particle found at frame {} in {:?}",
                localization.frame, localization.bbox
            );
            if let Some(observer) = resources.observer.as_ref() {
                observer.on_localized(&frame, localization.bbox);
            }
            Ok(localization)
        }
        Attempts::Exhausted { last_frame } => {
            error!(target: "localize", "particle not found, last analyzed frame {last_frame}");
            Err(Error::ParticleNotLocalized(last_frame))
        }
    }
}

fn attempt_frames(
    resources: &Resources,
    source: &mut dyn FrameSource,
    start_frame: u32,
    mask: &RegionMask,
    max_attempts: u32,
) -> Result<Attempts> {
    let mut last_frame = start_frame;
    for index in (start_frame..).take(max_attempts as usize) {
        resources.cancellation.check()?;
        source.seek(index)?;
        let Some(frame) = source.read_next()? else {
            info!(target: "localize", "video ended at frame {index}");
            break;
        };
        last_frame = frame.index;

        if let Some(bbox) = locate(resources.detector.as_ref(), &frame, mask)? {
            let localization = Localization {
                bbox,
                frame: frame.index,
            };
            return Ok(Attempts::Found(localization, frame));
        }
        info!(
            target: "localize",
            "particle not found at frame {index}, next {}",
            index + 1
        );
    }
    Ok(Attempts::Exhausted { last_frame })
}

fn locate(detector: &dyn Detector, frame: &Frame, mask: &RegionMask) -> Result<Option<Rect>> {
    let grayscale = mask.apply(&detector.grayscale(&frame.mat)?)?;
    let Some(circle) = detector.detect_circle(&grayscale)? else {
        return Ok(None);
    };
    if !mask.contains(circle.center) {
        debug!(target: "localize", "ignoring {circle:?} outside the area of interest");
        return Ok(None);
    }
    let bounds = detector.circle_bounds(frame.size()?, circle)?;
    debug!(target: "localize", "{circle:?} bounded by {bounds:?}");
    Ok(Some(pad_bbox(bounds, PADDING)))
}
