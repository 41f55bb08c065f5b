use log::{info, warn};

use crate::{
    AreaOfInterest, Calibration, Cancellation, CsrtTracker, DefaultDetector, DefaultFrameSource,
    Error, FrameSource, LiveObserver, Localization, RegionMask, Result, RoiSelector, Settings,
    TrackingOutcome, TrajectoryRecorder, VisualTracker, calibrate, detect_onset, ecs::Resources,
    localize, recorder_for, track,
};

/// The results of every stage of a run.
#[derive(Debug)]
pub struct Analysis {
    /// [`None`] when started from [`Settings::start_frame`].
    pub calibration: Option<Calibration>,
    /// [`None`] when started from [`Settings::start_frame`].
    pub onset: Option<u32>,
    pub localization: Localization,
    /// Whether [`Self::localization`] was selected by the user.
    pub manually_localized: bool,
    pub outcome: TrackingOutcome,
}

/// Runs calibration, motion onset, localization and tracking in order on `source`.
pub fn analyze(
    resources: &Resources,
    source: &mut dyn FrameSource,
    settings: &Settings,
    tracker: &mut dyn VisualTracker,
) -> Result<Analysis> {
    let area = AreaOfInterest::from_pairs(&settings.area_points)?;

    let (calibration, orientation) = match settings.start_frame {
        Some(frame) => {
            info!(target: "pipeline", "starting from frame {frame}");
            (None, source.orientation())
        }
        None => {
            let calibration = calibrate(
                resources,
                source,
                settings.darkness_fraction,
                settings.dark_intensity,
            )?;
            (Some(calibration), calibration.orientation)
        }
    };
    let mask = RegionMask::new(&area.oriented(orientation), source.frame_size())?;

    let onset = match calibration {
        Some(calibration) => Some(detect_onset(resources, source, calibration.frame, &mask)?),
        None => None,
    };
    let localize_from = onset.or(settings.start_frame).unwrap_or_default();

    let (localization, manually_localized) = match localize(
        resources,
        source,
        localize_from,
        &mask,
        settings.max_localize_attempts,
    ) {
        Ok(localization) => (localization, false),
        Err(Error::ParticleNotLocalized(last_frame)) if resources.selector.is_some() => {
            (select_manually(resources, source, last_frame)?, true)
        }
        Err(err) => return Err(err),
    };

    let outcome = track(
        resources,
        source,
        tracker,
        localization,
        orientation,
        settings.frame_limit,
    )?;

    Ok(Analysis {
        calibration,
        onset,
        localization,
        manually_localized,
        outcome,
    })
}

fn select_manually(
    resources: &Resources,
    source: &mut dyn FrameSource,
    last_frame: u32,
) -> Result<Localization> {
    let not_localized = Error::ParticleNotLocalized(last_frame);
    let Some(selector) = resources.selector.as_ref() else {
        return Err(not_localized);
    };
    source.seek(last_frame)?;
    let Some(frame) = source.read_next()? else {
        return Err(not_localized);
    };

    warn!(target: "pipeline", "asking for manual selection at frame {}", frame.index);
    match selector.select(&frame)? {
        Some(bbox) => Ok(Localization {
            bbox,
            frame: frame.index,
        }),
        None => Err(not_localized),
    }
}

/// Opens the video in `settings`, analyzes it and records the trajectory when requested.
pub fn run(settings: &Settings, cancellation: Cancellation) -> Result<Analysis> {
    settings.validate()?;

    let mut source = DefaultFrameSource::open(&settings.video_path)?;
    let mut resources = Resources::new(Box::new(DefaultDetector::new()?));
    resources.cancellation = cancellation;
    if settings.live {
        resources.observer = Some(Box::new(LiveObserver::new()?));
    }
    if settings.manual_fallback {
        resources.selector = Some(Box::new(RoiSelector));
    }
    let mut tracker = CsrtTracker::default();

    let analysis = analyze(&resources, &mut source, settings, &mut tracker)?;
    if let Some(path) = settings.output.as_ref() {
        recorder_for(settings.output_format, path)?.record(&analysis.outcome)?;
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use opencv::core::{Point, Rect, Size};

    use super::*;
    use crate::{
        Circle, Orientation, StopReason, bridge::tests::VecFrameSource, debug::MockManualSelector,
        detect::MockDetector, tracker::MockVisualTracker,
    };

    fn settings() -> Settings {
        Settings {
            area_points: vec![[0, 0], [39, 0], [39, 39], [0, 39]],
            ..Settings::default()
        }
    }

    fn circle_detector(found: bool) -> MockDetector {
        let mut detector = MockDetector::default();
        detector.expect_grayscale().returning(|frame| Ok(frame.clone()));
        detector.expect_detect_circle().returning(move |_| {
            Ok(found.then_some(Circle {
                center: Point::new(20, 20),
                radius: 5,
            }))
        });
        detector
            .expect_circle_bounds()
            .returning(|_, _| Ok(Rect::new(14, 14, 13, 13)));
        detector
    }

    fn still_tracker() -> MockVisualTracker {
        let mut tracker = MockVisualTracker::default();
        tracker.expect_init().once().returning(|_, _| Ok(()));
        tracker
            .expect_update()
            .returning(|_| Ok(Some(Rect::new(10, 10, 17, 17))));
        tracker
    }

    #[test]
    fn analyze_runs_every_stage_in_order() {
        let mut detector = circle_detector(true);
        let mut dark_calls = 0;
        detector.expect_dark_pixels().returning(move |_, _| {
            dark_calls += 1;
            Ok(if dark_calls <= 2 { 0 } else { 40 * 40 })
        });
        detector.expect_enhance().returning(|frame| Ok(frame.clone()));
        detector.expect_accumulate().returning(|_| Ok(opencv::core::Mat::default()));
        let mut area_calls = 0;
        detector.expect_foreground_area().returning(move |_| {
            area_calls += 1;
            Ok(Some(if area_calls == 1 { 10.0 } else { 25.0 }))
        });
        let resources = Resources::new_test(detector);
        let mut source = VecFrameSource::blank(20, Size::new(40, 40));

        let analysis = analyze(&resources, &mut source, &settings(), &mut still_tracker()).unwrap();

        assert_eq!(analysis.calibration.map(|calibration| calibration.frame), Some(2));
        assert_eq!(analysis.onset, Some(2));
        assert_eq!(analysis.localization.frame, 2);
        assert_eq!(analysis.localization.bbox, Rect::new(10, 10, 17, 17));
        assert!(!analysis.manually_localized);
        assert_eq!(analysis.outcome.stop_reason, StopReason::EndOfVideo);
        assert_eq!(analysis.outcome.trajectory.len(), 18);
    }

    #[test]
    fn analyze_from_start_frame_skips_calibration_and_onset() {
        let resources = Resources::new_test(circle_detector(true));
        let mut source = VecFrameSource::blank(10, Size::new(40, 40));
        let settings = Settings {
            start_frame: Some(3),
            frame_limit: 8,
            ..settings()
        };

        let analysis = analyze(&resources, &mut source, &settings, &mut still_tracker()).unwrap();

        assert!(analysis.calibration.is_none());
        assert!(analysis.onset.is_none());
        assert_eq!(analysis.localization.frame, 3);
        assert_eq!(analysis.outcome.stop_reason, StopReason::FrameLimitReached);
        assert_eq!(analysis.outcome.trajectory.len(), 5);
    }

    #[test]
    fn analyze_falls_back_to_manual_selection() {
        let mut resources = Resources::new_test(circle_detector(false));
        let mut selector = MockManualSelector::default();
        selector
            .expect_select()
            .withf(|frame| frame.index == 4)
            .once()
            .returning(|_| Ok(Some(Rect::new(1, 2, 3, 4))));
        resources.selector = Some(Box::new(selector));
        let mut source = VecFrameSource::blank(10, Size::new(40, 40));
        let settings = Settings {
            start_frame: Some(3),
            max_localize_attempts: 2,
            ..settings()
        };

        let analysis = analyze(&resources, &mut source, &settings, &mut still_tracker()).unwrap();

        assert!(analysis.manually_localized);
        assert_eq!(
            analysis.localization,
            Localization {
                bbox: Rect::new(1, 2, 3, 4),
                frame: 4
            }
        );
    }

    #[test]
    fn analyze_fails_without_manual_selection() {
        let resources = Resources::new_test(circle_detector(false));
        let mut source = VecFrameSource::blank(10, Size::new(40, 40));
        let settings = Settings {
            start_frame: Some(3),
            ..settings()
        };
        let mut tracker = MockVisualTracker::default();
        tracker.expect_init().never();

        assert!(matches!(
            analyze(&resources, &mut source, &settings, &mut tracker),
            Err(Error::ParticleNotLocalized(9))
        ));
    }

    #[test]
    fn analyze_fails_when_selection_is_empty() {
        let mut resources = Resources::new_test(circle_detector(false));
        let mut selector = MockManualSelector::default();
        selector.expect_select().once().returning(|_| Ok(None));
        resources.selector = Some(Box::new(selector));
        let mut source = VecFrameSource::blank(10, Size::new(40, 40));
        let settings = Settings {
            start_frame: Some(0),
            max_localize_attempts: 1,
            ..settings()
        };

        assert!(matches!(
            analyze(
                &resources,
                &mut source,
                &settings,
                &mut MockVisualTracker::default()
            ),
            Err(Error::ParticleNotLocalized(0))
        ));
    }

    #[test]
    fn analyze_masks_with_area_swapped_for_quarter_turn() {
        let mut detector = MockDetector::default();
        detector.expect_grayscale().returning(|frame| Ok(frame.clone()));
        // Inside the unswapped wide strip first, then inside the swapped tall strip
        let mut circles = [Point::new(20, 5), Point::new(5, 20)].into_iter();
        detector.expect_detect_circle().returning(move |_| {
            Ok(circles.next().map(|center| Circle { center, radius: 3 }))
        });
        detector
            .expect_circle_bounds()
            .withf(|_, circle| circle.center == Point::new(5, 20))
            .once()
            .returning(|_, _| Ok(Rect::new(5, 16, 8, 8)));
        let resources = Resources::new_test(detector);
        let mut source = VecFrameSource::blank(10, Size::new(40, 40))
            .with_orientation(Orientation::Deg90);
        let settings = Settings {
            area_points: vec![[0, 0], [29, 0], [29, 9], [0, 9]],
            start_frame: Some(0),
            frame_limit: 3,
            ..Settings::default()
        };

        let analysis = analyze(&resources, &mut source, &settings, &mut still_tracker()).unwrap();

        assert_eq!(analysis.localization.frame, 1);
        assert_eq!(analysis.localization.bbox, Rect::new(1, 12, 12, 12));
        assert!(!analysis.manually_localized);
    }
}
