use std::fmt;

use anyhow::bail;
use log::{debug, info, warn};
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{Mat, Ptr, Rect},
    prelude::*,
    tracking::TrackerCSRT,
};
use serde::Serialize;
use strum::Display;

use crate::{
    FrameSource, Localization, Orientation, Result, Trajectory, ecs::Resources, transition,
    transition_if, try_some_transition,
};

/// Why tracking stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
pub enum StopReason {
    /// No frame after the last tracked one.
    EndOfVideo,
    /// The frame limit was read.
    FrameLimitReached,
    /// The visual tracker could not follow the particle.
    TrackerLost,
}

/// The particle tracking states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Particle {
    /// Initializes the visual tracker on the start frame.
    Initialized,
    /// Records the center of the current box then updates it with the next frame.
    Tracking(Rect),
    /// Terminal state.
    Stopped(StopReason),
}

#[derive(Debug)]
pub struct ParticleContext {
    start_frame: u32,
    initial_bbox: Rect,
    frame_limit: u32,
    trajectory: Trajectory,
}

#[derive(Debug)]
pub struct ParticleEntity {
    pub state: Particle,
    pub context: ParticleContext,
}

/// The trajectory of a finished tracking run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingOutcome {
    pub trajectory: Trajectory,
    pub stop_reason: StopReason,
}

/// A stateful single-object visual tracker.
#[cfg_attr(test, automock)]
pub trait VisualTracker: fmt::Debug {
    fn init(&mut self, frame: &Mat, bbox: Rect) -> anyhow::Result<()>;

    /// Follows the object into `frame`, [`None`] when it is lost.
    fn update(&mut self, frame: &Mat) -> anyhow::Result<Option<Rect>>;
}

/// A [`VisualTracker`] backed by OpenCV's CSRT tracker.
#[derive(Default)]
pub struct CsrtTracker {
    inner: Option<Ptr<TrackerCSRT>>,
}

impl fmt::Debug for CsrtTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrtTracker")
            .field("initialized", &self.inner.is_some())
            .finish()
    }
}

impl VisualTracker for CsrtTracker {
    fn init(&mut self, frame: &Mat, bbox: Rect) -> anyhow::Result<()> {
        let mut tracker = TrackerCSRT::create_def()?;
        tracker.init(frame, bbox)?;
        self.inner = Some(tracker);
        Ok(())
    }

    fn update(&mut self, frame: &Mat) -> anyhow::Result<Option<Rect>> {
        let Some(tracker) = self.inner.as_mut() else {
            bail!("tracker is not initialized")
        };
        let mut bbox = Rect::default();
        Ok(tracker.update(frame, &mut bbox)?.then_some(bbox))
    }
}

/// Tracks the particle from `localization` until a [`StopReason`].
///
/// Each tracked frame records the center of the box before it is updated with the next frame,
/// so the first point is the center of the localized box and point `i` belongs to frame
/// `localization.frame + i`. A `frame_limit` of `0` tracks until the video ends.
pub fn track(
    resources: &Resources,
    source: &mut dyn FrameSource,
    tracker: &mut dyn VisualTracker,
    localization: Localization,
    orientation: Orientation,
    frame_limit: u32,
) -> Result<TrackingOutcome> {
    let mut particle = ParticleEntity {
        state: Particle::Initialized,
        context: ParticleContext {
            start_frame: localization.frame,
            initial_bbox: localization.bbox,
            frame_limit,
            trajectory: Trajectory::new(localization.frame, orientation),
        },
    };
    loop {
        run_system(resources, &mut particle, source, tracker)?;
        if let Particle::Stopped(stop_reason) = particle.state {
            let trajectory = particle.context.trajectory;
            info!(
                target: "tracker",
                "tracking stopped with {stop_reason} after {} points",
                trajectory.len()
            );
            return Ok(TrackingOutcome {
                trajectory,
                stop_reason,
            });
        }
    }
}

fn run_system(
    resources: &Resources,
    particle: &mut ParticleEntity,
    source: &mut dyn FrameSource,
    tracker: &mut dyn VisualTracker,
) -> Result<()> {
    resources.cancellation.check()?;
    match particle.state {
        Particle::Initialized => update_initialized_state(particle, source, tracker),
        Particle::Tracking(bbox) => {
            update_tracking_state(resources, particle, bbox, source, tracker)
        }
        Particle::Stopped(_) => Ok(()),
    }
}

fn update_initialized_state(
    particle: &mut ParticleEntity,
    source: &mut dyn FrameSource,
    tracker: &mut dyn VisualTracker,
) -> Result<()> {
    let ParticleContext {
        start_frame,
        initial_bbox,
        frame_limit,
        ..
    } = particle.context;
    transition_if!(
        particle,
        Particle::Stopped(StopReason::FrameLimitReached),
        frame_limit != 0 && start_frame >= frame_limit
    );

    source.seek(start_frame)?;
    let frame = try_some_transition!(
        particle,
        Particle::Stopped(StopReason::EndOfVideo),
        source.read_next()?
    );
    tracker.init(&frame.mat, initial_bbox)?;
    transition!(particle, Particle::Tracking(initial_bbox), {
        debug!(target: "tracker", "initialized at frame {start_frame} with {initial_bbox:?}");
    })
}

fn update_tracking_state(
    resources: &Resources,
    particle: &mut ParticleEntity,
    bbox: Rect,
    source: &mut dyn FrameSource,
    tracker: &mut dyn VisualTracker,
) -> Result<()> {
    particle.context.trajectory.record(bbox);

    let frame = try_some_transition!(
        particle,
        Particle::Stopped(StopReason::EndOfVideo),
        source.read_next()?
    );
    let frame_limit = particle.context.frame_limit;
    transition_if!(
        particle,
        Particle::Stopped(StopReason::FrameLimitReached),
        frame_limit != 0 && frame.index >= frame_limit
    );
    let bbox = try_some_transition!(
        particle,
        Particle::Stopped(StopReason::TrackerLost),
        tracker.update(&frame.mat)?,
        {
            warn!(target: "tracker", "particle lost at frame {}", frame.index);
        }
    );
    debug!(target: "tracker", "frame {} tracked at {bbox:?}", frame.index);

    if let Some(observer) = resources.observer.as_ref() {
        observer.on_tracked(&frame, bbox, &particle.context.trajectory);
    }
    transition!(particle, Particle::Tracking(bbox))
}

#[cfg(test)]
mod tests {
    use opencv::core::{Point, Size};

    use super::*;
    use crate::{
        Error, bridge::tests::VecFrameSource, debug::MockObserver, detect::MockDetector,
    };

    fn localization(frame: u32) -> Localization {
        Localization {
            bbox: Rect::new(10, 20, 6, 4),
            frame,
        }
    }

    /// A tracker moving the box one unit right per update.
    fn drifting_tracker() -> MockVisualTracker {
        let mut tracker = MockVisualTracker::default();
        tracker.expect_init().once().returning(|_, _| Ok(()));
        let mut updates = 0;
        tracker.expect_update().returning(move |_| {
            updates += 1;
            Ok(Some(Rect::new(10 + updates, 20, 6, 4)))
        });
        tracker
    }

    fn resources() -> Resources {
        Resources::new_test(MockDetector::default())
    }

    #[test]
    fn track_until_end_of_video() {
        let mut source = VecFrameSource::blank(10, Size::new(32, 32));
        let mut tracker = drifting_tracker();

        let outcome = track(
            &resources(),
            &mut source,
            &mut tracker,
            localization(2),
            Orientation::Deg0,
            0,
        )
        .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::EndOfVideo);
        assert_eq!(outcome.trajectory.len(), 8);
        assert_eq!(outcome.trajectory.last_frame(), Some(9));
        assert_eq!(
            &outcome.trajectory.points()[..3],
            &[Point::new(13, 22), Point::new(14, 22), Point::new(15, 22)]
        );
    }

    #[test]
    fn track_stops_before_frame_limit() {
        let mut source = VecFrameSource::blank(10, Size::new(32, 32));
        let mut tracker = MockVisualTracker::default();
        tracker.expect_init().once().returning(|_, _| Ok(()));
        tracker
            .expect_update()
            .times(3)
            .returning(|_| Ok(Some(Rect::new(10, 20, 6, 4))));

        let outcome = track(
            &resources(),
            &mut source,
            &mut tracker,
            localization(2),
            Orientation::Deg0,
            6,
        )
        .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::FrameLimitReached);
        assert_eq!(outcome.trajectory.len(), 4);
        assert!(outcome.trajectory.last_frame().is_some_and(|frame| frame < 6));
    }

    #[test]
    fn track_nothing_when_starting_past_frame_limit() {
        let mut source = VecFrameSource::blank(10, Size::new(32, 32));
        let mut tracker = MockVisualTracker::default();
        tracker.expect_init().never();

        let outcome = track(
            &resources(),
            &mut source,
            &mut tracker,
            localization(6),
            Orientation::Deg0,
            6,
        )
        .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::FrameLimitReached);
        assert!(outcome.trajectory.is_empty());
        assert_eq!(source.reads(), 0);
    }

    #[test]
    fn track_keeps_points_before_loss() {
        let mut source = VecFrameSource::blank(10, Size::new(32, 32));
        let mut tracker = MockVisualTracker::default();
        tracker.expect_init().once().returning(|_, _| Ok(()));
        let mut updates = [Some(Rect::new(11, 20, 6, 4)), Some(Rect::new(12, 20, 6, 4)), None]
            .into_iter();
        tracker
            .expect_update()
            .times(3)
            .returning(move |_| Ok(updates.next().flatten()));
        let mut observer = MockObserver::default();
        observer
            .expect_on_tracked()
            .times(2)
            .withf(|frame, _, trajectory| trajectory.len() as u32 == frame.index)
            .return_const(());
        let resources = resources().with_observer(observer);

        let outcome = track(
            &resources,
            &mut source,
            &mut tracker,
            localization(0),
            Orientation::Deg0,
            0,
        )
        .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::TrackerLost);
        assert_eq!(
            outcome.trajectory.points(),
            &[Point::new(13, 22), Point::new(14, 22), Point::new(15, 22)]
        );
    }

    #[test]
    fn track_swaps_axes_for_quarter_turn() {
        let mut source = VecFrameSource::blank(3, Size::new(32, 32));
        let mut tracker = drifting_tracker();

        let outcome = track(
            &resources(),
            &mut source,
            &mut tracker,
            localization(0),
            Orientation::Deg90,
            0,
        )
        .unwrap();

        assert_eq!(
            outcome.trajectory.points(),
            &[Point::new(22, 13), Point::new(22, 14), Point::new(22, 15)]
        );
    }

    #[test]
    fn track_end_of_video_at_start_frame() {
        let mut source = VecFrameSource::blank(5, Size::new(32, 32));
        let mut tracker = MockVisualTracker::default();
        tracker.expect_init().never();

        let outcome = track(
            &resources(),
            &mut source,
            &mut tracker,
            localization(20),
            Orientation::Deg0,
            0,
        )
        .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::EndOfVideo);
        assert!(outcome.trajectory.is_empty());
    }

    #[test]
    fn track_stops_when_cancelled() {
        let mut source = VecFrameSource::blank(5, Size::new(32, 32));
        let mut tracker = MockVisualTracker::default();
        let resources = resources();
        resources.cancellation.cancel();

        assert!(matches!(
            track(
                &resources,
                &mut source,
                &mut tracker,
                localization(0),
                Orientation::Deg0,
                0,
            ),
            Err(Error::Cancelled)
        ));
    }
}
