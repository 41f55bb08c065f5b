use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use log::info;
use opencv::core::{Point, Rect};
use serde::Serialize;

use crate::{Orientation, Result, StopReason, TrackingOutcome, TrajectoryFormat};

/// Tracked particle centers, one per tracked frame in processing order.
///
/// Points are expressed in the coordinate frame of the video orientation, so a quarter-turn video
/// records `(y, x)` for a box centered at `(x, y)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trajectory {
    start_frame: u32,
    orientation: Orientation,
    points: Vec<Point>,
}

impl Trajectory {
    pub fn new(start_frame: u32, orientation: Orientation) -> Self {
        Self {
            start_frame,
            orientation,
            points: Vec::new(),
        }
    }

    /// Appends the center of `bbox`.
    pub fn record(&mut self, bbox: Rect) {
        let center = Point::new((2 * bbox.x + bbox.width) / 2, (2 * bbox.y + bbox.height) / 2);
        self.points.push(self.orientation.normalize(center));
    }

    #[inline]
    pub fn start_frame(&self) -> u32 {
        self.start_frame
    }

    #[inline]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The frame index the `i`-th point was recorded at.
    pub fn frame_of(&self, i: usize) -> Option<u32> {
        (i < self.points.len()).then(|| self.start_frame + i as u32)
    }

    /// The frame index of the last point.
    pub fn last_frame(&self) -> Option<u32> {
        self.frame_of(self.points.len().checked_sub(1)?)
    }

    /// Points converted back to decoded frame coordinates for drawing.
    pub fn frame_points(&self) -> Vec<Point> {
        self.points
            .iter()
            .map(|point| self.orientation.normalize(*point))
            .collect()
    }
}

/// Persists a finished [`TrackingOutcome`].
pub trait TrajectoryRecorder {
    fn record(&mut self, outcome: &TrackingOutcome) -> Result<()>;
}

/// Writes one `x y` line per point.
#[derive(Debug)]
pub struct TextRecorder<W> {
    writer: W,
}

impl<W: Write> TextRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TrajectoryRecorder for TextRecorder<W> {
    fn record(&mut self, outcome: &TrackingOutcome) -> Result<()> {
        for point in outcome.trajectory.points() {
            writeln!(self.writer, "{} {}", point.x, point.y)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct TrajectoryDocument {
    start_frame: u32,
    orientation: u32,
    stop_reason: StopReason,
    points: Vec<[i32; 2]>,
}

/// Writes a JSON document with the points and how tracking stopped.
#[derive(Debug)]
pub struct JsonRecorder<W> {
    writer: W,
}

impl<W: Write> JsonRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TrajectoryRecorder for JsonRecorder<W> {
    fn record(&mut self, outcome: &TrackingOutcome) -> Result<()> {
        let trajectory = &outcome.trajectory;
        let document = TrajectoryDocument {
            start_frame: trajectory.start_frame(),
            orientation: trajectory.orientation().degrees(),
            stop_reason: outcome.stop_reason,
            points: trajectory
                .points()
                .iter()
                .map(|point| [point.x, point.y])
                .collect(),
        };
        serde_json::to_writer_pretty(&mut self.writer, &document)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Creates the file at `path` and a recorder writing `format` to it.
pub fn recorder_for(
    format: TrajectoryFormat,
    path: impl AsRef<Path>,
) -> Result<Box<dyn TrajectoryRecorder>> {
    let path = path.as_ref();
    let writer = BufWriter::new(File::create(path)?);
    info!(target: "pipeline", "recording {format} trajectory to {}", path.display());
    Ok(match format {
        TrajectoryFormat::Text => Box::new(TextRecorder::new(writer)),
        TrajectoryFormat::Json => Box::new(JsonRecorder::new(writer)),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn outcome(orientation: Orientation) -> TrackingOutcome {
        let mut trajectory = Trajectory::new(12, orientation);
        trajectory.record(Rect::new(10, 20, 6, 4));
        trajectory.record(Rect::new(11, 22, 7, 5));
        TrackingOutcome {
            trajectory,
            stop_reason: StopReason::EndOfVideo,
        }
    }

    #[test]
    fn record_appends_oriented_centers() {
        let outcome = outcome(Orientation::Deg90);
        let trajectory = &outcome.trajectory;

        assert_eq!(trajectory.points(), &[Point::new(22, 13), Point::new(24, 14)]);
        assert_eq!(
            trajectory.frame_points(),
            vec![Point::new(13, 22), Point::new(14, 24)]
        );
        assert_eq!(trajectory.frame_of(1), Some(13));
        assert_eq!(trajectory.frame_of(2), None);
        assert_eq!(trajectory.last_frame(), Some(13));
        assert_eq!(Trajectory::new(3, Orientation::Deg0).last_frame(), None);
    }

    #[test]
    fn text_recorder_writes_one_line_per_point() {
        let mut recorder = TextRecorder::new(Vec::new());

        recorder.record(&outcome(Orientation::Deg0)).unwrap();

        let text = String::from_utf8(recorder.into_inner()).unwrap();
        assert_eq!(text, "13 22\n14 24\n");
    }

    #[test]
    fn json_recorder_writes_document() {
        let mut recorder = JsonRecorder::new(Vec::new());

        recorder.record(&outcome(Orientation::Deg0)).unwrap();

        let value = serde_json::from_slice::<Value>(&recorder.into_inner()).unwrap();
        assert_eq!(
            value,
            json!({
                "start_frame": 12,
                "orientation": 0,
                "stop_reason": "EndOfVideo",
                "points": [[13, 22], [14, 24]],
            })
        );
    }
}
