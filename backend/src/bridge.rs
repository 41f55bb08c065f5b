use std::{fmt::Debug, path::Path};

use log::debug;
use opencv::core::{MatTraitConst, Size};
use platforms::{Error as PlatformError, video::Video};

use crate::{Frame, Orientation, Result};

/// Sequential and seekable access to the frames of a video.
///
/// This is a bridge between the platform-specific video container and the analysis stages.
/// Implementations must guarantee that [`Self::seek`] followed by [`Self::read_next`] returns the
/// frame at the requested 0-based index when it exists.
pub trait FrameSource: Debug {
    /// Positions the source so that the next [`Self::read_next`] returns frame `index`.
    fn seek(&mut self, index: u32) -> Result<()>;

    /// Reads the next frame, [`None`] at end of stream.
    fn read_next(&mut self) -> Result<Option<Frame>>;

    /// Total number of frames as reported by the source.
    fn frame_count(&self) -> u32;

    /// Size of decoded frames.
    fn frame_size(&self) -> Size;

    fn orientation(&self) -> Orientation;
}

/// A [`FrameSource`] backed by a video file.
#[derive(Debug)]
pub struct DefaultFrameSource {
    video: Video,
    next_index: u32,
    frame_count: u32,
    frame_size: Size,
    orientation: Orientation,
}

impl DefaultFrameSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut video = Video::open(path)?;
        let frame_count = video.frame_count()?;
        let orientation = Orientation::from_degrees(video.orientation_meta()?);
        // The container size may not account for rotation so the first decoded frame is used
        let frame_size = match video.read()? {
            Some(mat) => mat.size()?,
            None => return Err(PlatformError::VideoEmpty(video.path().to_string()).into()),
        };
        video.seek(0)?;
        debug!(
            target: "video",
            "{frame_count} frames of {}x{} oriented {orientation}",
            frame_size.width, frame_size.height
        );

        Ok(Self {
            video,
            next_index: 0,
            frame_count,
            frame_size,
            orientation,
        })
    }
}

impl FrameSource for DefaultFrameSource {
    fn seek(&mut self, index: u32) -> Result<()> {
        self.video.seek(index)?;
        self.next_index = index;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        let Some(mat) = self.video.read()? else {
            return Ok(None);
        };
        let frame = Frame::new(self.next_index, mat);
        self.next_index += 1;
        Ok(Some(frame))
    }

    #[inline]
    fn frame_count(&self) -> u32 {
        self.frame_count
    }

    #[inline]
    fn frame_size(&self) -> Size {
        self.frame_size
    }

    #[inline]
    fn orientation(&self) -> Orientation {
        self.orientation
    }
}
