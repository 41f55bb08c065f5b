use std::path::Path;

use log::debug;
use opencv::{
    core::{Mat, MatTraitConst},
    videoio::{
        CAP_ANY, CAP_PROP_FRAME_COUNT, CAP_PROP_ORIENTATION_META, CAP_PROP_POS_FRAMES,
        VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst,
    },
};

use crate::{Error, Result};

/// A seekable handle to a video file.
///
/// Frames are decoded with the rotation from the container metadata already applied, so
/// [`Self::orientation_meta`] tells whether spatial coordinates need to be re-expressed.
#[derive(Debug)]
pub struct Video {
    capture: VideoCapture,
    path: String,
}

impl Video {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let capture = VideoCapture::from_file(&path, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(Error::VideoNotOpened(path));
        }
        debug!(target: "video", "opened {path}");

        Ok(Self { capture, path })
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Positions the decoder so that the next [`Self::read`] returns frame `index`.
    pub fn seek(&mut self, index: u32) -> Result<()> {
        if !self.capture.set(CAP_PROP_POS_FRAMES, index as f64)? {
            return Err(Error::SeekFailed(index));
        }
        Ok(())
    }

    /// Decodes the next frame, [`None`] at end of stream.
    pub fn read(&mut self) -> Result<Option<Mat>> {
        let mut mat = Mat::default();
        if !self.capture.read(&mut mat)? {
            return Ok(None);
        }
        if mat.empty() {
            return Err(Error::ReadFailed);
        }
        Ok(Some(mat))
    }

    pub fn frame_count(&self) -> Result<u32> {
        Ok(self.capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as u32)
    }

    /// Rotation in degrees stored in the container metadata.
    pub fn orientation_meta(&self) -> Result<f64> {
        Ok(self.capture.get(CAP_PROP_ORIENTATION_META)?)
    }
}
