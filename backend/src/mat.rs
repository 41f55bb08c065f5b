use anyhow::Result;
use opencv::core::{Mat, MatTraitConst, Size};

/// A decoded frame together with its 0-based index in the video.
///
/// Frames are owned by whichever stage is reading and are dropped once that stage moves past
/// them.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u32,
    pub mat: Mat,
}

impl Frame {
    #[inline]
    pub fn new(index: u32, mat: Mat) -> Self {
        Self { index, mat }
    }

    #[inline]
    pub fn size(&self) -> Result<Size> {
        Ok(self.mat.size()?)
    }
}
