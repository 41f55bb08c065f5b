use std::collections::VecDeque;

use log::{debug, error, info};
use opencv::core::Mat;

use crate::{Error, FrameSource, RegionMask, Result, ecs::Resources};

/// Number of consecutive binarized frames accumulated to detect motion.
pub const WINDOW_CAPACITY: usize = 5;

/// A fixed-capacity FIFO of the last binarized frames and their indices.
///
/// Indices are strictly increasing from the oldest to the newest entry.
#[derive(Debug, Default)]
pub struct DetectionWindow {
    binaries: VecDeque<Mat>,
    indices: VecDeque<u32>,
}

impl DetectionWindow {
    pub fn new() -> Self {
        Self {
            binaries: VecDeque::with_capacity(WINDOW_CAPACITY),
            indices: VecDeque::with_capacity(WINDOW_CAPACITY),
        }
    }

    /// Appends `binary` of frame `index`, evicting the oldest entry when full.
    pub fn push(&mut self, index: u32, binary: Mat) {
        debug_assert!(self.indices.back().is_none_or(|last| *last < index));
        if self.is_full() {
            self.evict();
        }
        self.binaries.push_back(binary);
        self.indices.push_back(index);
    }

    /// Removes the oldest entry and returns its index.
    pub fn evict(&mut self) -> Option<u32> {
        self.binaries.pop_front();
        self.indices.pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == WINDOW_CAPACITY
    }

    pub fn oldest_index(&self) -> Option<u32> {
        self.indices.front().copied()
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.indices.iter().copied()
    }

    /// The oldest index and every binarized frame in order, [`None`] until the window is full.
    pub fn full(&mut self) -> Option<(u32, &[Mat])> {
        if !self.is_full() {
            return None;
        }
        let oldest = self.oldest_index()?;
        Some((oldest, self.binaries.make_contiguous()))
    }
}

/// Finds the first frame from `start_frame` where the particle starts moving.
///
/// The foreground area of `start_frame` is the baseline of a single static particle. Motion
/// starts at the oldest frame of the first full [`DetectionWindow`] whose accumulated foreground
/// reaches twice that baseline.
pub fn detect_onset(
    resources: &Resources,
    source: &mut dyn FrameSource,
    start_frame: u32,
    mask: &RegionMask,
) -> Result<u32> {
    let detector = resources.detector.as_ref();
    let mut window = DetectionWindow::new();
    let mut min_area = None::<f64>;

    source.seek(start_frame)?;
    loop {
        resources.cancellation.check()?;
        let Some(frame) = source.read_next()? else {
            error!(target: "motion", "video ended before motion onset");
            return Err(Error::SourceExhausted);
        };
        let grayscale = detector.grayscale(&frame.mat)?;
        let binary = detector.enhance(&mask.apply(&grayscale)?)?;

        let min_area = match min_area {
            Some(min_area) => min_area,
            None => {
                let Some(area) = detector.foreground_area(&binary)? else {
                    error!(target: "motion", "no particle at frame {}", frame.index);
                    return Err(Error::NoBaselineArea(frame.index));
                };
                debug!(target: "motion", "baseline area {area} at frame {}", frame.index);
                *min_area.insert(2.0 * area)
            }
        };

        window.push(frame.index, binary);
        let Some((oldest, binaries)) = window.full() else {
            continue;
        };
        let area = detector
            .foreground_area(&detector.accumulate(binaries)?)?
            .unwrap_or_default();
        debug!(
            target: "motion",
            "accumulated area {area:.0} / {min_area:.0} from frame {oldest} to {}",
            frame.index
        );
        if area >= min_area {
            info!(target: "motion", "particle starts moving at frame {oldest}");
            return Ok(oldest);
        }
        window.evict();
    }
}
