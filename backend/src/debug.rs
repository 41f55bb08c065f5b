use std::fmt::Debug;

use anyhow::Result;
use log::warn;
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{Mat, MatTraitConst, Point, Rect, Scalar, Vector},
    highgui::{
        WINDOW_NORMAL, destroy_all_windows, imshow, named_window, resize_window, select_roi_def,
        wait_key,
    },
    imgproc::{FONT_HERSHEY_SIMPLEX, LINE_8, polylines, put_text_def, rectangle},
};

use crate::{Frame, Trajectory};

const TRACKING_WINDOW: &str = "Tracking";
const LOCALIZATION_WINDOW: &str = "Localization";
const SELECTION_WINDOW: &str = "BBOX";
/// Milliseconds the localization preview is shown for, must stay positive as `0` blocks on a key.
const LOCALIZATION_PREVIEW_MS: i32 = 500;
/// Milliseconds each tracked frame is shown for.
const TRACKING_FRAME_MS: i32 = 1;

/// Receives intermediate results for presentation.
///
/// Observers never affect the analysis and must not fail it.
#[cfg_attr(test, automock)]
pub trait Observer: Debug {
    /// Called once with the box the tracker is initialized with.
    fn on_localized(&self, frame: &Frame, bbox: Rect);

    /// Called after every successful tracker update with the updated box.
    fn on_tracked(&self, frame: &Frame, bbox: Rect, trajectory: &Trajectory);
}

/// Lets the user select the particle when it can't be localized automatically.
#[cfg_attr(test, automock)]
pub trait ManualSelector: Debug {
    /// Returns [`None`] when the user confirms an empty selection.
    fn select(&self, frame: &Frame) -> Result<Option<Rect>>;
}

/// An [`Observer`] showing the tracking in real-time.
#[derive(Debug)]
pub struct LiveObserver;

impl LiveObserver {
    pub fn new() -> Result<Self> {
        named_window(TRACKING_WINDOW, WINDOW_NORMAL)?;
        resize_window(TRACKING_WINDOW, 1280, 720)?;
        Ok(Self)
    }
}

impl Observer for LiveObserver {
    fn on_localized(&self, frame: &Frame, bbox: Rect) {
        let result = (|| -> Result<()> {
            let mut mat = frame.mat.try_clone()?;
            rectangle(&mut mat, bbox, Scalar::all(255.0), 2, LINE_8, 0)?;
            caption(&mut mat, &format!("Frame: {}", frame.index), 30)?;
            debug_mat(LOCALIZATION_WINDOW, &mat, LOCALIZATION_PREVIEW_MS)
        })();
        if let Err(err) = result {
            warn!(target: "debug", "cannot show localization preview: {err}");
        }
    }

    fn on_tracked(&self, frame: &Frame, bbox: Rect, trajectory: &Trajectory) {
        let result = (|| -> Result<()> {
            let mut mat = frame.mat.try_clone()?;
            draw_tracking_overlay(&mut mat, frame.index, bbox, &trajectory.frame_points())?;
            debug_mat(TRACKING_WINDOW, &mat, TRACKING_FRAME_MS)
        })();
        if let Err(err) = result {
            warn!(target: "debug", "cannot show tracking overlay: {err}");
        }
    }
}

impl Drop for LiveObserver {
    fn drop(&mut self) {
        let _ = destroy_all_windows();
    }
}

/// A [`ManualSelector`] letting the user drag a box over the frame.
#[derive(Debug, Default)]
pub struct RoiSelector;

impl ManualSelector for RoiSelector {
    fn select(&self, frame: &Frame) -> Result<Option<Rect>> {
        let mut mat = frame.mat.try_clone()?;
        caption(&mut mat, "Select the area of interest.", 30)?;
        caption(&mut mat, "Press ENTER to confirm.", 70)?;
        named_window(SELECTION_WINDOW, WINDOW_NORMAL)?;
        let selection = select_roi_def(SELECTION_WINDOW, &mat);
        destroy_all_windows()?;

        let bbox = selection?;
        Ok((bbox.width > 0 && bbox.height > 0).then_some(bbox))
    }
}

/// Draws the trajectory in red, the current box in white and the frame number.
pub fn draw_tracking_overlay(
    mat: &mut Mat,
    frame_index: u32,
    bbox: Rect,
    points: &[Point],
) -> Result<()> {
    if !points.is_empty() {
        let polyline = Vector::<Vector<Point>>::from_iter([Vector::from_slice(points)]);
        polylines(
            mat,
            &polyline,
            false,
            Scalar::new(0.0, 0.0, 255.0, 0.0),
            2,
            LINE_8,
            0,
        )?;
    }
    rectangle(mat, bbox, Scalar::all(255.0), 2, LINE_8, 0)?;
    caption(mat, &format!("Frame: {frame_index}"), 70)?;
    Ok(())
}

fn caption(mat: &mut Mat, text: &str, y: i32) -> Result<()> {
    put_text_def(
        mat,
        text,
        Point::new(200, y),
        FONT_HERSHEY_SIMPLEX,
        1.0,
        Scalar::new(0.0, 255.0, 0.0, 0.0),
    )?;
    Ok(())
}

fn debug_mat(name: &str, mat: &impl MatTraitConst, wait_ms: i32) -> Result<()> {
    imshow(name, mat)?;
    wait_key(wait_ms)?;
    Ok(())
}
