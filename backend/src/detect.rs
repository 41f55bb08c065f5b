use std::fmt::Debug;

use anyhow::{Result, bail};
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{
        CMP_LT, CV_8UC1, Mat, MatExprTraitConst, MatTraitConst, Point, Rect, Scalar, Size,
        ToInputArray, Vec3f, Vector, add, compare, count_non_zero, in_range, no_array,
    },
    imgproc::{
        CHAIN_APPROX_NONE, CHAIN_APPROX_SIMPLE, COLOR_BGR2GRAY, HOUGH_GRADIENT_ALT, LINE_8,
        MORPH_CLOSE, MORPH_ELLIPSE, RETR_EXTERNAL, RETR_TREE, bounding_rect, circle,
        contour_area, cvt_color_def, dilate_def, find_contours_def, get_structuring_element_def,
        hough_circles, morphology_ex_def,
    },
};

/// Lower bound of the intensity range kept by the binarization step.
const BINARY_THRESHOLD: f64 = 25.0;

/// Size of the elliptical structuring element used for closing and dilation.
const KERNEL_SIZE: i32 = 5;

const HOUGH_INVERSE_RATIO: f64 = 1.0;
const HOUGH_MIN_DISTANCE: f64 = 2000.0;
const HOUGH_CANNY_THRESHOLD: f64 = 50.0;
/// Circle "perfectness" required by [`HOUGH_GRADIENT_ALT`].
const HOUGH_PERFECTNESS: f64 = 0.85;
const HOUGH_MIN_RADIUS: i32 = 5;
const HOUGH_MAX_RADIUS: i32 = 30;

/// Thickness of the outline drawn to derive a circle's bounding box.
const CIRCLE_OUTLINE_THICKNESS: i32 = 2;

/// A circle in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Circle {
    pub center: Point,
    pub radius: i32,
}

/// Image primitives used by the analysis stages.
///
/// Every stage receives its frames as [`Mat`] and only sequences these primitives, so tests can
/// script the results of a stage without producing matching images.
#[cfg_attr(test, automock)]
pub trait Detector: Debug {
    /// Converts a BGR frame to single-channel intensity.
    ///
    /// Single-channel frames are returned as is.
    fn grayscale(&self, frame: &Mat) -> Result<Mat>;

    /// Counts the pixels of a grayscale frame with intensity below `upper`.
    fn dark_pixels(&self, grayscale: &Mat, upper: u8) -> Result<u64>;

    /// Binarizes a grayscale frame by closing, dilating and keeping the intensity range
    /// `[25, 255]`.
    fn enhance(&self, grayscale: &Mat) -> Result<Mat>;

    /// Sums binarized frames pixelwise with saturation.
    fn accumulate(&self, binaries: &[Mat]) -> Result<Mat>;

    /// Area of the largest external contour of a binarized frame.
    ///
    /// Returns [`None`] when the frame has no foreground.
    fn foreground_area(&self, binary: &Mat) -> Result<Option<f64>>;

    /// Detects a single near-perfect circle in a grayscale frame.
    fn detect_circle(&self, grayscale: &Mat) -> Result<Option<Circle>>;

    /// Computes the axis-aligned bounding box of `circle` outlined on a blank `size` frame.
    fn circle_bounds(&self, size: Size, circle: Circle) -> Result<Rect>;
}

/// A [`Detector`] backed by OpenCV.
#[derive(Debug)]
pub struct DefaultDetector {
    kernel: Mat,
}

impl DefaultDetector {
    pub fn new() -> Result<Self> {
        let kernel =
            get_structuring_element_def(MORPH_ELLIPSE, Size::new(KERNEL_SIZE, KERNEL_SIZE))?;
        Ok(Self { kernel })
    }
}

impl Detector for DefaultDetector {
    fn grayscale(&self, frame: &Mat) -> Result<Mat> {
        to_grayscale(frame)
    }

    fn dark_pixels(&self, grayscale: &Mat, upper: u8) -> Result<u64> {
        count_dark_pixels(grayscale, upper)
    }

    fn enhance(&self, grayscale: &Mat) -> Result<Mat> {
        enhance(grayscale, &self.kernel)
    }

    fn accumulate(&self, binaries: &[Mat]) -> Result<Mat> {
        accumulate(binaries)
    }

    fn foreground_area(&self, binary: &Mat) -> Result<Option<f64>> {
        largest_external_contour_area(binary)
    }

    fn detect_circle(&self, grayscale: &Mat) -> Result<Option<Circle>> {
        detect_circle(grayscale)
    }

    fn circle_bounds(&self, size: Size, circle: Circle) -> Result<Rect> {
        circle_bounds(size, circle)
    }
}

fn to_grayscale(frame: &Mat) -> Result<Mat> {
    if frame.channels() == 1 {
        return Ok(frame.clone());
    }
    let mut grayscale = Mat::default();
    cvt_color_def(frame, &mut grayscale, COLOR_BGR2GRAY)?;
    Ok(grayscale)
}

fn count_dark_pixels(grayscale: &impl ToInputArray, upper: u8) -> Result<u64> {
    let mut dark = Mat::default();
    compare(grayscale, &Scalar::all(upper as f64), &mut dark, CMP_LT)?;
    Ok(count_non_zero(&dark)? as u64)
}

fn enhance(grayscale: &Mat, kernel: &Mat) -> Result<Mat> {
    let mut closed = Mat::default();
    morphology_ex_def(grayscale, &mut closed, MORPH_CLOSE, kernel)?;
    unsafe {
        // SAFETY: dilate can be called in place.
        closed.modify_inplace(|mat, mat_mut| dilate_def(mat, mat_mut, kernel))?;
    }
    let mut binary = Mat::default();
    in_range(
        &closed,
        &Scalar::all(BINARY_THRESHOLD),
        &Scalar::all(255.0),
        &mut binary,
    )?;
    Ok(binary)
}

fn accumulate(binaries: &[Mat]) -> Result<Mat> {
    let Some((first, rest)) = binaries.split_first() else {
        bail!("cannot accumulate an empty window")
    };
    let mut accumulated = first.clone();
    for binary in rest {
        unsafe {
            // SAFETY: add can be called in place.
            accumulated
                .modify_inplace(|mat, mat_mut| add(mat, binary, mat_mut, &no_array(), -1))?;
        }
    }
    Ok(accumulated)
}

fn largest_external_contour_area(binary: &Mat) -> Result<Option<f64>> {
    let mut contours = Vector::<Vector<Point>>::new();
    find_contours_def(binary, &mut contours, RETR_EXTERNAL, CHAIN_APPROX_NONE)?;
    let mut largest = None::<f64>;
    for contour in contours.iter() {
        let area = contour_area(&contour, false)?;
        largest = Some(largest.map_or(area, |largest| largest.max(area)));
    }
    Ok(largest)
}

fn detect_circle(grayscale: &Mat) -> Result<Option<Circle>> {
    let mut circles = Vector::<Vec3f>::new();
    hough_circles(
        grayscale,
        &mut circles,
        HOUGH_GRADIENT_ALT,
        HOUGH_INVERSE_RATIO,
        HOUGH_MIN_DISTANCE,
        HOUGH_CANNY_THRESHOLD,
        HOUGH_PERFECTNESS,
        HOUGH_MIN_RADIUS,
        HOUGH_MAX_RADIUS,
    )?;
    let Some(first) = circles.iter().next() else {
        return Ok(None);
    };
    Ok(Some(Circle {
        center: Point::new(first[0].round() as i32, first[1].round() as i32),
        radius: first[2].round() as i32,
    }))
}

fn circle_bounds(size: Size, outline: Circle) -> Result<Rect> {
    let mut blank = Mat::zeros_size(size, CV_8UC1)?.to_mat()?;
    circle(
        &mut blank,
        outline.center,
        outline.radius,
        Scalar::all(255.0),
        CIRCLE_OUTLINE_THICKNESS,
        LINE_8,
        0,
    )?;

    let mut contours = Vector::<Vector<Point>>::new();
    find_contours_def(&blank, &mut contours, RETR_TREE, CHAIN_APPROX_SIMPLE)?;
    let mut bounds = None::<Rect>;
    for contour in contours.iter() {
        let rect = bounding_rect(&contour)?;
        if bounds.is_none_or(|bounds| rect.area() > bounds.area()) {
            bounds = Some(rect);
        }
    }
    match bounds {
        Some(bounds) => Ok(bounds),
        None => bail!("circle at {:?} lies outside the frame", outline.center),
    }
}
