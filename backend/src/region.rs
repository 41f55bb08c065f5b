use anyhow::Result;
use opencv::core::{
    CV_8UC1, Mat, MatExprTraitConst, MatTraitConst, Point, Rect, Scalar, Size, Vector,
    bitwise_and,
};
use opencv::imgproc::fill_poly_def;

use crate::{Error, Orientation};

/// A polygon restricting analysis to a sub-region of each frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AreaOfInterest {
    points: Vec<Point>,
}

impl AreaOfInterest {
    pub fn new(points: Vec<Point>) -> crate::Result<Self> {
        if points.len() < 3 {
            return Err(Error::InvalidSettings(format!(
                "area of interest needs at least 3 vertices, got {}",
                points.len()
            )));
        }
        Ok(Self { points })
    }

    pub fn from_pairs(pairs: &[[i32; 2]]) -> crate::Result<Self> {
        Self::new(pairs.iter().map(|[x, y]| Point::new(*x, *y)).collect())
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Re-expresses the vertices in the coordinate frame of a video with `orientation`.
    pub fn oriented(&self, orientation: Orientation) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|point| orientation.normalize(*point))
                .collect(),
        }
    }
}

/// A binary mask, non-zero where analysis is permitted.
#[derive(Debug)]
pub struct RegionMask {
    mask: Mat,
}

impl RegionMask {
    /// Rasterizes `area` onto a `size` frame.
    pub fn new(area: &AreaOfInterest, size: Size) -> Result<Self> {
        let mut mask = Mat::zeros_size(size, CV_8UC1)?.to_mat()?;
        let polygon = Vector::<Vector<Point>>::from_iter([Vector::from_slice(area.points())]);
        fill_poly_def(&mut mask, &polygon, Scalar::all(255.0))?;
        Ok(Self { mask })
    }

    /// Clears every pixel of `grayscale` outside the mask.
    pub fn apply(&self, grayscale: &Mat) -> Result<Mat> {
        let mut masked = Mat::default();
        bitwise_and(grayscale, grayscale, &mut masked, &self.mask)?;
        Ok(masked)
    }

    /// Whether `point` lies inside the mask.
    pub fn contains(&self, point: Point) -> bool {
        let bounds = Rect::new(0, 0, self.mask.cols(), self.mask.rows());
        bounds.contains(point)
            && self
                .mask
                .at_2d::<u8>(point.y, point.x)
                .is_ok_and(|value| *value != 0)
    }

    pub fn size(&self) -> Result<Size> {
        Ok(self.mask.size()?)
    }

    #[inline]
    pub fn mat(&self) -> &Mat {
        &self.mask
    }
}
