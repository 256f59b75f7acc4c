//! # Camera abstraction

use crate::model::Point;
use anyhow::{anyhow, ensure, Result};
use nalgebra as na;

/// Number of Brown-Conrady distortion coefficients, `k1 k2 p1 p2 k3`.
pub const NUM_DISTORTION: usize = 5;

const UNDISTORT_ITERS: usize = 10;

/// Calibrated pinhole camera.
///
/// Events enter the estimator in calibrated coordinates (`unproject`) and are mapped back to
/// pixels (`project`) whenever they are bucketed or compared.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    intrinsics: na::Matrix3<f64>,
    inv_intrinsics: na::Matrix3<f64>,
    distortion: [f64; NUM_DISTORTION],
    width: usize,
    height: usize,
}

impl Camera {
    /// Create a new camera without lens distortion.
    ///
    /// # Arguments
    ///
    /// * `intrinsics` - 3x3 camera matrix.
    /// * `width` - sensor width in pixels.
    /// * `height` - sensor height in pixels.
    pub fn new(intrinsics: na::Matrix3<f64>, width: usize, height: usize) -> Result<Self> {
        ensure!(width > 0 && height > 0, "empty sensor {}x{}", width, height);
        ensure!(
            intrinsics[(0, 0)] != 0.0 && intrinsics[(1, 1)] != 0.0,
            "zero focal length"
        );

        let inv_intrinsics = intrinsics
            .try_inverse()
            .ok_or_else(|| anyhow!("camera matrix is not invertible"))?;

        Ok(Self {
            intrinsics,
            inv_intrinsics,
            distortion: [0.0; NUM_DISTORTION],
            width,
            height,
        })
    }

    /// Create a camera from focal lengths and the principal point.
    pub fn from_params(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        Self::new(
            na::matrix![
                fx, 0.0, cx;
                0.0, fy, cy;
                0.0, 0.0, 1.0
            ],
            width,
            height,
        )
    }

    /// Attach lens distortion coefficients (`k1 k2 p1 p2 k3`).
    pub fn with_distortion(mut self, distortion: [f64; NUM_DISTORTION]) -> Self {
        self.distortion = distortion;
        self
    }

    /// Get camera intrinsic parameters.
    pub fn intrinsics(&self) -> &na::Matrix3<f64> {
        &self.intrinsics
    }

    pub fn distortion(&self) -> &[f64; NUM_DISTORTION] {
        &self.distortion
    }

    /// True if any distortion coefficient is non-zero.
    pub fn is_distorted(&self) -> bool {
        self.distortion.iter().any(|&k| k != 0.0)
    }

    /// Get sensor width and height.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Check whether a pixel rounds to a position on the sensor.
    pub fn contains(&self, pixel: na::Point2<f64>) -> bool {
        let (x, y) = (pixel.x.round(), pixel.y.round());
        x >= 0.0 && x < self.width as f64 && y >= 0.0 && y < self.height as f64
    }

    /// Apply lens distortion to normalised image coordinates.
    fn distort_normalised(&self, p: na::Vector2<f64>) -> na::Vector2<f64> {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));

        na::Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    fn normalise(&self, pixel: na::Point2<f64>) -> na::Vector2<f64> {
        let k = &self.intrinsics;
        na::Vector2::new(
            (pixel.x - k[(0, 2)]) / k[(0, 0)],
            (pixel.y - k[(1, 2)]) / k[(1, 1)],
        )
    }

    fn denormalise(&self, p: na::Vector2<f64>) -> na::Point2<f64> {
        let k = &self.intrinsics;
        na::Point2::new(k[(0, 0)] * p.x + k[(0, 2)], k[(1, 1)] * p.y + k[(1, 2)])
    }

    /// Distort a pixel coordinate.
    pub fn distort(&self, pixel: na::Point2<f64>) -> na::Point2<f64> {
        self.denormalise(self.distort_normalised(self.normalise(pixel)))
    }

    /// Remove lens distortion from a raw sensor pixel.
    ///
    /// The inverse distortion has no closed form, so it is found by fixed-point iteration.
    /// Returns `None` if the undistorted pixel falls off the sensor.
    pub fn undistort(&self, pixel: na::Point2<f64>) -> Option<na::Point2<f64>> {
        let undistorted = if self.is_distorted() {
            let distorted = self.normalise(pixel);
            let mut p = distorted;

            for _ in 0..UNDISTORT_ITERS {
                let error = self.distort_normalised(p) - distorted;
                p -= error;
            }

            self.denormalise(p)
        } else {
            pixel
        };

        Some(undistorted).filter(|&p| self.contains(p))
    }
}

/// Mapping between calibrated and pixel coordinates of D-dimensional events.
pub trait Projection<const D: usize> {
    /// Map a calibrated point to pixel coordinates.
    fn project(&self, c: &Point<D>) -> Point<D>;

    /// Map a pixel coordinate to a calibrated point.
    fn unproject(&self, c: &Point<D>) -> Point<D>;

    /// Pixel position of a calibrated point.
    fn pixel(&self, c: &Point<D>) -> na::Point2<f64> {
        let p = self.project(c);
        na::Point2::new(p[0], p[1])
    }
}

impl Projection<2> for Camera {
    fn project(&self, c: &Point<2>) -> Point<2> {
        self.denormalise(*c).coords
    }

    fn unproject(&self, c: &Point<2>) -> Point<2> {
        self.normalise(na::Point2::from(*c))
    }
}

/// 3D points keep their depth in the last coordinate.
impl Projection<3> for Camera {
    fn project(&self, c: &Point<3>) -> Point<3> {
        let p = self.intrinsics * c;
        na::Vector3::new(p.x / c.z, p.y / c.z, p.z)
    }

    fn unproject(&self, c: &Point<3>) -> Point<3> {
        let scaled = na::Vector3::new(c.x * c.z, c.y * c.z, c.z);
        self.inv_intrinsics * scaled
    }
}
