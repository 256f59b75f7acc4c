//! # Online whitening statistics

use crate::camera::{Camera, Projection};
use crate::model::Point;
use nalgebra as na;

/// Regulariser added to the singular values before inverting them.
pub const WHITENING_EPS: f64 = 1.0e-8;

/// Square `D x D` matrix.
pub type CMatrix<const D: usize> = na::SMatrix<f64, D, D>;

/// Compute the whitening transform of a covariance matrix.
///
/// Returns `U * diag(1 / sqrt(s + eps)) * U^T` along with `sqrt(s + eps)`, singular values `s`
/// sorted in descending order.
pub fn compute_whitening<const D: usize>(cov: &CMatrix<D>) -> (CMatrix<D>, Point<D>) {
    // For a symmetric matrix the singular values are the absolute eigenvalues, and the left
    // singular vectors are the eigenvectors.
    let eigen = na::DMatrix::from_column_slice(D, D, cov.as_slice()).symmetric_eigen();

    let mut order = [0usize; D];
    order.iter_mut().enumerate().for_each(|(i, o)| *o = i);
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .abs()
            .total_cmp(&eigen.eigenvalues[a].abs())
    });

    let mut u = CMatrix::<D>::zeros();
    let mut singular_values = Point::<D>::zeros();
    for (i, &o) in order.iter().enumerate() {
        for r in 0..D {
            u[(r, i)] = eigen.eigenvectors[(r, o)];
        }
        singular_values[i] = (eigen.eigenvalues[o].abs() + WHITENING_EPS).sqrt();
    }

    let inv = singular_values.map(|s| 1.0 / s);
    let w = u * CMatrix::<D>::from_diagonal(&inv) * u.transpose();

    (w, singular_values)
}

/// Incrementally updated mean and covariance of motion compensated points.
#[derive(Clone, Copy, Debug)]
pub struct Stats<const D: usize> {
    pub mean: Point<D>,
    pub singular_values: Point<D>,
    pub cov: CMatrix<D>,
    pub w: CMatrix<D>,
}

impl<const D: usize> Default for Stats<D> {
    fn default() -> Self {
        Self {
            mean: Point::zeros(),
            singular_values: Point::repeat(1.0),
            cov: CMatrix::identity(),
            w: CMatrix::identity(),
        }
    }
}

impl<const D: usize> Stats<D> {
    /// Add the `n`-th point and recompute the whitening transform.
    ///
    /// # Arguments
    ///
    /// * `c` - new point.
    /// * `n` - number of points the statistics describe, including `c`.
    pub fn update(&mut self, c: &Point<D>, n: usize) {
        let n = n as f64;
        let c_diff = c - self.mean;
        self.mean += c_diff / n;
        self.cov += (c_diff * (c - self.mean).transpose() - self.cov) / n;

        let (w, singular_values) = compute_whitening(&self.cov);
        self.w = w;
        self.singular_values = singular_values;
    }
}

/// Whitening stage of the estimator.
///
/// When disabled, events pass through to the projection unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Whitening<const D: usize> {
    enabled: bool,
    stats: Stats<D>,
}

impl<const D: usize> Whitening<D> {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stats: Stats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> &Stats<D> {
        &self.stats
    }

    /// Map a motion compensated point to scaled pixel coordinates.
    ///
    /// With whitening enabled the point is whitened and coloured again with the current singular
    /// values before projection.
    pub fn process_event(&self, camera: &Camera, scale: &Point<D>, c: &Point<D>) -> Point<D>
    where
        Camera: Projection<D>,
    {
        let c = if self.enabled {
            let cw = self.stats.w * (c - self.stats.mean);
            self.stats.singular_values.component_mul(&cw) + self.stats.mean
        } else {
            *c
        };

        camera.project(&c).component_mul(scale)
    }

    /// Feed a motion compensated point into the statistics.
    ///
    /// Does nothing when whitening is disabled, or for non-finite points.
    pub fn update(&mut self, cm: &Point<D>, n: usize) {
        if self.enabled && cm.iter().all(|v| v.is_finite()) {
            self.stats.update(cm, n);
        }
    }
}
