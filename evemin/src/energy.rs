//! # Pairwise dispersion energies
//!
//! An energy scores a pair of motion compensated events. The score of the pair is a Gaussian
//! kernel of their distance, and it contributes a Gauss-Newton numerator and denominator for the
//! motion parameters. Energies only differ in the kernel; accumulation is shared.

use crate::estimator::VarsEstimate;
use crate::model::{Jacobian, Point};

/// Pairwise energy policy.
pub trait Energy {
    /// Human readable name of the energy.
    fn name(&self) -> &'static str;

    /// Kernel weight of a squared distance between two compensated events.
    fn weight(&self, sq_dist: f64) -> f64;

    /// Accumulate the contribution of one pair of events.
    ///
    /// # Arguments
    ///
    /// * `cm_diff` - difference of the compensated (whitened, projected) points.
    /// * `dcm_diff` - difference of the warp jacobians.
    /// * `cmg_diff` - difference of compensated points minus difference of generator terms.
    /// * `per_diff` - difference of the perturbation matrices.
    /// * `est` - estimate to accumulate into.
    fn accumulate<const D: usize, const N: usize>(
        &self,
        cm_diff: &Point<D>,
        dcm_diff: &Jacobian<D, N>,
        cmg_diff: &Point<D>,
        per_diff: &Jacobian<D, N>,
        est: &mut VarsEstimate<N>,
    ) {
        let weight = self.weight(cm_diff.norm_squared());
        est.val += weight;

        let c_weight = weight * dcm_diff.transpose();
        est.num -= c_weight * cmg_diff;
        est.den += c_weight * per_diff;
    }
}

/// Potential energy, a unit-variance Gaussian kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Potential;

impl Energy for Potential {
    fn name(&self) -> &'static str {
        "potential"
    }

    fn weight(&self, sq_dist: f64) -> f64 {
        (-0.5 * sq_dist).exp()
    }
}

/// Tsallis entropy of order `alpha`.
///
/// The kernel is sharpened by `alpha`.
#[derive(Clone, Copy, Debug)]
pub struct Tsallis {
    alpha: f64,
}

impl Default for Tsallis {
    fn default() -> Self {
        Self { alpha: 2.0 }
    }
}

impl Tsallis {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Energy for Tsallis {
    fn name(&self) -> &'static str {
        "tsallis"
    }

    fn weight(&self, sq_dist: f64) -> f64 {
        (-0.5 * self.alpha * sq_dist).exp()
    }
}
