//! # Incremental camera motion estimator
//!
//! The estimator refines the motion parameters with every incoming event. Each event is paired
//! with the live events of the sliding window that compensate to nearby pixels, the pairs are
//! scored by an [`Energy`], and a few Gauss-Newton steps are taken on the exponentially decayed
//! sum of all past contributions.

use crate::camera::{Camera, Projection};
use crate::energy::Energy;
use crate::event::Event;
use crate::model::{Model, Point, Vars};
use crate::stats::Whitening;
use crate::window::EventWindow;
use anyhow::{ensure, Result};
use log::{debug, trace};
use nalgebra as na;

/// Square `N x N` matrix over the motion parameters.
pub type VarsMatrix<const N: usize> = na::SMatrix<f64, N, N>;

/// Generic incremental camera motion estimator.
pub trait Estimator<const D: usize, const N: usize> {
    /// Process the next event.
    ///
    /// Events must arrive in non-decreasing timestamp order.
    ///
    /// # Arguments
    ///
    /// * `c` - calibrated event coordinate.
    /// * `ts` - event timestamp.
    fn run(&mut self, c: &Point<D>, ts: f64);

    /// Current motion estimate.
    fn vars(&self) -> &Vars<N>;

    /// Resize the temporal window to `1 / inc` of its nominal size.
    fn set_inc(&mut self, inc: f64) -> Result<()>;

    /// Process the next event.
    fn run_event(&mut self, event: &Event<D>) {
        self.run(&event.c, event.ts)
    }
}

/// Parameters of the incremental estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DispersionParams {
    /// Step norm under which refinement of an event stops.
    pub min_step: f64,
    /// Maximum number of refinement steps per event.
    pub max_iter: usize,
    /// Half size of the neighbourhood searched for pairs, in pixels.
    pub w_size: usize,
    /// Whiten compensated events before scoring them.
    pub whiten: bool,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_step: 1.0e-6,
            max_iter: 10,
            w_size: 4,
            whiten: false,
        }
    }
}

/// Gauss-Newton accumulator of the motion parameters.
///
/// `val`, `num` and `den` hold the contributions of the event being refined, while the `_cum`
/// sums hold the decayed contributions of all committed events.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VarsEstimate<const N: usize> {
    pub val: f64,
    pub val_cum: f64,
    pub num: Vars<N>,
    pub num_cum: Vars<N>,
    pub den: VarsMatrix<N>,
    pub den_cum: VarsMatrix<N>,
    pub vars: Vars<N>,
}

impl<const N: usize> Default for VarsEstimate<N> {
    fn default() -> Self {
        Self {
            val: 0.0,
            val_cum: 0.0,
            num: Vars::zeros(),
            num_cum: Vars::zeros(),
            den: VarsMatrix::zeros(),
            den_cum: VarsMatrix::zeros(),
            vars: Vars::zeros(),
        }
    }
}

impl<const N: usize> VarsEstimate<N> {
    /// Scale the running sums.
    pub fn decay(&mut self, dec: f64) {
        self.val_cum *= dec;
        self.num_cum *= dec;
        self.den_cum *= dec;
    }

    /// Clear the contributions of the current iteration.
    pub fn reset_iteration(&mut self) {
        self.val = 0.0;
        self.num = Vars::zeros();
        self.den = VarsMatrix::zeros();
    }

    /// Commit the current contributions into the running sums.
    pub fn update(&mut self) {
        self.val_cum += self.val;
        self.num_cum += self.num;
        self.den_cum += self.den;
    }
}

/// Solve `a * x = b` for a symmetric, possibly semidefinite `a`.
///
/// Only the upper triangle of `a` is read. Well conditioned positive definite systems are
/// factorised in place. Otherwise directions with vanishing singular values are left at zero,
/// which keeps singular and indefinite systems finite.
///
/// Returns `None` if the system has non-finite entries.
pub fn solve_semidefinite<const N: usize>(a: &VarsMatrix<N>, b: &Vars<N>) -> Option<Vars<N>> {
    if !a.iter().chain(b.iter()).all(|v| v.is_finite()) {
        return None;
    }

    let mut a = *a;
    a.fill_lower_triangle_with_upper_triangle();

    let tolerance = N as f64 * f64::EPSILON;

    if let Some(chol) = na::Cholesky::new(a) {
        let pivots = chol.l_dirty().diagonal().map(|d| d * d);
        if pivots.min() > pivots.max() * tolerance {
            return Some(chol.solve(b));
        }
    }

    let svd = na::DMatrix::from_column_slice(N, N, a.as_slice()).svd(true, true);
    let eps = svd.singular_values.max() * tolerance;

    svd.solve(&na::DVector::from_column_slice(b.as_slice()), eps)
        .ok()
        .map(|x| Vars::from_column_slice(x.as_slice()))
}

fn is_finite<const D: usize>(p: &Point<D>) -> bool {
    p.iter().all(|v| v.is_finite())
}

/// Incremental dispersion minimisation.
///
/// The estimator is generic over the motion model `M` of `N` parameters acting on
/// `D`-dimensional events, and over the pairwise energy `E`.
pub struct IncrementalDispersion<M, E, const D: usize, const N: usize> {
    model: M,
    energy: E,
    camera: Camera,
    scale: Point<D>,
    params: DispersionParams,
    window: EventWindow<D>,
    whitening: Whitening<D>,
    est: VarsEstimate<N>,
    /// Neighbour slots of the current event.
    inds: Vec<usize>,
    /// Neighbour timestamps relative to the reference event.
    ts_diff_ref: Vec<f64>,
    rate: f64,
    n_prop: f64,
    iter: usize,
    last_step: f64,
}

impl<M, E, const D: usize, const N: usize> IncrementalDispersion<M, E, D, N>
where
    M: Model<D, N>,
    E: Energy,
    Camera: Projection<D>,
{
    /// Create a new estimator.
    ///
    /// # Arguments
    ///
    /// * `model` - motion model to estimate.
    /// * `energy` - pairwise energy to minimise.
    /// * `camera` - calibrated camera, its sensor size sets the bucket grid.
    /// * `params` - estimator parameters.
    /// * `window_size` - number of events kept in the sliding window.
    pub fn new(
        model: M,
        energy: E,
        camera: Camera,
        params: DispersionParams,
        window_size: usize,
    ) -> Result<Self> {
        ensure!(
            params.min_step.is_finite() && params.min_step >= 0.0,
            "minimum step {} must be finite and non-negative",
            params.min_step
        );
        ensure!(params.max_iter > 0, "at least one iteration per event");

        let (width, height) = camera.dim();
        let window = EventWindow::new(window_size, width, height)?;

        debug!(
            "{} estimator with {} energy: {:?}",
            model.name(),
            energy.name(),
            params
        );

        Ok(Self {
            model,
            energy,
            camera,
            scale: Point::repeat(1.0),
            params,
            window,
            whitening: Whitening::new(params.whiten),
            est: VarsEstimate::default(),
            inds: vec![],
            ts_diff_ref: vec![],
            rate: 0.0,
            n_prop: 0.0,
            iter: 0,
            last_step: 0.0,
        })
    }

    /// Scale compensated pixel coordinates before they are compared.
    pub fn with_scale(mut self, scale: Point<D>) -> Self {
        self.scale = scale;
        self
    }

    /// Start from a motion estimate other than zero.
    pub fn with_vars(mut self, vars: Vars<N>) -> Self {
        self.est.vars = vars;
        self
    }

    pub fn params(&self) -> &DispersionParams {
        &self.params
    }

    pub fn min_step(&self) -> f64 {
        self.params.min_step
    }

    pub fn max_iter(&self) -> usize {
        self.params.max_iter
    }

    pub fn w_size(&self) -> usize {
        self.params.w_size
    }

    /// Number of refinement steps taken on the last event.
    pub fn iter(&self) -> usize {
        self.iter
    }

    /// Norm of the last refinement step.
    pub fn last_step(&self) -> f64 {
        self.last_step
    }

    /// Warm-up proportion used on the last event.
    pub fn n_prop(&self) -> f64 {
        self.n_prop
    }

    /// Decay rate accumulator.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Number of live events in the window.
    pub fn live(&self) -> usize {
        self.window.len()
    }

    pub fn window(&self) -> &EventWindow<D> {
        &self.window
    }

    pub fn estimate(&self) -> &VarsEstimate<N> {
        &self.est
    }

    pub fn whitening(&self) -> &Whitening<D> {
        &self.whitening
    }

    pub fn vars(&self) -> &Vars<N> {
        &self.est.vars
    }

    /// Decay the running sums to the time of a new event.
    ///
    /// The decay factor `exp(-rate * dt)` is measured from the previously inserted event. The
    /// rate itself decays by the same factor. Returns the decay factor.
    pub fn decay(&mut self, ts: f64) -> f64 {
        let dt = self
            .window
            .previous_timestamp()
            .map(|prev| ts - prev)
            .unwrap_or(0.0);
        let dec = (-self.rate * dt).exp();
        self.est.decay(dec);
        self.rate *= dec;
        dec
    }

    /// Process the next event.
    pub fn run(&mut self, c: &Point<D>, ts: f64) {
        // Bucket of the event compensated with the current estimate.
        let t = ts - self.window.reference_timestamp().unwrap_or(ts);
        let cm = self.model.warp(&self.est.vars, c, t);
        let pixel = self.whitening.process_event(&self.camera, &self.scale, &cm);
        let bucket = self.window.grid().bucket(na::Point2::new(pixel[0], pixel[1]));

        self.window
            .neighbours_into(bucket, self.params.w_size, &mut self.inds);

        self.n_prop = self.window.admit();

        // Evicting may have moved the reference event.
        let ts_ref = self.window.reference_timestamp().unwrap_or(ts);
        self.ts_diff_ref.clear();
        self.ts_diff_ref.extend(
            self.inds
                .iter()
                .map(|&slot| self.window.timestamp(slot) - ts_ref),
        );
        let t = ts - ts_ref;

        self.decay(ts);

        let mut step = self.params.min_step;
        self.iter = 0;
        while self.iter < self.params.max_iter && step >= self.params.min_step {
            step = self.iterate(c, t);
            self.iter += 1;
        }
        self.last_step = step;

        self.est.update();
        self.rate += 1.0;

        self.window.insert(c, ts, bucket);

        if self.whitening.is_enabled() {
            let cm = self.model.warp(&self.est.vars, c, t);
            self.whitening.update(&cm, self.window.len());
        }
    }

    /// Take a single Gauss-Newton step.
    ///
    /// Returns the norm of the step, or zero if the neighbourhood gave no support.
    fn iterate(&mut self, c: &Point<D>, t: f64) -> f64 {
        let warp = self.model.warp_with_derivatives(&self.est.vars, c, t);
        let cms = self
            .whitening
            .process_event(&self.camera, &self.scale, &warp.point);

        self.est.reset_iteration();

        // Points on the camera centre have no pixel position.
        if !is_finite(&cms) {
            return 0.0;
        }

        for (&slot, &tl) in self.inds.iter().zip(&self.ts_diff_ref) {
            let other = self
                .model
                .warp_with_derivatives(&self.est.vars, self.window.point(slot), tl);
            let cmsl = self
                .whitening
                .process_event(&self.camera, &self.scale, &other.point);

            if !is_finite(&cmsl) {
                continue;
            }

            self.energy.accumulate(
                &(cms - cmsl),
                &(warp.jacobian - other.jacobian),
                &(warp.point - other.point - warp.generator + other.generator),
                &(warp.perturbation - other.perturbation),
                &mut self.est,
            );
        }

        if !(self.est.val > 0.0) {
            return 0.0;
        }

        // Few events in the window give a poorly conditioned numerator.
        self.est.num *= self.n_prop;

        let den = self.est.den_cum + self.est.den;
        let num = self.est.num_cum + self.est.num;

        match solve_semidefinite(&den, &num) {
            Some(solution) => {
                let v = solution - self.est.vars;
                self.est.vars += v;
                let d = v.norm();
                trace!(
                    "iter {}: val {} step {} vars {:?}",
                    self.iter,
                    self.est.val,
                    d,
                    self.est.vars.as_slice()
                );
                d
            }
            None => 0.0,
        }
    }

    /// Resize the temporal window to `1 / inc` of its nominal size.
    ///
    /// Surplus events are evicted immediately.
    pub fn set_inc(&mut self, inc: f64) -> Result<()> {
        self.window.set_inc(inc).map(|_| ())
    }
}

impl<M, E, const D: usize, const N: usize> Estimator<D, N> for IncrementalDispersion<M, E, D, N>
where
    M: Model<D, N>,
    E: Energy,
    Camera: Projection<D>,
{
    fn run(&mut self, c: &Point<D>, ts: f64) {
        IncrementalDispersion::run(self, c, ts)
    }

    fn vars(&self) -> &Vars<N> {
        IncrementalDispersion::vars(self)
    }

    fn set_inc(&mut self, inc: f64) -> Result<()> {
        IncrementalDispersion::set_inc(self, inc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::{Potential, Tsallis};
    use crate::model::{SixDof, Translation2D};
    use assert_approx_eq::assert_approx_eq;

    fn camera() -> Camera {
        Camera::from_params(100.0, 100.0, 50.0, 50.0, 100, 100).unwrap()
    }

    fn estimator(window: usize) -> IncrementalDispersion<Translation2D, Potential, 2, 2> {
        IncrementalDispersion::new(
            Translation2D,
            Potential,
            camera(),
            DispersionParams::default(),
            window,
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_params() {
        let bad = [
            DispersionParams {
                min_step: -1.0,
                ..Default::default()
            },
            DispersionParams {
                min_step: f64::NAN,
                ..Default::default()
            },
            DispersionParams {
                max_iter: 0,
                ..Default::default()
            },
        ];

        for params in bad {
            assert!(
                IncrementalDispersion::new(Translation2D, Potential, camera(), params, 16).is_err()
            );
        }

        assert!(IncrementalDispersion::new(
            Translation2D,
            Tsallis::default(),
            camera(),
            DispersionParams::default(),
            0
        )
        .is_err());
    }

    #[test]
    fn accumulator_decays_before_commit() {
        let mut est = VarsEstimate::<2> {
            val: 1.0,
            num: na::vector![1.0, 2.0],
            den: VarsMatrix::<2>::identity(),
            ..Default::default()
        };

        est.update();
        est.decay(0.5);
        est.update();

        assert_eq!(est.val_cum, 1.5);
        assert_eq!(est.num_cum, na::vector![1.5, 3.0]);
        assert_eq!(est.den_cum, VarsMatrix::<2>::identity() * 1.5);

        est.reset_iteration();
        assert_eq!(est.val, 0.0);
        assert_eq!(est.num, Vars::<2>::zeros());
    }

    #[test]
    fn semidefinite_solve() {
        let a = na::matrix![2.0, 0.0; 0.0, 0.0];
        let x = solve_semidefinite(&a, &na::vector![4.0, 0.0]).unwrap();
        assert_approx_eq!(x.x, 2.0, 1e-12);
        assert_approx_eq!(x.y, 0.0, 1e-12);

        let zero = solve_semidefinite(&VarsMatrix::<3>::zeros(), &Vars::<3>::zeros()).unwrap();
        assert_eq!(zero, Vars::<3>::zeros());

        // Lower triangle is ignored.
        let a = na::matrix![2.0, 1.0; 100.0, 2.0];
        let x = solve_semidefinite(&a, &na::vector![3.0, 3.0]).unwrap();
        assert_approx_eq!(x.x, 1.0, 1e-12);
        assert_approx_eq!(x.y, 1.0, 1e-12);

        // Negative definite systems are solved as well.
        let a = na::matrix![-4.0, 0.0; 0.0, -1.0];
        let x = solve_semidefinite(&a, &na::vector![2.0, 3.0]).unwrap();
        assert_approx_eq!(x.x, -0.5, 1e-12);
        assert_approx_eq!(x.y, -3.0, 1e-12);

        // Nearly singular systems keep the well determined direction only.
        let a = na::matrix![1.0, 0.0; 0.0, 1e-20];
        let x = solve_semidefinite(&a, &na::vector![1.0, 1.0]).unwrap();
        assert_approx_eq!(x.x, 1.0, 1e-12);
        assert_approx_eq!(x.y, 0.0, 1e-12);
    }

    #[test]
    fn non_finite_system() {
        let nan = na::matrix![f64::NAN, 0.0; 0.0, 1.0];
        assert!(solve_semidefinite(&nan, &na::vector![1.0, 1.0]).is_none());

        let a = VarsMatrix::<2>::identity();
        assert!(solve_semidefinite(&a, &na::vector![f64::INFINITY, 1.0]).is_none());
    }

    #[test]
    fn depth_zero_neighbour() {
        let mut estimator = IncrementalDispersion::new(
            SixDof,
            Potential,
            camera(),
            DispersionParams::default(),
            16,
        )
        .unwrap();

        // The first event sits on the camera centre and has no pixel position.
        estimator.run(&na::vector![0.0, 0.0, 0.0], 0.0);

        for k in 1..6 {
            estimator.run(&na::vector![-1.0, -1.0, 2.0], k as f64 * 1e-3);

            assert!(estimator.last_step().is_finite());
            assert!(estimator.vars().iter().all(|v| v.is_finite()));
        }

        let est = estimator.estimate();
        assert!(est.val_cum.is_finite() && est.val_cum > 0.0);
        assert!(est.num_cum.iter().all(|v| v.is_finite()));
        assert!(est.den_cum.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn decay_factor_bounds() {
        let mut estimator = estimator(32);

        // Nothing to decay from on the first event.
        assert_eq!(estimator.decay(5.0), 1.0);
        assert_eq!(estimator.rate(), 0.0);

        let mut ts = 0.0;
        for k in 0..200 {
            ts += 0.0005 * (k % 3) as f64;
            let c = na::vector![(k % 10) as f64 * 0.01, 0.0];

            let rate = estimator.rate();
            let val_cum = estimator.estimate().val_cum;
            let dt = estimator
                .window()
                .previous_timestamp()
                .map(|prev| ts - prev)
                .unwrap_or(0.0);

            let dec = estimator.decay(ts);

            assert!(dec > 0.0 && dec <= 1.0, "{}", dec);
            assert_eq!(dec, (-rate * dt).exp());
            assert_approx_eq!(estimator.rate(), rate * dec, 1e-12);
            assert_approx_eq!(estimator.estimate().val_cum, val_cum * dec, 1e-12);

            if dt == 0.0 {
                assert_eq!(dec, 1.0);
            }

            estimator.run(&c, ts);
            assert!(estimator.rate() >= 1.0);
        }
    }

    #[test]
    fn rate_accumulator() {
        let mut estimator = estimator(8);

        // Coincident timestamps never decay, so the rate counts events.
        for k in 0..5 {
            estimator.run(&na::vector![0.0, 0.0], 1.0);
            assert_eq!(estimator.rate(), (k + 1) as f64);
        }

        estimator.run(&na::vector![0.0, 0.0], 1.1);
        assert_approx_eq!(estimator.rate(), 5.0 * (-0.5f64).exp() + 1.0, 1e-12);
    }

    #[test]
    fn single_event_has_no_support() {
        let mut estimator = estimator(8);
        estimator.run(&na::vector![0.1, 0.1], 0.0);

        assert_eq!(estimator.iter(), 1);
        assert_eq!(estimator.last_step(), 0.0);
        assert_eq!(estimator.vars(), &Vars::<2>::zeros());
        assert_eq!(estimator.live(), 1);
    }

    #[test]
    fn set_inc_through_trait() {
        let mut estimator = estimator(16);

        for k in 0..16 {
            Estimator::run(&mut estimator, &na::vector![0.0, 0.0], k as f64 * 1e-3);
        }
        assert_eq!(estimator.live(), 16);

        Estimator::set_inc(&mut estimator, 4.0).unwrap();
        assert_eq!(estimator.live(), 4);
        assert!(Estimator::set_inc(&mut estimator, 0.0).is_err());
    }
}
