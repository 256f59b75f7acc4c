//! # Incremental motion models
//!
//! A motion model warps an event to the time of the reference event given the motion parameters
//! (`vars`) and the elapsed time `t`. All models here use the first-order expansion of the motion
//! generator, `T = I + G(t * vars)`, which is what the incremental estimator linearises around.

use nalgebra as na;

/// D-dimensional event coordinate.
pub type Point<const D: usize> = na::SVector<f64, D>;
/// Vector of N motion parameters.
pub type Vars<const N: usize> = na::SVector<f64, N>;
/// `D x N` derivative of a warped point with respect to the motion parameters.
pub type Jacobian<const D: usize, const N: usize> = na::SMatrix<f64, D, N>;

/// Warped point with everything the estimator needs to linearise around it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Warp<const D: usize, const N: usize> {
    /// Motion compensated point.
    pub point: Point<D>,
    /// Derivative of `point` with respect to the motion parameters.
    pub jacobian: Jacobian<D, N>,
    /// Displacement produced by the generator at the current parameters.
    pub generator: Point<D>,
    /// Perturbation matrix, `generator` being `perturbation * vars` to first order.
    pub perturbation: Jacobian<D, N>,
}

/// Motion model used by the incremental estimator.
pub trait Model<const D: usize, const N: usize> {
    /// Human readable name of the model.
    fn name(&self) -> &'static str;

    /// Warp a single point.
    ///
    /// # Arguments
    ///
    /// * `vars` - motion parameters.
    /// * `c` - point to warp.
    /// * `t` - time elapsed since the reference event.
    fn warp(&self, vars: &Vars<N>, c: &Point<D>, t: f64) -> Point<D>;

    /// Warp a single point and compute its derivatives.
    fn warp_with_derivatives(&self, vars: &Vars<N>, c: &Point<D>, t: f64) -> Warp<D, N>;
}

/// Pure 2D translation with a constant velocity.
#[derive(Clone, Copy, Debug, Default)]
pub struct Translation2D;

impl Model<2, 2> for Translation2D {
    fn name(&self) -> &'static str {
        "translation2d"
    }

    fn warp(&self, vars: &Vars<2>, c: &Point<2>, t: f64) -> Point<2> {
        c + t * vars
    }

    fn warp_with_derivatives(&self, vars: &Vars<2>, c: &Point<2>, t: f64) -> Warp<2, 2> {
        let varst = t * vars;
        let dt = na::Matrix2::from_diagonal_element(t);

        Warp {
            point: c + varst,
            jacobian: dt,
            generator: varst,
            perturbation: dt,
        }
    }
}

/// Skew-symmetric generator of an angular velocity.
fn skew(w: &na::Vector3<f64>) -> na::Matrix3<f64> {
    na::matrix![
        0.0, -w.z, w.y;
        w.z, 0.0, -w.x;
        -w.y, w.x, 0.0;
    ]
}

/// 3D rotation of a camera observing points on the calibrated image plane.
///
/// The warp is projective: the rotated homogeneous point is divided by its depth.
#[derive(Clone, Copy, Debug, Default)]
pub struct Rotation;

impl Rotation {
    /// Rotate the homogeneous point and return it along with its depth.
    fn transform(g: &na::Matrix3<f64>, ch: &na::Vector3<f64>) -> (Point<2>, f64) {
        let cmh = (na::Matrix3::identity() + g) * ch;
        let z = cmh.z;
        (cmh.xy() / z, z)
    }
}

impl Model<2, 3> for Rotation {
    fn name(&self) -> &'static str {
        "rotation"
    }

    fn warp(&self, vars: &Vars<3>, c: &Point<2>, t: f64) -> Point<2> {
        let g = skew(&(t * vars));
        Self::transform(&g, &c.push(1.0)).0
    }

    fn warp_with_derivatives(&self, vars: &Vars<3>, c: &Point<2>, t: f64) -> Warp<2, 3> {
        let g = skew(&(t * vars));
        let ch = c.push(1.0);
        let (point, z) = Self::transform(&g, &ch);

        let generator = (g * ch).xy() / z;

        // Derivative of the projective division for each unit angular velocity.
        let mut jacobian = Jacobian::<2, 3>::zeros();
        for k in 0..3 {
            let dg = skew(&(t * na::Vector3::ith(k, 1.0)));
            let dh = dg * ch;
            jacobian.set_column(k, &((dh.xy() - dh.z * point) / z));
        }

        let tz = t / z;
        let ctz = tz * c;
        let perturbation = na::matrix![
            0.0, tz, -ctz.y;
            -tz, 0.0, ctz.x;
        ];

        Warp {
            point,
            jacobian,
            generator,
            perturbation,
        }
    }
}

/// 2D similarity: in-plane rotation `w`, scaling `s` and translation `v`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Similarity;

impl Similarity {
    /// Displacement of the generator `[s -w vx; w s vy]` at a point.
    fn generator(varst: &Vars<4>, c: &Point<2>) -> Point<2> {
        let (w, s) = (varst[0], varst[1]);
        na::vector![s * c.x - w * c.y + varst[2], w * c.x + s * c.y + varst[3]]
    }
}

impl Model<2, 4> for Similarity {
    fn name(&self) -> &'static str {
        "similarity"
    }

    fn warp(&self, vars: &Vars<4>, c: &Point<2>, t: f64) -> Point<2> {
        c + Self::generator(&(t * vars), c)
    }

    fn warp_with_derivatives(&self, vars: &Vars<4>, c: &Point<2>, t: f64) -> Warp<2, 4> {
        let generator = Self::generator(&(t * vars), c);
        let ct = t * c;

        let jacobian = na::matrix![
            -ct.y, ct.x, t, 0.0;
            ct.x, ct.y, 0.0, t;
        ];

        Warp {
            point: c + generator,
            jacobian,
            generator,
            perturbation: jacobian,
        }
    }
}

/// 3D translation of a camera observing a fronto-parallel plane.
///
/// Parameters are the velocity scaled by the inverse plane depth. Motion along the optical axis
/// scales the image, so the warp divides by `1 - t * vz`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TranslationNormal;

impl Model<2, 3> for TranslationNormal {
    fn name(&self) -> &'static str {
        "translation-normal"
    }

    fn warp(&self, vars: &Vars<3>, c: &Point<2>, t: f64) -> Point<2> {
        let varst = t * vars;
        (c - varst.xy()) / (1.0 - varst.z)
    }

    fn warp_with_derivatives(&self, vars: &Vars<3>, c: &Point<2>, t: f64) -> Warp<2, 3> {
        let varst = t * vars;
        let z = 1.0 - varst.z;
        let point = (c - varst.xy()) / z;
        let generator = (varst.z * c - varst.xy()) / z;

        let tz = t / z;
        let jacobian = na::matrix![
            -tz, 0.0, tz * point.x;
            0.0, -tz, tz * point.y;
        ];

        let ctz = tz * c;
        let perturbation = na::matrix![
            -tz, 0.0, ctz.x;
            0.0, -tz, ctz.y;
        ];

        Warp {
            point,
            jacobian,
            generator,
            perturbation,
        }
    }
}

/// Six degrees of freedom motion: angular velocity `w` followed by linear velocity `v`.
///
/// Events carry a depth, so points are 3D.
#[derive(Clone, Copy, Debug, Default)]
pub struct SixDof;

impl SixDof {
    fn generator(varst: &Vars<6>) -> na::Matrix3x4<f64> {
        let mut g = na::Matrix3x4::zeros();
        g.fixed_slice_mut::<3, 3>(0, 0)
            .copy_from(&skew(&varst.fixed_rows::<3>(0).into_owned()));
        g.set_column(3, &varst.fixed_rows::<3>(3));
        g
    }
}

impl Model<3, 6> for SixDof {
    fn name(&self) -> &'static str {
        "six-dof"
    }

    fn warp(&self, vars: &Vars<6>, c: &Point<3>, t: f64) -> Point<3> {
        c + Self::generator(&(t * vars)) * c.push(1.0)
    }

    fn warp_with_derivatives(&self, vars: &Vars<6>, c: &Point<3>, t: f64) -> Warp<3, 6> {
        let generator = Self::generator(&(t * vars)) * c.push(1.0);
        let ct = t * c;

        // The warp is linear in the parameters, so the jacobian and the perturbation coincide.
        let jacobian = na::matrix![
            0.0, ct.z, -ct.y, t, 0.0, 0.0;
            -ct.z, 0.0, ct.x, 0.0, t, 0.0;
            ct.y, -ct.x, 0.0, 0.0, 0.0, t;
        ];

        Warp {
            point: c + generator,
            jacobian,
            generator,
            perturbation: jacobian,
        }
    }
}
