//! Smoothing kernel shapes and their radial derivatives.
//!
//! Both kernels share a support radius of `2h`, matching the gather radius
//! the smoothing passes use. The cubic spline is the classic M4 kernel;
//! Wendland C2 is strictly positive over its support and avoids the
//! pairing instability of the spline at low neighbor counts.

use std::f64::consts::PI;

use kdtree::Real;
use serde::{Deserialize, Serialize};

/// Normalization of the 3D M4 cubic spline: 1 / pi.
const CUBIC_NORM_3D: f64 = 1.0 / PI;

/// Normalization of the 3D Wendland C2 kernel: 21 / (16 pi).
const WENDLAND_NORM_3D: f64 = 21.0 / (16.0 * PI);

/// Weight-function shape used by every smoothing property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelShape {
    /// M4 cubic spline.
    CubicSpline,
    /// Wendland C2.
    WendlandC2,
}

impl KernelShape {
    /// Kernel value `W(r, h)`; zero at and beyond `r = 2h`.
    ///
    /// ```text
    /// cubic:    W = (1/pi h^3) (1 - 1.5 q^2 + 0.75 q^3)   q <= 1
    ///           W = (1/4pi h^3) (2 - q)^3                 1 < q <= 2
    /// wendland: W = (21/16pi h^3) (1 - q/2)^4 (1 + 2q)    q <= 2
    /// ```
    /// with `q = r/h`.
    pub fn weight<T: Real>(self, r: T, h: T) -> T {
        let q = r / h;
        let two = T::of(2.0);
        if q >= two {
            return T::zero();
        }
        let h3 = h * h * h;
        match self {
            KernelShape::CubicSpline => {
                let w = if q < T::one() {
                    T::one() - T::of(1.5) * q * q + T::of(0.75) * q * q * q
                } else {
                    let t = two - q;
                    T::of(0.25) * t * t * t
                };
                T::of(CUBIC_NORM_3D) / h3 * w
            }
            KernelShape::WendlandC2 => {
                let t = T::one() - T::of(0.5) * q;
                let t2 = t * t;
                T::of(WENDLAND_NORM_3D) / h3 * t2 * t2 * (T::one() + two * q)
            }
        }
    }

    /// Radial derivative `dW/dr (r, h)`; negative inside the support,
    /// zero at and beyond `r = 2h`.
    pub fn weight_derivative<T: Real>(self, r: T, h: T) -> T {
        let q = r / h;
        let two = T::of(2.0);
        if q >= two {
            return T::zero();
        }
        let h4 = h * h * h * h;
        match self {
            KernelShape::CubicSpline => {
                let dw = if q < T::one() {
                    T::of(-3.0) * q + T::of(2.25) * q * q
                } else {
                    let t = two - q;
                    T::of(-0.75) * t * t
                };
                T::of(CUBIC_NORM_3D) / h4 * dw
            }
            KernelShape::WendlandC2 => {
                let t = T::one() - T::of(0.5) * q;
                T::of(WENDLAND_NORM_3D) / h4 * T::of(-5.0) * q * t * t * t
            }
        }
    }
}
