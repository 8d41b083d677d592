//! Floating-point abstraction shared by both supported precisions.

use core::fmt;
use core::ops::{AddAssign, MulAssign, SubAssign};

use num_traits::Float;

/// Scalar type the spatial index and smoothing engine are generic over.
///
/// Implemented for `f32` and `f64`. The associated `BITS` constant replaces
/// the runtime precision tag a dynamically-typed front end would carry:
/// binding arrays of mismatched width is a type error here, not a runtime
/// check.
pub trait Real:
    Float
    + AddAssign
    + SubAssign
    + MulAssign
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Width of the representation in bits (32 or 64).
    const BITS: u32;

    /// Conversion from `f64`, for constants and configuration values.
    fn of(v: f64) -> Self;

    /// Widening conversion to `f64`, for diagnostics.
    fn as_f64(self) -> f64;
}

impl Real for f32 {
    const BITS: u32 = 32;

    fn of(v: f64) -> Self {
        v as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    const BITS: u32 = 64;

    fn of(v: f64) -> Self {
        v
    }

    fn as_f64(self) -> f64 {
        self
    }
}
