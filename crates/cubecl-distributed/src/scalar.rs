//! Element types supported by tiles.
//!
//! Tiles travel between ranks as raw bytes, so every scalar must be
//! plain-old-data. Real types only: conjugate transposition is a plain
//! transposition.

use core::fmt::Debug;
use core::ops::{AddAssign, MulAssign, SubAssign};

use bytemuck::Pod;
use num_traits::Float;

/// Scalar element stored in tiles.
///
/// # Example
///
/// ```ignore
/// use cubecl_distributed::Scalar;
///
/// fn scale<T: Scalar>(x: &mut [T], alpha: f64) {
///     let alpha = T::cast_from(alpha);
///     x.iter_mut().for_each(|v| *v *= alpha);
/// }
/// ```
pub trait Scalar:
    Float + Pod + Default + Debug + Send + Sync + AddAssign + SubAssign + MulAssign + 'static
{
    /// Short type name used in traces.
    const NAME: &'static str;

    /// Comparison tolerance used by tests.
    const TOLERANCE: f64;

    /// Lossy conversion from `f64`.
    fn cast_from(value: f64) -> Self;

    /// Lossy conversion to `f64`.
    fn as_f64(self) -> f64;
}

impl Scalar for f32 {
    const NAME: &'static str = "f32";
    const TOLERANCE: f64 = 1e-4;

    fn cast_from(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Scalar for f64 {
    const NAME: &'static str = "f64";
    const TOLERANCE: f64 = 1e-10;

    fn cast_from(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}
