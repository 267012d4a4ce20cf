//! Element-wise tile kernels: set, trapezoid add and scale.

use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;
use crate::tile::{TileView, TileViewMut};
use crate::types::Uplo;

/// Set off-diagonal entries to `offdiag` and diagonal entries to `diag`.
pub fn geset<T: Scalar>(offdiag: T, diag: T, a: &mut TileViewMut<'_, T>) {
    for j in 0..a.nb() {
        for i in 0..a.mb() {
            a.set(i, j, if i == j { diag } else { offdiag });
        }
    }
}

fn in_triangle(uplo: Uplo, i: usize, j: usize) -> bool {
    match uplo {
        Uplo::General => true,
        Uplo::Upper => i <= j,
        Uplo::Lower => i >= j,
    }
}

/// B = alpha * A + beta * B on the `uplo` trapezoid; the rest of B is untouched.
pub fn tzadd<T: Scalar>(
    uplo: Uplo,
    alpha: T,
    a: &TileView<'_, T>,
    beta: T,
    b: &mut TileViewMut<'_, T>,
) -> DistResult<()> {
    if (a.mb(), a.nb()) != (b.mb(), b.nb()) {
        return Err(DistError::kernel(
            "tzadd",
            format!("A is {}x{}, B is {}x{}", a.mb(), a.nb(), b.mb(), b.nb()),
        ));
    }
    for j in 0..b.nb() {
        for i in 0..b.mb() {
            if in_triangle(uplo, i, j) {
                let value = alpha * a.get(i, j) + beta * b.get(i, j);
                b.set(i, j, value);
            }
        }
    }
    Ok(())
}

/// A = (numer / denom) * A, computed without forming an overflowing ratio.
pub fn gescale<T: Scalar>(numer: T, denom: T, a: &mut TileViewMut<'_, T>) -> DistResult<()> {
    if denom == T::zero() {
        return Err(DistError::kernel("gescale", "denominator is zero"));
    }
    for j in 0..a.nb() {
        for value in a.col_mut(j) {
            *value = *value * numer / denom;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geset_identity() {
        let mut data = [9.0_f64; 6];
        let mut a = TileViewMut::new(&mut data, 2, 3, 2).unwrap();
        geset(0.0, 1.0, &mut a);
        assert_eq!(data, [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_tzadd_lower() {
        let a = [1.0_f64; 4];
        let mut b = [10.0_f64; 4];
        let av = TileView::new(&a, 2, 2, 2).unwrap();
        let mut bv = TileViewMut::new(&mut b, 2, 2, 2).unwrap();
        tzadd(Uplo::Lower, 2.0, &av, 0.5, &mut bv).unwrap();
        // (0,1) is above the diagonal and keeps its value.
        assert_eq!(b, [7.0, 7.0, 10.0, 7.0]);
    }

    #[test]
    fn test_gescale() {
        let mut data = [2.0_f32, 4.0, 6.0, 8.0];
        let mut a = TileViewMut::new(&mut data, 2, 2, 2).unwrap();
        gescale(3.0, 2.0, &mut a).unwrap();
        assert_eq!(data, [3.0, 6.0, 9.0, 12.0]);
        assert!(gescale(1.0, 0.0, &mut TileViewMut::new(&mut data, 2, 2, 2).unwrap()).is_err());
    }
}
