//! Tile matrix multiply.

use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;
use crate::tile::{TileView, TileViewMut};
use crate::types::Op;

fn op_dims<T: Scalar>(op: Op, a: &TileView<'_, T>) -> (usize, usize) {
    if op.is_trans() {
        (a.nb(), a.mb())
    } else {
        (a.mb(), a.nb())
    }
}

#[inline]
fn op_get<T: Scalar>(op: Op, a: &TileView<'_, T>, i: usize, j: usize) -> T {
    if op.is_trans() {
        a.get(j, i)
    } else {
        a.get(i, j)
    }
}

/// C = alpha * op(A) * op(B) + beta * C
///
/// # Arguments
/// * `op_a`, `op_b` - Transposition of A and B
/// * `a` - `m × k` after `op_a`
/// * `b` - `k × n` after `op_b`
/// * `c` - `m × n`, updated in place
pub fn gemm<T: Scalar>(
    op_a: Op,
    op_b: Op,
    alpha: T,
    a: &TileView<'_, T>,
    b: &TileView<'_, T>,
    beta: T,
    c: &mut TileViewMut<'_, T>,
) -> DistResult<()> {
    let (m, k) = op_dims(op_a, a);
    let (kb, n) = op_dims(op_b, b);
    if k != kb || (m, n) != (c.mb(), c.nb()) {
        return Err(DistError::kernel(
            "gemm",
            format!(
                "op(A) {m}x{k}, op(B) {kb}x{n} and C {}x{} do not conform",
                c.mb(),
                c.nb()
            ),
        ));
    }

    for j in 0..n {
        for i in 0..m {
            let mut sum = T::zero();
            for l in 0..k {
                sum += op_get(op_a, a, i, l) * op_get(op_b, b, l, j);
            }
            let scaled = if beta == T::zero() {
                T::zero()
            } else {
                beta * c.get(i, j)
            };
            c.set(i, j, alpha * sum + scaled);
        }
    }
    Ok(())
}
