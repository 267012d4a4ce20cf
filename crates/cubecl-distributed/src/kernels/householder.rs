//! Triangle-on-top-of-square QR and application of its block reflector.
//!
//! `tpqrt` factors `[R; A]`, where `R` is `k × k` upper triangular and `A` is
//! `m × k`, into `Q [R'; 0]`. The Householder vectors have the form
//! `v_j = [e_j; V(:, j)]`, so only `V` is stored (in place of `A`). Reflectors
//! are grouped in blocks of `ib` columns; block `b` is
//! `Q_b = I - V_b T_b V_b^T` with `T_b` upper triangular, stored in rows
//! `0..ib` of `T` at columns `b*ib..`. Then `Q = Q_0 Q_1 ... Q_last`.
//!
//! `tpmqrt` applies `Q` or `Q^T` from either side to a pair `(C1, C2)`, where
//! `C1` holds the rows (Left) or columns (Right) matching the identity part of
//! the reflectors and `C2` those matching `V`. This is the two-tile kernel of a
//! reduction-tree node.

use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;
use crate::tile::{TileView, TileViewMut};
use crate::types::{Op, Side};

/// Factor `[R; A]` in place: `R` is overwritten by `R'`, `A` by `V`, `T` by
/// the block reflector factors.
pub fn tpqrt<T: Scalar>(
    ib: usize,
    r: &mut TileViewMut<'_, T>,
    a: &mut TileViewMut<'_, T>,
    t: &mut TileViewMut<'_, T>,
) -> DistResult<()> {
    let k = a.nb();
    let m = a.mb();
    if ib == 0 || t.mb() < ib.min(k) || t.nb() < k || r.nb() != k || r.mb() < k {
        return Err(DistError::kernel(
            "tpqrt",
            format!(
                "R {}x{}, A {m}x{k} and T {}x{} do not conform for ib = {ib}",
                r.mb(),
                r.nb(),
                t.mb(),
                t.nb()
            ),
        ));
    }

    for kk in (0..k).step_by(ib) {
        let kb = ib.min(k - kk);
        for jj in 0..kb {
            let j = kk + jj;

            // Reflector annihilating A(:, j) against R(j, j).
            let alpha = r.get(j, j);
            let xnorm = (0..m)
                .map(|row| a.get(row, j) * a.get(row, j))
                .fold(T::zero(), |acc, x| acc + x)
                .sqrt();
            let tau = if xnorm == T::zero() {
                T::zero()
            } else {
                let norm = alpha.hypot(xnorm);
                let beta = if alpha >= T::zero() { -norm } else { norm };
                let scale = T::one() / (alpha - beta);
                for row in 0..m {
                    *a.get_mut(row, j) *= scale;
                }
                r.set(j, j, beta);
                (beta - alpha) / beta
            };

            // Apply H_j to the remaining columns.
            for c in j + 1..k {
                let mut w = r.get(j, c);
                for row in 0..m {
                    w += a.get(row, j) * a.get(row, c);
                }
                w *= tau;
                r.set(j, c, r.get(j, c) - w);
                for row in 0..m {
                    let update = w * a.get(row, j);
                    *a.get_mut(row, c) -= update;
                }
            }

            // T(0..jj, j) = -tau * T_b(0..jj, 0..jj) * V_b(:, 0..jj)^T v_j;
            // the identity parts are orthogonal, so only A contributes.
            let z: Vec<T> = (0..jj)
                .map(|p| {
                    (0..m)
                        .map(|row| a.get(row, kk + p) * a.get(row, j))
                        .fold(T::zero(), |acc, x| acc + x)
                })
                .collect();
            for p in 0..jj {
                let mut sum = T::zero();
                for (q, zq) in z.iter().enumerate().skip(p) {
                    sum += t.get(p, kk + q) * *zq;
                }
                t.set(p, j, -tau * sum);
            }
            t.set(jj, j, tau);
            for p in jj + 1..t.mb() {
                t.set(p, j, T::zero());
            }
        }
    }
    Ok(())
}

/// Entry (p, q) of op(T_b), the block starting at column `kk`.
#[inline]
fn t_entry<T: Scalar>(op: Op, t: &TileView<'_, T>, kk: usize, p: usize, q: usize) -> T {
    let (row, col) = if op.is_trans() { (q, p) } else { (p, q) };
    if row <= col {
        t.get(row, kk + col)
    } else {
        T::zero()
    }
}

/// Apply `op(Q)` from `side` to the tile pair `(C1, C2)`.
///
/// # Arguments
/// * `v` - `m × k` reflector block produced by [`tpqrt`]
/// * `t` - triangular factors, `ib × k`
/// * `c1` - at least `k` rows (Left) or columns (Right); only those are touched
/// * `c2` - `m` rows (Left) or columns (Right)
#[allow(clippy::too_many_arguments)]
pub fn tpmqrt<T: Scalar>(
    side: Side,
    op: Op,
    ib: usize,
    v: &TileView<'_, T>,
    t: &TileView<'_, T>,
    c1: &mut TileViewMut<'_, T>,
    c2: &mut TileViewMut<'_, T>,
) -> DistResult<()> {
    let (m, k) = (v.mb(), v.nb());
    let conforming = match side {
        Side::Left => c1.mb() >= k && c2.mb() == m && c1.nb() == c2.nb(),
        Side::Right => c1.nb() >= k && c2.nb() == m && c1.mb() == c2.mb(),
    };
    if ib == 0 || !conforming || t.mb() < ib.min(k) || t.nb() < k {
        return Err(DistError::kernel(
            "tpmqrt",
            format!(
                "{side:?}: V {m}x{k}, T {}x{}, C1 {}x{}, C2 {}x{} do not conform for ib = {ib}",
                t.mb(),
                t.nb(),
                c1.mb(),
                c1.nb(),
                c2.mb(),
                c2.nb()
            ),
        ));
    }

    let forward = matches!(
        (side, op.is_trans()),
        (Side::Left, true) | (Side::Right, false)
    );
    let blocks: Vec<usize> = (0..k).step_by(ib).collect();
    let ordered: Box<dyn Iterator<Item = &usize>> = if forward {
        Box::new(blocks.iter())
    } else {
        Box::new(blocks.iter().rev())
    };

    for &kk in ordered {
        let kb = ib.min(k - kk);
        match side {
            Side::Left => apply_left(op, kk, kb, v, t, c1, c2),
            Side::Right => apply_right(op, kk, kb, v, t, c1, c2),
        }
    }
    Ok(())
}

fn apply_left<T: Scalar>(
    op: Op,
    kk: usize,
    kb: usize,
    v: &TileView<'_, T>,
    t: &TileView<'_, T>,
    c1: &mut TileViewMut<'_, T>,
    c2: &mut TileViewMut<'_, T>,
) {
    let (m, n) = (v.mb(), c2.nb());

    // W = C1(kk.., :) + V_b^T C2, kb × n
    let mut w = vec![T::zero(); kb * n];
    for c in 0..n {
        for p in 0..kb {
            let mut sum = c1.get(kk + p, c);
            for row in 0..m {
                sum += v.get(row, kk + p) * c2.get(row, c);
            }
            w[p + c * kb] = sum;
        }
    }

    // W = op(T_b) W
    let mut tw = vec![T::zero(); kb * n];
    for c in 0..n {
        for p in 0..kb {
            let mut sum = T::zero();
            for q in 0..kb {
                sum += t_entry(op, t, kk, p, q) * w[q + c * kb];
            }
            tw[p + c * kb] = sum;
        }
    }

    // C1 -= W, C2 -= V_b W
    for c in 0..n {
        for p in 0..kb {
            *c1.get_mut(kk + p, c) -= tw[p + c * kb];
        }
        for row in 0..m {
            let mut sum = T::zero();
            for p in 0..kb {
                sum += v.get(row, kk + p) * tw[p + c * kb];
            }
            *c2.get_mut(row, c) -= sum;
        }
    }
}

fn apply_right<T: Scalar>(
    op: Op,
    kk: usize,
    kb: usize,
    v: &TileView<'_, T>,
    t: &TileView<'_, T>,
    c1: &mut TileViewMut<'_, T>,
    c2: &mut TileViewMut<'_, T>,
) {
    let (m, rows) = (v.mb(), c2.mb());

    // W = C1(:, kk..) + C2 V_b, rows × kb
    let mut w = vec![T::zero(); rows * kb];
    for p in 0..kb {
        for r in 0..rows {
            let mut sum = c1.get(r, kk + p);
            for col in 0..m {
                sum += c2.get(r, col) * v.get(col, kk + p);
            }
            w[r + p * rows] = sum;
        }
    }

    // W = W op(T_b)
    let mut wt = vec![T::zero(); rows * kb];
    for q in 0..kb {
        for r in 0..rows {
            let mut sum = T::zero();
            for p in 0..kb {
                sum += w[r + p * rows] * t_entry(op, t, kk, p, q);
            }
            wt[r + q * rows] = sum;
        }
    }

    // C1 -= W, C2 -= W V_b^T
    for p in 0..kb {
        for r in 0..rows {
            *c1.get_mut(r, kk + p) -= wt[r + p * rows];
        }
    }
    for col in 0..m {
        for r in 0..rows {
            let mut sum = T::zero();
            for p in 0..kb {
                sum += wt[r + p * rows] * v.get(col, kk + p);
            }
            *c2.get_mut(r, col) -= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample(seed: usize, len: usize) -> Vec<f64> {
        (0..len)
            .map(|x| ((seed * 131 + x * 17) as f64 * 0.37).sin())
            .collect()
    }

    fn upper(k: usize, seed: usize) -> Vec<f64> {
        let mut r = sample(seed, k * k);
        for j in 0..k {
            for i in j + 1..k {
                r[i + j * k] = 0.0;
            }
            r[j + j * k] += 2.0;
        }
        r
    }

    /// Factor a random `[R; A]` and return (R', V, T).
    fn factor(k: usize, m: usize, ib: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        let r0 = upper(k, 1);
        let a0 = sample(2, m * k);
        let (mut r, mut a, mut t) = (r0.clone(), a0.clone(), vec![0.0; ib * k]);
        tpqrt(
            ib,
            &mut TileViewMut::new(&mut r, k, k, k).unwrap(),
            &mut TileViewMut::new(&mut a, m, k, m).unwrap(),
            &mut TileViewMut::new(&mut t, ib, k, ib).unwrap(),
        )
        .unwrap();
        (r0, a0, r, a, t)
    }

    #[test]
    fn test_tpqrt_then_apply_transpose_recovers_r() {
        let (k, m, ib) = (4, 5, 2);
        let (r0, a0, r, v, t) = factor(k, m, ib);

        // Q^T [R0; A0] = [R; 0]
        let (mut c1, mut c2) = (r0, a0);
        tpmqrt(
            Side::Left,
            Op::Trans,
            ib,
            &TileView::new(&v, m, k, m).unwrap(),
            &TileView::new(&t, ib, k, ib).unwrap(),
            &mut TileViewMut::new(&mut c1, k, k, k).unwrap(),
            &mut TileViewMut::new(&mut c2, m, k, m).unwrap(),
        )
        .unwrap();
        for (x, y) in c1.iter().zip(&r) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
        for x in &c2 {
            assert_abs_diff_eq!(*x, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_left_and_right_applications_are_inverse() {
        let (k, m, ib) = (3, 3, 2);
        let (_, _, _, v, t) = factor(k, m, ib);
        let vv = TileView::new(&v, m, k, m).unwrap();
        let tv = TileView::new(&t, ib, k, ib).unwrap();

        for side in [Side::Left, Side::Right] {
            let orig1 = sample(7, 9);
            let orig2 = sample(8, 9);
            let (mut c1, mut c2) = (orig1.clone(), orig2.clone());
            for op in [Op::NoTrans, Op::Trans] {
                tpmqrt(
                    side,
                    op,
                    ib,
                    &vv,
                    &tv,
                    &mut TileViewMut::new(&mut c1, 3, 3, 3).unwrap(),
                    &mut TileViewMut::new(&mut c2, 3, 3, 3).unwrap(),
                )
                .unwrap();
            }
            for (x, y) in c1.iter().chain(&c2).zip(orig1.iter().chain(&orig2)) {
                assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_tpmqrt_rejects_bad_shapes() {
        let v = [0.0_f64; 6];
        let t = [0.0_f64; 4];
        let mut c1 = [0.0_f64; 4];
        let mut c2 = [0.0_f64; 4];
        let err = tpmqrt(
            Side::Left,
            Op::NoTrans,
            2,
            &TileView::new(&v, 3, 2, 3).unwrap(),
            &TileView::new(&t, 2, 2, 2).unwrap(),
            &mut TileViewMut::new(&mut c1, 2, 2, 2).unwrap(),
            &mut TileViewMut::new(&mut c2, 2, 2, 2).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, DistError::Kernel { kernel: "tpmqrt", .. }));
    }
}
