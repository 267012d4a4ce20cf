//! Kernel descriptions and the kernel/target support matrix.

use crate::error::{DistError, DistResult};
use crate::kernels;
use crate::options::Target;
use crate::scalar::Scalar;
use crate::tile::{TileView, TileViewMut};
use crate::types::{Op, Side, Uplo};

/// Kernel family, without arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelKind {
    /// Matrix multiply
    Gemm,
    /// Set diagonal and off-diagonal entries
    Geset,
    /// Trapezoid add
    Tzadd,
    /// Scale by a ratio
    Gescale,
    /// Two-tile block reflector application
    Tpmqrt,
}

impl KernelKind {
    /// Name used in errors and traces.
    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::Gemm => "gemm",
            KernelKind::Geset => "geset",
            KernelKind::Tzadd => "tzadd",
            KernelKind::Gescale => "gescale",
            KernelKind::Tpmqrt => "tpmqrt",
        }
    }

    /// Number of read operands and write operands of one task.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            KernelKind::Gemm => (2, 1),
            KernelKind::Geset | KernelKind::Gescale => (0, 1),
            KernelKind::Tzadd => (1, 1),
            KernelKind::Tpmqrt => (2, 2),
        }
    }
}

/// Whether `kind` has an implementation for `target`.
///
/// The block reflector update is provided for host targets only.
pub fn supports(kind: KernelKind, target: Target) -> bool {
    match kind {
        KernelKind::Tpmqrt => matches!(target, Target::HostTask | Target::HostNest),
        KernelKind::Gemm | KernelKind::Geset | KernelKind::Tzadd | KernelKind::Gescale => true,
    }
}

/// A tile kernel with its scalar arguments.
///
/// Operand order per task:
/// * `Gemm`: reads `[A, B]`, writes `[C]`
/// * `Geset`, `Gescale`: writes `[A]`
/// * `Tzadd`: reads `[A]`, writes `[B]`
/// * `Tpmqrt`: reads `[V, T]`, writes `[C1, C2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel<T> {
    /// `C = alpha * op_a(A) * op_b(B) + beta * C`
    Gemm {
        /// Scale of the product
        alpha: T,
        /// Scale of C
        beta: T,
        /// Transposition of A
        op_a: Op,
        /// Transposition of B
        op_b: Op,
    },
    /// Off-diagonal entries to `offdiag`, diagonal to `diag`.
    Geset {
        /// Off-diagonal value
        offdiag: T,
        /// Diagonal value
        diag: T,
    },
    /// `B = alpha * A + beta * B` on the `uplo` trapezoid.
    Tzadd {
        /// Triangle updated
        uplo: Uplo,
        /// Scale of A
        alpha: T,
        /// Scale of B
        beta: T,
    },
    /// `A = (numer / denom) * A`
    Gescale {
        /// Numerator
        numer: T,
        /// Denominator
        denom: T,
    },
    /// Apply `op(Q)` of a triangle-on-square factorization from `side`.
    Tpmqrt {
        /// Side Q is applied from
        side: Side,
        /// Q or its transpose
        op: Op,
        /// Inner blocking of the factorization
        ib: usize,
    },
}

/// A read operand: the stored block and the tile's transposition flag.
pub(crate) type ReadOperand<'a, T> = (TileView<'a, T>, Op);

/// A write operand: the stored block and the tile's transposition flag.
pub(crate) type WriteOperand<'a, T> = (TileViewMut<'a, T>, Op);

/// Read and write operands of one task.
pub(crate) type TaskOperands<'a, T> = (Vec<ReadOperand<'a, T>>, Vec<WriteOperand<'a, T>>);

impl<T: Scalar> Kernel<T> {
    /// Kernel family.
    pub fn kind(&self) -> KernelKind {
        match self {
            Kernel::Gemm { .. } => KernelKind::Gemm,
            Kernel::Geset { .. } => KernelKind::Geset,
            Kernel::Tzadd { .. } => KernelKind::Tzadd,
            Kernel::Gescale { .. } => KernelKind::Gescale,
            Kernel::Tpmqrt { .. } => KernelKind::Tpmqrt,
        }
    }

    /// Kernel name.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Run on the operands of every task of a batch, in order.
    pub(crate) fn apply_batch(&self, batch: &mut [TaskOperands<'_, T>]) -> DistResult<()> {
        batch
            .iter_mut()
            .try_for_each(|(reads, writes)| self.apply(reads, writes))
    }

    /// Run on the operands of one task.
    pub(crate) fn apply(
        &self,
        reads: &[ReadOperand<'_, T>],
        writes: &mut [WriteOperand<'_, T>],
    ) -> DistResult<()> {
        let name = self.name();
        match (*self, reads, writes) {
            (Kernel::Gemm { alpha, beta, op_a, op_b }, [(a, ta), (b, tb)], [(c, tc)]) => {
                let (op_a, op_b) = (ta.compose(op_a), tb.compose(op_b));
                if tc.is_trans() {
                    // C^T = alpha * op_b(B)^T * op_a(A)^T + beta * C^T
                    kernels::gemm(
                        op_b.compose(Op::Trans),
                        op_a.compose(Op::Trans),
                        alpha,
                        b,
                        a,
                        beta,
                        c,
                    )
                } else {
                    kernels::gemm(op_a, op_b, alpha, a, b, beta, c)
                }
            }
            (Kernel::Geset { offdiag, diag }, [], [(a, _)]) => {
                kernels::geset(offdiag, diag, a);
                Ok(())
            }
            (Kernel::Tzadd { uplo, alpha, beta }, [(a, ta)], [(b, tb)]) => {
                if ta.is_trans() != tb.is_trans() {
                    return Err(DistError::kernel(name, "A and B differ in transposition"));
                }
                let uplo = if ta.is_trans() { uplo.flip() } else { uplo };
                kernels::tzadd(uplo, alpha, a, beta, b)
            }
            (Kernel::Gescale { numer, denom }, [], [(a, _)]) => {
                kernels::gescale(numer, denom, a)
            }
            (Kernel::Tpmqrt { side, op, ib }, [(v, tv), (t, tt)], [(c1, t1), (c2, t2)]) => {
                if [*tv, *tt, *t1, *t2].iter().any(|op| op.is_trans()) {
                    return Err(DistError::kernel(name, "operands must not be transposed"));
                }
                kernels::tpmqrt(side, op, ib, v, t, c1, c2)
            }
            (_, reads, writes) => Err(arity_error(self.kind(), reads.len(), writes.len())),
        }
    }
}

pub(crate) fn arity_error(kind: KernelKind, reads: usize, writes: usize) -> DistError {
    let (r, w) = kind.arity();
    DistError::kernel(
        kind.name(),
        format!("expects {r} read and {w} write operands, got {reads} and {writes}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_matrix() {
        for target in Target::ALL {
            assert!(supports(KernelKind::Gemm, target));
            assert!(supports(KernelKind::Gescale, target));
        }
        assert!(supports(KernelKind::Tpmqrt, Target::HostTask));
        assert!(supports(KernelKind::Tpmqrt, Target::HostNest));
        assert!(!supports(KernelKind::Tpmqrt, Target::HostBatch));
        assert!(!supports(KernelKind::Tpmqrt, Target::Devices));
    }

    #[test]
    fn test_gemm_into_transposed_output() {
        // A = [1 2; 3 4], B = I, C stored transposed
        let a = [1.0_f64, 3.0, 2.0, 4.0];
        let b = [1.0_f64, 0.0, 0.0, 1.0];
        let mut c = [0.0_f64; 4];
        let kernel = Kernel::Gemm {
            alpha: 1.0,
            beta: 0.0,
            op_a: Op::NoTrans,
            op_b: Op::NoTrans,
        };
        let reads = [
            (TileView::new(&a, 2, 2, 2).unwrap(), Op::NoTrans),
            (TileView::new(&b, 2, 2, 2).unwrap(), Op::NoTrans),
        ];
        let mut writes = [(TileViewMut::new(&mut c, 2, 2, 2).unwrap(), Op::Trans)];
        kernel.apply(&reads, &mut writes).unwrap();
        // Stored block is A^T.
        assert_eq!(c, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_wrong_operand_count() {
        let mut a = [0.0_f32; 4];
        let kernel = Kernel::Tzadd {
            uplo: Uplo::General,
            alpha: 1.0,
            beta: 1.0,
        };
        let mut writes = [(TileViewMut::new(&mut a, 2, 2, 2).unwrap(), Op::NoTrans)];
        let err = kernel.apply(&[], &mut writes).unwrap_err();
        assert!(matches!(err, DistError::Kernel { kernel: "tzadd", .. }));
    }
}
