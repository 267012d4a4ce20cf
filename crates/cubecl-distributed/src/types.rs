//! BLAS-style parameter enums shared by tiles, kernels and routines.

use core::fmt;

/// Side parameter for operations that apply a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Transform appears on the left: op(Q) * C
    Left,
    /// Transform appears on the right: C * op(Q)
    Right,
}

/// Transpose mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// No transpose
    NoTrans,
    /// Transpose A -> A^T
    Trans,
    /// Conjugate transpose A -> A^H (same as Trans for real types)
    ConjTrans,
}

impl Op {
    /// Whether the operand is transposed (conjugated or not).
    pub fn is_trans(&self) -> bool {
        !matches!(self, Op::NoTrans)
    }

    /// Compose two transpositions: `op(op(A))`.
    pub fn compose(self, other: Op) -> Op {
        match (self, other) {
            (Op::NoTrans, o) | (o, Op::NoTrans) => o,
            (Op::Trans, Op::Trans) | (Op::ConjTrans, Op::ConjTrans) => Op::NoTrans,
            // Trans after ConjTrans leaves a conjugation, which is a no-op for reals.
            _ => Op::NoTrans,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::NoTrans => write!(f, "n"),
            Op::Trans => write!(f, "t"),
            Op::ConjTrans => write!(f, "c"),
        }
    }
}

/// Triangle type (upper or lower)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uplo {
    /// Upper triangular
    Upper,
    /// Lower triangular
    Lower,
    /// Full matrix
    General,
}

impl Uplo {
    /// Triangle seen through a transposition.
    pub fn flip(self) -> Uplo {
        match self {
            Uplo::Upper => Uplo::Lower,
            Uplo::Lower => Uplo::Upper,
            Uplo::General => Uplo::General,
        }
    }
}

/// Diagonal type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diag {
    /// Use diagonal elements of A
    NonUnit,
    /// Assume diagonal elements are 1 (unit triangular)
    Unit,
}

/// Element layout of tile storage.
///
/// Only column-major is produced by this crate; the enum exists so that
/// transfers state the layout they expect, as the interchange format does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    /// Column-major (Fortran/BLAS convention)
    #[default]
    ColMajor,
}

/// Ceiling division.
pub(crate) fn ceildiv(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}
