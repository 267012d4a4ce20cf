//! Reduction-tree application of panel transforms.
//!
//! A panel factored across ranks by a binary tree leaves one small
//! orthogonal factor per tree node. [`ttmqr`] applies all of them to a
//! trailing block: ranks are paired level by level, the eliminated rank's
//! tiles travel to its partner, are updated together with the partner's
//! tiles, and the residual travels back. Each rank exchanges tiles in at most
//! `ceil(log2(ranks))` levels.

mod participation;
mod schedule;
mod ttmqr;

pub use participation::*;
pub use schedule::*;
pub use ttmqr::*;
