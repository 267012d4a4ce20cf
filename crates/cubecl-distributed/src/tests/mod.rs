//! Test infrastructure and utilities.

pub mod test_utils;
pub mod dispatch_tests;

// Re-export CPU references for use in other tests
pub use reference::{cpu_apply, cpu_identity, cpu_matmul, cpu_tree_q, dense_tile, NodeFactors};
pub use dispatch_tests::{cpu_diag_tzadd, cpu_gescale};
pub use test_utils::{run_ranks, TreeFixture, TreeLayout};
