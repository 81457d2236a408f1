pub mod context;
pub mod ops_check;
pub mod ops_search;
pub mod ops_solve;
pub mod ops_tree;

pub use context::{ContextOptions, SolveContext};
