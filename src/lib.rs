//! Middle end of the Dragon language compiler. Lowers an abstract syntax
//! tree (supplied by an external frontend) into linear three-address IR,
//! partitions the IR into basic blocks with explicit control-flow edges,
//! computes dominator trees and dominance frontiers, and converts each
//! function into SSA form for consumption by a target backend.

pub mod error;
pub mod frontend;
pub mod index;
pub mod intern;
pub mod middle;

pub use error::{CompileError, CompileResult};
