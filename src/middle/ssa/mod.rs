//! Static single assignment construction: dominance analysis over the
//! cleaned control-flow graph, then phi placement and renaming.

pub mod convert;
pub mod dominance;

pub use convert::convert_to_ssa;
pub use dominance::{compute_dominators, DominatorTree};
