//! # Analysis Module
//!
//! Read-only analyses over a MIR function: dominance, natural loops and
//! scalar evolution. Results are snapshots; any CFG mutation makes them stale.

pub mod dominance;
pub mod loops;
pub mod scev;


pub use dominance::{
    compute_dominator_tree, compute_post_dominator_tree, DominatorTree, PostDominatorTree,
};
pub use loops::{Loop, LoopForest, LoopId};
pub use scev::{Scev, ScalarEvolution};

use crate::MirFunction;

/// Every analysis the loop passes consume, computed together
#[derive(Debug)]
pub struct FunctionAnalyses {
    pub dom_tree: DominatorTree,
    pub post_dom_tree: PostDominatorTree,
    pub loops: LoopForest,
}

impl FunctionAnalyses {
    pub fn compute(function: &MirFunction) -> Self {
        let dom_tree = compute_dominator_tree(function);
        let post_dom_tree = compute_post_dominator_tree(function);
        let loops = LoopForest::compute(function, &dom_tree);
        Self {
            dom_tree,
            post_dom_tree,
            loops,
        }
    }
}
