//! # Control Flow Graph Utilities
//!
//! This module provides common utilities for working with control flow graphs:
//! predecessor/successor queries and traversal orders. Edges are always derived
//! from block terminators.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::{BasicBlockId, MirFunction};

/// Successor list of a single block (at most two for `If`)
pub type Successors = SmallVec<[BasicBlockId; 2]>;

/// Get all successor blocks of a given block
pub fn get_successors(function: &MirFunction, block_id: BasicBlockId) -> Successors {
    function
        .basic_blocks
        .get(block_id)
        .map(|block| block.terminator.target_blocks().into_iter().collect())
        .unwrap_or_default()
}

/// Get all predecessor blocks of a given block, in block order
pub fn get_predecessors(function: &MirFunction, target_id: BasicBlockId) -> Vec<BasicBlockId> {
    function
        .basic_blocks()
        .filter(|(_, block)| block.terminator.target_blocks().contains(&target_id))
        .map(|(id, _)| id)
        .collect()
}

/// Build the predecessor map of the whole function
///
/// Every block gets an entry, even when it has no predecessors. Predecessor
/// lists are sorted by block id and contain no duplicates.
pub fn build_predecessor_map(function: &MirFunction) -> FxHashMap<BasicBlockId, Vec<BasicBlockId>> {
    let mut predecessors: FxHashMap<BasicBlockId, Vec<BasicBlockId>> = FxHashMap::default();
    for (block_id, _) in function.basic_blocks() {
        predecessors.entry(block_id).or_default();
    }
    for (block_id, block) in function.basic_blocks() {
        for successor in block.terminator.target_blocks() {
            predecessors.entry(successor).or_default().push(block_id);
        }
    }
    predecessors
}

/// Computes the blocks reachable from the entry in reverse postorder
pub fn reverse_postorder(function: &MirFunction) -> Vec<BasicBlockId> {
    let mut visited = FxHashSet::default();
    let mut postorder = Vec::new();

    // Iterative DFS; the second tuple field is the next successor to visit.
    let mut stack: Vec<(BasicBlockId, usize)> = vec![(function.entry_block, 0)];
    visited.insert(function.entry_block);

    while let Some((block, next)) = stack.last_mut() {
        let successors = get_successors(function, *block);
        if let Some(&successor) = successors.get(*next) {
            *next += 1;
            if visited.insert(successor) {
                stack.push((successor, 0));
            }
        } else {
            postorder.push(*block);
            stack.pop();
        }
    }

    postorder.reverse();
    postorder
}
