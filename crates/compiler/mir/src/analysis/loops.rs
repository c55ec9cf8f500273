//! # Natural Loop Analysis
//!
//! Identifies natural loops and their nesting structure.
//!
//! A natural loop is defined by one or more back edges `tail -> header` where
//! the header dominates the tail. Its body is every block that can reach a
//! tail without passing through the header. Back edges sharing a header form a
//! single loop.
//!
//! Besides the block set, each [`Loop`] records the blocks that loop
//! transformations care about:
//!
//! ```text
//!        guard ──────────────┐        (optional; can skip the loop)
//!          │                 │
//!      preheader             │
//!          │                 │
//!   ┌─► header               │
//!   │      │                 │
//!   │     ...                │
//!   │      │                 │
//!   └── latch (exiting)      │
//!          │                 │
//!        exit ──────────► (join)
//! ```

use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};

use super::dominance::DominatorTree;
use crate::{cfg, BasicBlockId, MirFunction, Terminator};

index_vec::define_index_type! {
    /// Identifier of a loop within a [`LoopForest`]
    pub struct LoopId = usize;
}

/// A natural loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    /// Sole entry block of the loop
    pub header: BasicBlockId,
    /// Source of the back edge, when there is exactly one
    pub latch: Option<BasicBlockId>,
    /// All blocks of the loop (nested loops included), in reverse postorder
    pub blocks: Vec<BasicBlockId>,
    block_set: FxHashSet<BasicBlockId>,
    /// Innermost enclosing loop
    pub parent: Option<LoopId>,
    /// Directly nested loops, in program order
    pub children: Vec<LoopId>,
    /// Nesting depth; top-level loops have depth 1
    pub depth: usize,
    /// Unique out-of-loop predecessor of the header that only jumps to it
    pub preheader: Option<BasicBlockId>,
    /// The only block with an edge leaving the loop
    pub exiting: Option<BasicBlockId>,
    /// Target of the only edge leaving the loop
    pub exit: Option<BasicBlockId>,
    /// Conditional branch that either enters the preheader or skips the loop
    pub guard: Option<BasicBlockId>,
}

impl Loop {
    /// Returns true if `block` belongs to this loop (or one nested in it)
    pub fn contains(&self, block: BasicBlockId) -> bool {
        self.block_set.contains(&block)
    }

    pub const fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }

    /// The block standing for "this loop is entered": the guard if any,
    /// otherwise the header
    pub fn entry_block(&self) -> BasicBlockId {
        self.guard.unwrap_or(self.header)
    }

    /// Blocks other than the header and the latch, in reverse postorder
    pub fn body_blocks(&self) -> impl Iterator<Item = BasicBlockId> + '_ {
        self.blocks
            .iter()
            .copied()
            .filter(move |&block| block != self.header && Some(block) != self.latch)
    }

    /// True for a loop made of a single block that branches to itself
    pub fn is_single_block(&self) -> bool {
        self.blocks.len() == 1
    }
}

/// All natural loops of a function
///
/// Loops are kept in *discovery order*: a post-order walk of the loop nest
/// (inner loops before the loop containing them) with sibling loops visited
/// in reverse program order. Walking that order backwards therefore yields
/// sibling loops in program order.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    loops: IndexVec<LoopId, Loop>,
    discovery_order: Vec<LoopId>,
    innermost: FxHashMap<BasicBlockId, LoopId>,
}

impl LoopForest {
    /// Computes the loop forest of `function` from its dominator tree
    pub fn compute(function: &MirFunction, dom_tree: &DominatorTree) -> Self {
        let rpo = cfg::reverse_postorder(function);
        let rpo_index: FxHashMap<BasicBlockId, usize> =
            rpo.iter().enumerate().map(|(i, &block)| (block, i)).collect();
        let predecessors = cfg::build_predecessor_map(function);
        let reachable_preds = |block: BasicBlockId| -> Vec<BasicBlockId> {
            predecessors
                .get(&block)
                .map(|preds| {
                    preds
                        .iter()
                        .copied()
                        .filter(|pred| rpo_index.contains_key(pred))
                        .collect()
                })
                .unwrap_or_default()
        };

        // Headers are visited in RPO, so an enclosing loop always gets a
        // smaller id than the loops nested in it.
        let mut loops: IndexVec<LoopId, Loop> = IndexVec::new();
        for &header in &rpo {
            let tails: Vec<BasicBlockId> = reachable_preds(header)
                .into_iter()
                .filter(|&pred| dom_tree.dominates(header, pred))
                .collect();
            if tails.is_empty() {
                continue;
            }

            let mut block_set = FxHashSet::default();
            block_set.insert(header);
            let mut worklist = Vec::new();
            for &tail in &tails {
                if block_set.insert(tail) {
                    worklist.push(tail);
                }
            }
            while let Some(block) = worklist.pop() {
                for pred in reachable_preds(block) {
                    if block_set.insert(pred) {
                        worklist.push(pred);
                    }
                }
            }

            let mut blocks: Vec<BasicBlockId> = block_set.iter().copied().collect();
            blocks.sort_by_key(|block| rpo_index[block]);

            loops.push(Loop {
                header,
                latch: if tails.len() == 1 { Some(tails[0]) } else { None },
                blocks,
                block_set,
                parent: None,
                children: Vec::new(),
                depth: 1,
                preheader: None,
                exiting: None,
                exit: None,
                guard: None,
            });
        }

        // Nesting: the parent is the smallest other loop containing the header
        let ids: Vec<LoopId> = loops.indices().collect();
        for &id in &ids {
            let header = loops[id].header;
            let parent = ids
                .iter()
                .copied()
                .filter(|&other| other != id && loops[other].contains(header))
                .min_by_key(|&other| loops[other].blocks.len());
            loops[id].parent = parent;
            if let Some(parent) = parent {
                loops[parent].children.push(id);
                loops[id].depth = loops[parent].depth + 1;
            }
        }

        let mut innermost = FxHashMap::default();
        for (id, data) in loops.iter_enumerated() {
            for &block in &data.blocks {
                innermost.insert(block, id);
            }
        }

        for data in loops.iter_mut() {
            Self::compute_boundary_blocks(function, data, &reachable_preds);
        }

        let mut discovery_order = Vec::with_capacity(loops.len());
        let top_level: Vec<LoopId> = ids
            .iter()
            .copied()
            .filter(|&id| loops[id].parent.is_none())
            .collect();
        for &id in top_level.iter().rev() {
            Self::post_order(&loops, id, &mut discovery_order);
        }

        Self {
            loops,
            discovery_order,
            innermost,
        }
    }

    /// Fills in preheader, exiting/exit and guard blocks of `data`
    fn compute_boundary_blocks(
        function: &MirFunction,
        data: &mut Loop,
        reachable_preds: &impl Fn(BasicBlockId) -> Vec<BasicBlockId>,
    ) {
        let outside_preds: Vec<BasicBlockId> = reachable_preds(data.header)
            .into_iter()
            .filter(|&pred| !data.contains(pred))
            .collect();
        if let [candidate] = outside_preds.as_slice() {
            if cfg::get_successors(function, *candidate).as_slice() == [data.header] {
                data.preheader = Some(*candidate);
            }
        }

        let mut exit_edges = Vec::new();
        for &block in &data.blocks {
            for successor in cfg::get_successors(function, block) {
                if !data.contains(successor) {
                    exit_edges.push((block, successor));
                }
            }
        }
        if let [(exiting, exit)] = exit_edges.as_slice() {
            data.exiting = Some(*exiting);
            data.exit = Some(*exit);
        }

        let (Some(preheader), Some(exit)) = (data.preheader, data.exit) else {
            return;
        };
        let guard_preds = reachable_preds(preheader);
        let [guard] = guard_preds.as_slice() else {
            return;
        };
        let Terminator::If {
            then_target,
            else_target,
            ..
        } = function.basic_blocks[*guard].terminator
        else {
            return;
        };
        let skip = if then_target == preheader {
            else_target
        } else if else_target == preheader {
            then_target
        } else {
            return;
        };
        if skip == preheader {
            return;
        }
        let skips_past_exit = skip == exit
            || cfg::get_successors(function, exit).as_slice() == [skip];
        if skips_past_exit {
            data.guard = Some(*guard);
        }
    }

    fn post_order(loops: &IndexVec<LoopId, Loop>, id: LoopId, out: &mut Vec<LoopId>) {
        for &child in loops[id].children.iter().rev() {
            Self::post_order(loops, child, out);
        }
        out.push(id);
    }

    /// Returns the loop with the given id
    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id]
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Loop ids in discovery order
    pub fn discovery_order(&self) -> &[LoopId] {
        &self.discovery_order
    }

    /// Iterates loops in discovery order
    pub fn loops(&self) -> impl Iterator<Item = (LoopId, &Loop)> + '_ {
        self.discovery_order.iter().map(|&id| (id, &self.loops[id]))
    }

    /// The innermost loop containing `block`
    pub fn loop_for(&self, block: BasicBlockId) -> Option<LoopId> {
        self.innermost.get(&block).copied()
    }

    /// Returns true if `block` belongs to `loop_id` or a loop nested in it
    pub fn contains(&self, loop_id: LoopId, block: BasicBlockId) -> bool {
        self.loops[loop_id].contains(block)
    }

    /// Outermost loops, in program order
    pub fn top_level(&self) -> Vec<LoopId> {
        self.loops
            .iter_enumerated()
            .filter(|(_, data)| data.parent.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    /// Groups of at least two loops sharing the same parent
    ///
    /// Each group lists its loops in program order (reverse discovery order).
    /// Groups nested deeper come first, so inner loops are considered before
    /// the loops enclosing them.
    pub fn sibling_groups(&self) -> Vec<Vec<LoopId>> {
        let mut groups: Vec<(usize, Vec<LoopId>)> = self
            .discovery_order
            .iter()
            .map(|&id| &self.loops[id])
            .filter(|data| data.children.len() >= 2)
            .map(|data| (data.depth + 1, data.children.clone()))
            .collect();

        let top_level = self.top_level();
        if top_level.len() >= 2 {
            groups.push((1, top_level));
        }

        groups.sort_by(|a, b| b.0.cmp(&a.0));
        groups.into_iter().map(|(_, group)| group).collect()
    }
}

impl std::ops::Index<LoopId> for LoopForest {
    type Output = Loop;

    fn index(&self, id: LoopId) -> &Loop {
        &self.loops[id]
    }
}
