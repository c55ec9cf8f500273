//! # Dominance Analysis
//!
//! This module computes the dominator tree and the post-dominator tree of a
//! control flow graph.
//!
//! ## Dominator Tree
//! A node X dominates a node Y if every path from the entry node to Y must pass through X.
//! The immediate dominator of a node is its closest dominator (excluding itself).
//!
//! ## Post-Dominator Tree
//! A node X post-dominates Y if every path from Y to a function exit passes
//! through X. It is computed as the dominator tree of the reversed CFG rooted
//! at a virtual exit that every returning block flows into.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{cfg, BasicBlockId, MirFunction};

/// A (post-)dominator tree represented as a mapping from each block to its
/// immediate (post-)dominator
///
/// For a post-dominator tree, blocks whose immediate post-dominator is the
/// virtual exit have no parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DominatorTree {
    idom: FxHashMap<BasicBlockId, BasicBlockId>,
    nodes: FxHashSet<BasicBlockId>,
}

impl DominatorTree {
    /// The immediate dominator of `block`, if it has one in the tree
    pub fn immediate_dominator(&self, block: BasicBlockId) -> Option<BasicBlockId> {
        self.idom.get(&block).copied()
    }

    /// Returns true if `block` is part of the tree (reachable from its root)
    pub fn contains(&self, block: BasicBlockId) -> bool {
        self.nodes.contains(&block)
    }

    /// Returns true if `a` dominates `b`. Every block dominates itself.
    pub fn dominates(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        if a == b {
            return true;
        }
        if !self.contains(a) || !self.contains(b) {
            return false;
        }

        let mut current = b;
        while let Some(parent) = self.immediate_dominator(current) {
            if parent == a {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Returns true if `a` dominates `b` and `a != b`
    pub fn strictly_dominates(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Number of blocks in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no blocks
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Post-dominance uses the same representation, rooted at the virtual exit
pub type PostDominatorTree = DominatorTree;

/// Computes the dominator tree for a function using the Cooper-Harvey-Kennedy algorithm
///
/// ## Algorithm
/// 1. Compute blocks in reverse postorder (RPO)
/// 2. Initialize entry block's idom to itself
/// 3. Iterate until convergence, updating idoms using the intersect function
pub fn compute_dominator_tree(function: &MirFunction) -> DominatorTree {
    let rpo = cfg::reverse_postorder(function);
    let predecessors = cfg::build_predecessor_map(function);

    let nodes: Vec<Node> = rpo.iter().map(|&block| Node::Block(block)).collect();
    let idom = cooper_harvey_kennedy(&nodes, |node| match node {
        Node::Block(block) => predecessors
            .get(&block)
            .map(|preds| preds.iter().map(|&p| Node::Block(p)).collect())
            .unwrap_or_default(),
        Node::VirtualExit => Vec::new(),
    });

    into_tree(idom)
}

/// Computes the post-dominator tree for a function
///
/// Blocks ending in `return` or `unreachable` are the predecessors of the
/// virtual exit in the reversed graph. Blocks that cannot reach any exit
/// (infinite loops) are absent from the tree.
pub fn compute_post_dominator_tree(function: &MirFunction) -> PostDominatorTree {
    let reachable = function.reachable_blocks();

    // Reverse postorder of the reversed CFG, starting at the virtual exit
    let predecessors = cfg::build_predecessor_map(function);
    let exits: Vec<BasicBlockId> = function
        .basic_blocks()
        .filter(|(id, block)| reachable.contains(id) && block.terminator.ends_function())
        .map(|(id, _)| id)
        .collect();

    let reverse_successors = |node: Node| -> Vec<Node> {
        match node {
            Node::VirtualExit => exits.iter().map(|&b| Node::Block(b)).collect(),
            Node::Block(block) => predecessors
                .get(&block)
                .map(|preds| {
                    preds
                        .iter()
                        .filter(|p| reachable.contains(p))
                        .map(|&p| Node::Block(p))
                        .collect()
                })
                .unwrap_or_default(),
        }
    };

    let mut visited = FxHashSet::default();
    let mut postorder = Vec::new();
    let mut stack = vec![(Node::VirtualExit, reverse_successors(Node::VirtualExit), 0usize)];
    visited.insert(Node::VirtualExit);
    while let Some((node, succs, next)) = stack.last_mut() {
        if let Some(&succ) = succs.get(*next) {
            *next += 1;
            if visited.insert(succ) {
                let succ_succs = reverse_successors(succ);
                stack.push((succ, succ_succs, 0));
            }
        } else {
            postorder.push(*node);
            stack.pop();
        }
    }
    postorder.reverse();

    // In the reversed graph, the "predecessors" of a block are its CFG successors
    let idom = cooper_harvey_kennedy(&postorder, |node| match node {
        Node::VirtualExit => Vec::new(),
        Node::Block(block) => {
            let mut preds: Vec<Node> = cfg::get_successors(function, block)
                .into_iter()
                .map(Node::Block)
                .collect();
            if function.basic_blocks[block].terminator.ends_function() {
                preds.push(Node::VirtualExit);
            }
            preds
        }
    });

    into_tree(idom)
}

/// A node of the graph being analyzed: a real block or the virtual exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Block(BasicBlockId),
    VirtualExit,
}

/// Iterative immediate-dominator computation over nodes given in RPO
///
/// `preds` returns the predecessors of a node in the graph being analyzed;
/// predecessors absent from `rpo` are ignored.
fn cooper_harvey_kennedy(
    rpo: &[Node],
    preds: impl Fn(Node) -> Vec<Node>,
) -> FxHashMap<Node, Node> {
    let mut idom = FxHashMap::default();
    let Some(&root) = rpo.first() else {
        return idom;
    };

    let rpo_number: FxHashMap<Node, usize> =
        rpo.iter().enumerate().map(|(i, &node)| (node, i)).collect();

    idom.insert(root, root);

    let mut changed = true;
    while changed {
        changed = false;

        for &node in rpo.iter().skip(1) {
            let processed: Vec<Node> = preds(node)
                .into_iter()
                .filter(|pred| idom.contains_key(pred))
                .collect();

            let Some((&first, rest)) = processed.split_first() else {
                continue;
            };

            let mut new_idom = first;
            for &pred in rest {
                new_idom = intersect(pred, new_idom, &idom, &rpo_number);
            }

            if idom.get(&node) != Some(&new_idom) {
                idom.insert(node, new_idom);
                changed = true;
            }
        }
    }

    idom
}

/// Cooper's intersect function for finding common dominator
fn intersect(
    mut b1: Node,
    mut b2: Node,
    idom: &FxHashMap<Node, Node>,
    rpo_number: &FxHashMap<Node, usize>,
) -> Node {
    while b1 != b2 {
        while rpo_number[&b1] > rpo_number[&b2] {
            b1 = idom[&b1];
        }
        while rpo_number[&b2] > rpo_number[&b1] {
            b2 = idom[&b2];
        }
    }
    b1
}

/// Drops the root self-loop and every edge into the virtual exit
fn into_tree(idom: FxHashMap<Node, Node>) -> DominatorTree {
    let mut tree = DominatorTree::default();
    for (node, parent) in idom {
        let Node::Block(block) = node else {
            continue;
        };
        tree.nodes.insert(block);
        if let Node::Block(parent) = parent {
            if parent != block {
                tree.idom.insert(block, parent);
            }
        }
    }
    tree
}
