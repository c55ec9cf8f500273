//! # MIR Function
//!
//! This module defines the function-level MIR representation, including
//! the Control Flow Graph (CFG) of basic blocks.

use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::analysis::dominance::{compute_dominator_tree, DominatorTree};
use crate::{cfg, indent_str, BasicBlock, BasicBlockId, InstructionKind, PrettyPrint, ValueId};

/// Structural problems detected by [`MirFunction::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("entry block {0:?} does not exist")]
    MissingEntry(BasicBlockId),
    #[error("block {block:?} targets non-existent block {target:?}")]
    DanglingTarget {
        block: BasicBlockId,
        target: BasicBlockId,
    },
    #[error("block {block:?}: phi at position {position} follows a non-phi instruction")]
    MisplacedPhi { block: BasicBlockId, position: usize },
    #[error("block {block:?}: phi {phi:?} has an operand from {source_block:?}, which is not a predecessor")]
    PhiFromNonPredecessor {
        block: BasicBlockId,
        phi: ValueId,
        source_block: BasicBlockId,
    },
    #[error("block {block:?}: phi {phi:?} has {count} operands for predecessor {pred:?}")]
    PhiPredecessorMismatch {
        block: BasicBlockId,
        phi: ValueId,
        pred: BasicBlockId,
        count: usize,
    },
    #[error("value {0:?} is defined more than once")]
    DuplicateDefinition(ValueId),
    #[error("block {block:?} uses value {value:?} that is never defined")]
    UndefinedValue { block: BasicBlockId, value: ValueId },
    #[error("block {block:?} uses value {value:?} before its definition dominates it")]
    UseNotDominated { block: BasicBlockId, value: ValueId },
}

/// Where a value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueDefinition {
    /// A function parameter, available everywhere
    Parameter,
    /// The destination of the instruction at `index` in `block`
    Instruction { block: BasicBlockId, index: usize },
}

impl ValueDefinition {
    /// The defining block, or `None` for parameters
    pub const fn block(&self) -> Option<BasicBlockId> {
        match self {
            Self::Parameter => None,
            Self::Instruction { block, .. } => Some(*block),
        }
    }
}

/// The MIR for a single function, laid out as a Control Flow Graph (CFG)
///
/// # Design Notes
///
/// - Basic blocks are stored in an `IndexVec` for efficient access
/// - Each function has exactly one entry block
/// - Values are numbered per function; `next_value_id` keeps them unique
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirFunction {
    /// The name of the function (for debugging and linking)
    pub name: String,

    /// All basic blocks in this function, forming the CFG
    pub basic_blocks: IndexVec<BasicBlockId, BasicBlock>,

    /// The entry point of the function (always valid if function has blocks)
    pub entry_block: BasicBlockId,

    /// Function parameters in signature order
    pub parameters: Vec<ValueId>,

    /// Next available value ID for generating new temporaries
    pub(crate) next_value_id: usize,
}

impl MirFunction {
    /// Creates a new function with the given name and an empty entry block
    pub fn new(name: impl Into<String>) -> Self {
        let mut basic_blocks = IndexVec::new();
        let entry_block = basic_blocks.push(BasicBlock::with_name("entry"));

        Self {
            name: name.into(),
            basic_blocks,
            entry_block,
            parameters: Vec::new(),
            next_value_id: 0,
        }
    }

    /// Adds a new basic block and returns its ID
    pub fn add_basic_block(&mut self) -> BasicBlockId {
        self.basic_blocks.push(BasicBlock::new())
    }

    /// Adds a new basic block with a name and returns its ID
    pub fn add_basic_block_with_name(&mut self, name: impl Into<String>) -> BasicBlockId {
        self.basic_blocks.push(BasicBlock::with_name(name))
    }

    /// Gets a basic block by ID
    pub fn get_basic_block(&self, id: BasicBlockId) -> Option<&BasicBlock> {
        self.basic_blocks.get(id)
    }

    /// Generates a new unique value ID within this function
    pub fn new_value_id(&mut self) -> ValueId {
        let id = ValueId::new(self.next_value_id);
        self.next_value_id += 1;
        id
    }

    /// Appends a parameter and returns its value
    pub fn new_parameter(&mut self) -> ValueId {
        let id = self.new_value_id();
        self.parameters.push(id);
        id
    }

    /// Returns an iterator over all basic blocks
    pub fn basic_blocks(&self) -> impl Iterator<Item = (BasicBlockId, &BasicBlock)> {
        self.basic_blocks.iter_enumerated()
    }

    /// Returns the number of basic blocks in this function
    pub fn block_count(&self) -> usize {
        self.basic_blocks.len()
    }

    /// Maps every defined value to its definition site
    ///
    /// If a value is defined more than once the first definition wins;
    /// [`Self::validate`] reports the duplicate.
    pub fn value_definitions(&self) -> FxHashMap<ValueId, ValueDefinition> {
        let mut definitions = FxHashMap::default();
        for &param in &self.parameters {
            definitions.insert(param, ValueDefinition::Parameter);
        }
        for (block, data) in self.basic_blocks() {
            for (index, instruction) in data.instructions.iter().enumerate() {
                if let Some(dest) = instruction.destination() {
                    definitions
                        .entry(dest)
                        .or_insert(ValueDefinition::Instruction { block, index });
                }
            }
        }
        definitions
    }

    /// Returns a map from each ValueId to its usage count in the function.
    pub fn get_value_use_counts(&self) -> FxHashMap<ValueId, usize> {
        let mut counts = FxHashMap::default();
        for (_id, block) in self.basic_blocks() {
            for instruction in &block.instructions {
                for value in instruction.operands() {
                    if let Some(id) = value.as_operand() {
                        *counts.entry(id).or_default() += 1;
                    }
                }
            }
            for used_value in block.terminator.used_values() {
                *counts.entry(used_value).or_default() += 1;
            }
        }
        counts
    }

    /// Replace all occurrences of `from` value with `to` value throughout the function
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }

        for block in self.basic_blocks.iter_mut() {
            for instruction in &mut block.instructions {
                instruction.replace_value_uses(from, to);
            }
            block.terminator.replace_value_uses(from, to);
        }
    }

    /// Returns the set of blocks reachable from the entry block
    pub fn reachable_blocks(&self) -> FxHashSet<BasicBlockId> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![self.entry_block];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(block) = self.get_basic_block(current) {
                stack.extend(block.terminator.target_blocks());
            }
        }

        visited
    }

    /// Checks if a basic block is reachable from the entry block
    pub fn is_block_reachable(&self, target: BasicBlockId) -> bool {
        self.reachable_blocks().contains(&target)
    }

    /// Returns all unreachable basic blocks
    pub fn unreachable_blocks(&self) -> Vec<BasicBlockId> {
        let reachable = self.reachable_blocks();
        self.basic_blocks()
            .map(|(id, _)| id)
            .filter(|id| !reachable.contains(id))
            .collect()
    }

    /// Validates the function structure
    ///
    /// Checks:
    /// - Entry block exists and every terminator target exists
    /// - Phis are grouped at the start of their block
    /// - Phis in reachable blocks carry exactly one operand per reachable
    ///   predecessor and none from non-predecessors
    /// - Every value is defined once, and every use in a reachable block is
    ///   dominated by its definition
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.basic_blocks.get(self.entry_block).is_none() {
            return Err(ValidationError::MissingEntry(self.entry_block));
        }

        for (block_id, block) in self.basic_blocks() {
            for target in block.terminator.target_blocks() {
                if self.basic_blocks.get(target).is_none() {
                    return Err(ValidationError::DanglingTarget {
                        block: block_id,
                        target,
                    });
                }
            }

            let phi_count = block.phi_count();
            if let Some(position) = block
                .instructions
                .iter()
                .skip(phi_count)
                .position(|instruction| instruction.is_phi())
            {
                return Err(ValidationError::MisplacedPhi {
                    block: block_id,
                    position: phi_count + position,
                });
            }
        }

        let mut seen = FxHashSet::default();
        for &param in &self.parameters {
            if !seen.insert(param) {
                return Err(ValidationError::DuplicateDefinition(param));
            }
        }
        for (_, block) in self.basic_blocks() {
            for dest in block.instructions.iter().filter_map(|i| i.destination()) {
                if !seen.insert(dest) {
                    return Err(ValidationError::DuplicateDefinition(dest));
                }
            }
        }

        let reachable = self.reachable_blocks();
        let predecessors = cfg::build_predecessor_map(self);
        let dom_tree = compute_dominator_tree(self);
        let definitions = self.value_definitions();

        for (block_id, block) in self.basic_blocks() {
            if !reachable.contains(&block_id) {
                continue;
            }
            let preds = predecessors.get(&block_id).cloned().unwrap_or_default();

            for (index, instruction) in block.instructions.iter().enumerate() {
                if let InstructionKind::Phi { dest: phi, sources } = &instruction.kind {
                    let phi = *phi;
                    for (source_block, _) in sources {
                        if !preds.contains(source_block) {
                            return Err(ValidationError::PhiFromNonPredecessor {
                                block: block_id,
                                phi,
                                source_block: *source_block,
                            });
                        }
                    }
                    for &pred in preds.iter().filter(|p| reachable.contains(p)) {
                        let count = sources.iter().filter(|(b, _)| *b == pred).count();
                        if count != 1 {
                            return Err(ValidationError::PhiPredecessorMismatch {
                                block: block_id,
                                phi,
                                pred,
                                count,
                            });
                        }
                    }
                    for (source_block, value) in sources {
                        if !reachable.contains(source_block) {
                            continue;
                        }
                        if let Some(id) = value.as_operand() {
                            self.check_use(&definitions, &dom_tree, *source_block, None, id)?;
                        }
                    }
                } else {
                    for id in instruction.used_values() {
                        self.check_use(&definitions, &dom_tree, block_id, Some(index), id)?;
                    }
                }
            }

            for id in block.terminator.used_values() {
                let position = Some(block.instructions.len());
                self.check_use(&definitions, &dom_tree, block_id, position, id)?;
            }
        }

        Ok(())
    }

    /// Checks that a use of `value` at `position` in `block` is dominated by its
    /// definition. `position == None` means "at the end of `block`" (phi operands).
    fn check_use(
        &self,
        definitions: &FxHashMap<ValueId, ValueDefinition>,
        dom_tree: &DominatorTree,
        block: BasicBlockId,
        position: Option<usize>,
        value: ValueId,
    ) -> Result<(), ValidationError> {
        let Some(definition) = definitions.get(&value) else {
            return Err(ValidationError::UndefinedValue { block, value });
        };

        let dominated = match *definition {
            ValueDefinition::Parameter => true,
            ValueDefinition::Instruction {
                block: def_block,
                index,
            } if def_block == block => position.map_or(true, |use_index| index < use_index),
            ValueDefinition::Instruction {
                block: def_block, ..
            } => dom_tree.dominates(def_block, block),
        };

        if dominated {
            Ok(())
        } else {
            Err(ValidationError::UseNotDominated { block, value })
        }
    }
}

impl PrettyPrint for MirFunction {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = String::new();
        let base_indent = indent_str(indent);

        let parameters = self
            .parameters
            .iter()
            .map(|param| format!("%{}", param.index()))
            .collect::<Vec<_>>()
            .join(", ");
        result.push_str(&format!("{}fn {}({parameters}) {{\n", base_indent, self.name));

        for (block_id, block) in self.basic_blocks() {
            let block_display = match &block.name {
                Some(name) => format!("bb{} ({name})", block_id.index()),
                None => format!("bb{}", block_id.index()),
            };
            result.push_str(&format!("{base_indent}  {block_display}:\n"));
            result.push_str(&block.pretty_print(indent + 2));
        }

        result.push_str(&format!("{base_indent}}}\n"));
        result
    }
}

#[cfg(test)]
#[path = "function_tests.rs"]
mod tests;
