//! # MIR Terminators
//!
//! This module defines terminators, which end basic blocks and transfer control flow.
//! Every basic block must end with exactly one terminator.

use crate::{BasicBlockId, PrettyPrint, Value, ValueId};
use std::collections::HashSet;

/// A terminator ends a basic block and transfers control
///
/// # Design Notes
///
/// - Each terminator specifies its target blocks explicitly
/// - Conditional branches specify both targets (taken/not taken)
/// - Successor edges of the CFG are derived from terminators only
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional jump: `jump target`
    Jump { target: BasicBlockId },

    /// Conditional branch: `if condition then jump then_target else jump else_target`
    If {
        condition: Value,
        then_target: BasicBlockId,
        else_target: BasicBlockId,
    },

    /// Function return: `return values`
    Return { values: Vec<Value> },

    /// Unreachable code: placeholder during construction and for dead blocks
    Unreachable,
}

impl Terminator {
    /// Creates a new jump terminator
    pub const fn jump(target: BasicBlockId) -> Self {
        Self::Jump { target }
    }

    /// Creates a new conditional branch terminator
    pub const fn branch(
        condition: Value,
        then_target: BasicBlockId,
        else_target: BasicBlockId,
    ) -> Self {
        Self::If {
            condition,
            then_target,
            else_target,
        }
    }

    /// Creates a new return terminator
    pub const fn return_values(values: Vec<Value>) -> Self {
        Self::Return { values }
    }

    /// Creates a new void return terminator
    pub const fn return_void() -> Self {
        Self::Return { values: Vec::new() }
    }

    /// Returns all basic block targets of this terminator
    pub fn target_blocks(&self) -> Vec<BasicBlockId> {
        match self {
            Self::Jump { target } => vec![*target],
            Self::If {
                then_target,
                else_target,
                ..
            } => {
                if then_target == else_target {
                    vec![*then_target]
                } else {
                    vec![*then_target, *else_target]
                }
            }
            Self::Return { .. } | Self::Unreachable => vec![],
        }
    }

    /// Returns all values used by this terminator
    pub fn used_values(&self) -> HashSet<ValueId> {
        match self {
            Self::If { condition, .. } => condition.as_operand().into_iter().collect(),
            Self::Return { values } => values.iter().filter_map(Value::as_operand).collect(),
            Self::Jump { .. } | Self::Unreachable => HashSet::new(),
        }
    }

    /// Returns true if this terminator ends the function
    pub const fn ends_function(&self) -> bool {
        matches!(self, Self::Return { .. } | Self::Unreachable)
    }

    /// Replaces all occurrences of `old_block` with `new_block` in targets
    pub fn replace_target(&mut self, old_block: BasicBlockId, new_block: BasicBlockId) {
        match self {
            Self::Jump { target } => {
                if *target == old_block {
                    *target = new_block;
                }
            }

            Self::If {
                then_target,
                else_target,
                ..
            } => {
                if *then_target == old_block {
                    *then_target = new_block;
                }
                if *else_target == old_block {
                    *else_target = new_block;
                }
            }

            Self::Return { .. } | Self::Unreachable => {}
        }
    }

    /// Replaces every use of `from` with `to`
    pub fn replace_value_uses(&mut self, from: ValueId, to: ValueId) {
        match self {
            Self::If { condition, .. } => condition.replace_use(from, to),
            Self::Return { values } => {
                for value in values {
                    value.replace_use(from, to);
                }
            }
            Self::Jump { .. } | Self::Unreachable => {}
        }
    }
}

impl PrettyPrint for Terminator {
    fn pretty_print(&self, _indent: usize) -> String {
        match self {
            Self::Jump { target } => format!("jump bb{}", target.index()),

            Self::If {
                condition,
                then_target,
                else_target,
            } => format!(
                "if {} then jump bb{} else jump bb{}",
                condition.pretty_print(0),
                then_target.index(),
                else_target.index()
            ),

            Self::Return { values } if values.is_empty() => "return".to_string(),

            Self::Return { values } => {
                let values = values
                    .iter()
                    .map(|value| value.pretty_print(0))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("return {values}")
            }

            Self::Unreachable => "unreachable".to_string(),
        }
    }
}
