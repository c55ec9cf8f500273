//! # MIR Instructions
//!
//! This module defines the instruction types for MIR.
//! Instructions perform computations but do not transfer control flow.

use std::collections::HashSet;

use crate::{BasicBlockId, PrettyPrint, Value, ValueId};

/// Binary operators available in MIR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    /// Returns true for operators producing a boolean from two integers
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Less | Self::LessEqual | Self::Greater | Self::GreaterEqual
        )
    }

    /// The comparison obtained by exchanging the operands: `a < b` <=> `b > a`
    pub const fn swapped(self) -> Self {
        match self {
            Self::Less => Self::Greater,
            Self::LessEqual => Self::GreaterEqual,
            Self::Greater => Self::Less,
            Self::GreaterEqual => Self::LessEqual,
            other => other,
        }
    }

    /// The logical negation of a comparison: `!(a < b)` <=> `a >= b`
    pub const fn negated(self) -> Option<Self> {
        match self {
            Self::Eq => Some(Self::Neq),
            Self::Neq => Some(Self::Eq),
            Self::Less => Some(Self::GreaterEqual),
            Self::LessEqual => Some(Self::Greater),
            Self::Greater => Some(Self::LessEqual),
            Self::GreaterEqual => Some(Self::Less),
            _ => None,
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Unary operators available in MIR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// An instruction performs an operation but does NOT transfer control
///
/// # Design Notes
///
/// - All instructions follow three-address code (TAC) format
/// - Instructions can define at most one value
/// - Phi instructions must appear before every other instruction of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The kind of instruction and its operands
    pub kind: InstructionKind,

    /// Optional comment for debugging
    pub comment: Option<String>,
}

/// The different kinds of instructions available in MIR
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    /// Simple assignment: `dest = source`
    Assign { dest: ValueId, source: Value },

    /// Unary operation: `dest = op source`
    UnaryOp {
        op: UnaryOp,
        dest: ValueId,
        source: Value,
    },

    /// Binary operation: `dest = left op right`
    BinaryOp {
        op: BinaryOp,
        dest: ValueId,
        left: Value,
        right: Value,
    },

    /// Join point: `dest = phi [pred: value, ...]`
    /// Selects the value flowing in from the predecessor that executed
    Phi {
        dest: ValueId,
        sources: Vec<(BasicBlockId, Value)>,
    },

    /// Allocate an array of `size` integer cells in the current frame
    FrameAlloc { dest: ValueId, size: usize },

    /// Address arithmetic: `dest = base + offset` (offset counted in cells)
    GetElementPtr {
        dest: ValueId,
        base: Value,
        offset: Value,
    },

    /// Load from memory: `dest = load address`
    Load { dest: ValueId, address: Value },

    /// Store to memory: `store address, value`
    Store { address: Value, value: Value },

    /// No operation
    Nop,
}

impl Instruction {
    const fn from_kind(kind: InstructionKind) -> Self {
        Self {
            kind,
            comment: None,
        }
    }

    /// Creates a new assignment instruction
    pub const fn assign(dest: ValueId, source: Value) -> Self {
        Self::from_kind(InstructionKind::Assign { dest, source })
    }

    /// Creates a new unary operation instruction
    pub const fn unary_op(op: UnaryOp, dest: ValueId, source: Value) -> Self {
        Self::from_kind(InstructionKind::UnaryOp { op, dest, source })
    }

    /// Creates a new binary operation instruction
    pub const fn binary_op(op: BinaryOp, dest: ValueId, left: Value, right: Value) -> Self {
        Self::from_kind(InstructionKind::BinaryOp {
            op,
            dest,
            left,
            right,
        })
    }

    /// Creates a phi instruction with the given sources
    pub const fn phi(dest: ValueId, sources: Vec<(BasicBlockId, Value)>) -> Self {
        Self::from_kind(InstructionKind::Phi { dest, sources })
    }

    /// Creates a new frame allocation instruction
    pub const fn frame_alloc(dest: ValueId, size: usize) -> Self {
        Self::from_kind(InstructionKind::FrameAlloc { dest, size })
    }

    /// Creates a new get element pointer instruction
    pub const fn get_element_ptr(dest: ValueId, base: Value, offset: Value) -> Self {
        Self::from_kind(InstructionKind::GetElementPtr { dest, base, offset })
    }

    /// Creates a new load instruction
    pub const fn load(dest: ValueId, address: Value) -> Self {
        Self::from_kind(InstructionKind::Load { dest, address })
    }

    /// Creates a new store instruction
    pub const fn store(address: Value, value: Value) -> Self {
        Self::from_kind(InstructionKind::Store { address, value })
    }

    /// Creates a no-op instruction
    pub const fn nop() -> Self {
        Self::from_kind(InstructionKind::Nop)
    }

    /// Sets a comment for this instruction
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Returns the destination value if this instruction defines one
    pub const fn destination(&self) -> Option<ValueId> {
        match &self.kind {
            InstructionKind::Assign { dest, .. }
            | InstructionKind::UnaryOp { dest, .. }
            | InstructionKind::BinaryOp { dest, .. }
            | InstructionKind::Phi { dest, .. }
            | InstructionKind::FrameAlloc { dest, .. }
            | InstructionKind::GetElementPtr { dest, .. }
            | InstructionKind::Load { dest, .. } => Some(*dest),
            InstructionKind::Store { .. } | InstructionKind::Nop => None,
        }
    }

    /// Returns every operand of this instruction, literals included, in order
    pub fn operands(&self) -> Vec<Value> {
        match &self.kind {
            InstructionKind::Assign { source, .. } | InstructionKind::UnaryOp { source, .. } => {
                vec![*source]
            }
            InstructionKind::BinaryOp { left, right, .. } => vec![*left, *right],
            InstructionKind::Phi { sources, .. } => sources.iter().map(|(_, v)| *v).collect(),
            InstructionKind::GetElementPtr { base, offset, .. } => vec![*base, *offset],
            InstructionKind::Load { address, .. } => vec![*address],
            InstructionKind::Store { address, value } => vec![*address, *value],
            InstructionKind::FrameAlloc { .. } | InstructionKind::Nop => vec![],
        }
    }

    /// Returns all values used by this instruction
    pub fn used_values(&self) -> HashSet<ValueId> {
        self.operands()
            .into_iter()
            .filter_map(|value| value.as_operand())
            .collect()
    }

    /// Replaces every use of `from` with `to`
    pub fn replace_value_uses(&mut self, from: ValueId, to: ValueId) {
        match &mut self.kind {
            InstructionKind::Assign { source, .. } | InstructionKind::UnaryOp { source, .. } => {
                source.replace_use(from, to);
            }
            InstructionKind::BinaryOp { left, right, .. } => {
                left.replace_use(from, to);
                right.replace_use(from, to);
            }
            InstructionKind::Phi { sources, .. } => {
                for (_, value) in sources {
                    value.replace_use(from, to);
                }
            }
            InstructionKind::GetElementPtr { base, offset, .. } => {
                base.replace_use(from, to);
                offset.replace_use(from, to);
            }
            InstructionKind::Load { address, .. } => address.replace_use(from, to),
            InstructionKind::Store { address, value } => {
                address.replace_use(from, to);
                value.replace_use(from, to);
            }
            InstructionKind::FrameAlloc { .. } | InstructionKind::Nop => {}
        }
    }

    /// Returns true if this is a phi instruction
    pub const fn is_phi(&self) -> bool {
        matches!(self.kind, InstructionKind::Phi { .. })
    }

    /// Returns true if removing this instruction could change observable behavior
    ///
    /// Frame allocations count as effects since they create fresh storage;
    /// divisions can trap on a zero divisor.
    pub const fn has_side_effects(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::Store { .. }
                | InstructionKind::FrameAlloc { .. }
                | InstructionKind::BinaryOp {
                    op: BinaryOp::Div | BinaryOp::Rem,
                    ..
                }
        )
    }

    /// Returns true if this instruction reads or writes memory
    pub const fn touches_memory(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::Load { .. }
                | InstructionKind::Store { .. }
                | InstructionKind::FrameAlloc { .. }
        )
    }

    /// Returns true if the result depends only on the operands
    pub const fn is_pure(&self) -> bool {
        !self.touches_memory() && !self.is_phi() && !self.has_side_effects()
    }

    /// Returns the incoming sources if this is a phi
    pub fn phi_sources(&self) -> Option<&[(BasicBlockId, Value)]> {
        match &self.kind {
            InstructionKind::Phi { sources, .. } => Some(sources),
            _ => None,
        }
    }

    /// Renames the incoming block `old` to `new` if this is a phi
    pub fn rename_phi_source(&mut self, old: BasicBlockId, new: BasicBlockId) {
        if let InstructionKind::Phi { sources, .. } = &mut self.kind {
            for (block, _) in sources.iter_mut() {
                if *block == old {
                    *block = new;
                }
            }
        }
    }

    /// Drops every incoming source for which `keep` returns false
    pub fn retain_phi_sources(&mut self, mut keep: impl FnMut(BasicBlockId) -> bool) {
        if let InstructionKind::Phi { sources, .. } = &mut self.kind {
            sources.retain(|(block, _)| keep(*block));
        }
    }
}

impl PrettyPrint for Instruction {
    fn pretty_print(&self, _indent: usize) -> String {
        let text = match &self.kind {
            InstructionKind::Assign { dest, source } => {
                format!("%{} = {}", dest.index(), source.pretty_print(0))
            }
            InstructionKind::UnaryOp { op, dest, source } => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                format!("%{} = {symbol}{}", dest.index(), source.pretty_print(0))
            }
            InstructionKind::BinaryOp {
                op,
                dest,
                left,
                right,
            } => format!(
                "%{} = {} {} {}",
                dest.index(),
                left.pretty_print(0),
                op.symbol(),
                right.pretty_print(0)
            ),
            InstructionKind::Phi { dest, sources } => {
                let sources = sources
                    .iter()
                    .map(|(block, value)| format!("bb{}: {}", block.index(), value.pretty_print(0)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("%{} = phi [{sources}]", dest.index())
            }
            InstructionKind::FrameAlloc { dest, size } => {
                format!("%{} = framealloc {size}", dest.index())
            }
            InstructionKind::GetElementPtr { dest, base, offset } => format!(
                "%{} = getelementptr {}, {}",
                dest.index(),
                base.pretty_print(0),
                offset.pretty_print(0)
            ),
            InstructionKind::Load { dest, address } => {
                format!("%{} = load {}", dest.index(), address.pretty_print(0))
            }
            InstructionKind::Store { address, value } => format!(
                "store {}, {}",
                address.pretty_print(0),
                value.pretty_print(0)
            ),
            InstructionKind::Nop => "nop".to_string(),
        };

        match &self.comment {
            Some(comment) => format!("{text} // {comment}"),
            None => text,
        }
    }
}

#[cfg(test)]
#[path = "instruction_tests.rs"]
mod tests;
