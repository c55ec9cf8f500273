//! # MIR Basic Block
//!
//! This module defines basic blocks, the fundamental building blocks of the CFG.
//! A basic block is a straight-line sequence of instructions with exactly one entry
//! point and one exit point.

use crate::{indent_str, Instruction, PrettyPrint, Terminator};

/// A basic block in the Control Flow Graph
///
/// # Invariants
///
/// - Every basic block must have exactly one terminator
/// - Phi instructions form a contiguous prefix of `instructions`
/// - Control can only enter at the beginning and exit at the end
///
/// Predecessors are not stored: they are derived from the terminators of the
/// other blocks (see [`crate::cfg`]), so CFG surgery only ever rewrites
/// terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Optional name for debugging and pretty printing
    pub name: Option<String>,

    /// The sequence of instructions in this block
    pub instructions: Vec<Instruction>,

    /// The terminator that ends this block and transfers control
    pub terminator: Terminator,
}

impl BasicBlock {
    /// Creates a new empty basic block with an unreachable terminator
    ///
    /// The unreachable terminator serves as a placeholder until the real
    /// terminator is set during construction.
    pub const fn new() -> Self {
        Self {
            name: None,
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }

    /// Creates a new empty basic block with a name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Adds an instruction to the end of this block
    pub fn push_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Appends a phi after the existing phis of this block
    pub fn push_phi(&mut self, phi: Instruction) {
        debug_assert!(phi.is_phi(), "push_phi expects a phi instruction");
        let at = self.phi_count();
        self.instructions.insert(at, phi);
    }

    /// Appends an ordinary instruction just before the terminator
    pub fn insert_before_terminator(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Sets the terminator for this block
    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    /// Returns true if this block has a meaningful terminator
    pub const fn is_terminated(&self) -> bool {
        !matches!(self.terminator, Terminator::Unreachable)
    }

    /// Number of leading phi instructions
    pub fn phi_count(&self) -> usize {
        self.instructions
            .iter()
            .take_while(|instruction| instruction.is_phi())
            .count()
    }

    /// Index of the first non-phi instruction (or `len` if none)
    pub fn first_non_phi_index(&self) -> usize {
        self.phi_count()
    }

    /// Returns the phi instructions of this block
    pub fn phis(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().take_while(|instruction| instruction.is_phi())
    }

    /// Returns the non-phi instructions of this block
    pub fn non_phis(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().skip_while(|instruction| instruction.is_phi())
    }

    /// Returns the terminator of this block
    pub const fn terminator(&self) -> &Terminator {
        &self.terminator
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl PrettyPrint for BasicBlock {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = String::new();
        let base_indent = indent_str(indent);

        for instruction in &self.instructions {
            result.push_str(&format!("{}{}\n", base_indent, instruction.pretty_print(0)));
        }

        result.push_str(&format!(
            "{}{}\n",
            base_indent,
            self.terminator.pretty_print(0)
        ));

        result
    }
}
