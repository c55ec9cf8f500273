//! # Loopweave Mid-level Intermediate Representation (MIR)
//!
//! This crate defines an SSA control-flow-graph IR together with the analyses
//! and passes needed to fuse adjacent loops. Functions are graphs of basic
//! blocks; each block is a list of three-address instructions ending in a
//! single terminator.
//!
//! ## Architecture
//!
//! ```text
//! MirModule
//! functions: IndexVec<FunctionId, MirFunction>
//!
//! MirFunction
//! basic_blocks: IndexVec<BasicBlockId, BasicBlock>
//! entry_block: BasicBlockId
//!
//! BasicBlock
//! instructions: Vec<Instruction>   (phis first)
//! terminator: Terminator
//! ```
//!
//! ## Analyses and passes
//!
//! - [`analysis::dominance`]: dominator and post-dominator trees
//! - [`analysis::loops`]: natural loop forest with preheader/guard/exit facts
//! - [`analysis::scev`]: symbolic induction and trip-count expressions
//! - [`passes::loop_fusion`]: legality checks and the fusion transformation
//! - [`passes::DeadCodeElimination`]: unreachable block and dead value removal
//!
//! [`interp`] evaluates a function directly and is used to check that
//! transformations preserve behavior.

pub use basic_block::BasicBlock;
pub use builder::{CfgBuilder, CfgState, InstrBuilder};
pub use function::{MirFunction, ValidationError};
pub use instruction::{BinaryOp, Instruction, InstructionKind, UnaryOp};
pub use module::MirModule;
pub use passes::loop_fusion::{FusionConfig, LoopFusion};
pub use passes::{DeadCodeElimination, MirPass, PassManager, Validation};
pub use pipeline::{optimize_module, OptimizationLevel, PipelineConfig, PipelineError};
pub use terminator::Terminator;
pub use value::{Literal, Value};

pub mod analysis;
pub mod basic_block;
pub mod builder;
pub mod cfg;
pub mod function;
pub mod instruction;
pub mod interp;
pub mod module;
pub mod passes;
pub mod pipeline;
pub mod terminator;
pub mod value;

#[cfg(test)]
pub mod testing;


// --- Core Identifiers ---

index_vec::define_index_type! {
    /// Unique identifier for a function within a MIR module
    pub struct FunctionId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for a basic block within a function
    pub struct BasicBlockId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for a value (virtual register) within a function
    pub struct ValueId = usize;
}

// --- Pretty Printing Support ---

/// Trait for pretty-printing MIR constructs
pub trait PrettyPrint {
    fn pretty_print(&self, indent: usize) -> String;
}

/// Helper function to create indentation
pub(crate) fn indent_str(level: usize) -> String {
    "  ".repeat(level)
}
