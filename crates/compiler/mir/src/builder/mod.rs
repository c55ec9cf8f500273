//! # MIR Builder Components
//!
//! Specialized builders for constructing MIR by hand: one for the control flow
//! graph and one for the instructions inside a block.

mod cfg_builder;
mod instr_builder;

pub use cfg_builder::{CfgBuilder, CfgState, DoWhileBlocks};
pub use instr_builder::InstrBuilder;
