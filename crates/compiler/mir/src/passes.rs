//! # MIR Optimization Passes
//!
//! Passes transform a MIR function in place and report whether they changed
//! it. The [`PassManager`] runs them in sequence.

pub mod dead_code_elimination;
pub mod loop_fusion;

pub use dead_code_elimination::DeadCodeElimination;
pub use loop_fusion::{FusionConfig, LoopFusion};

use crate::analysis::{compute_dominator_tree, LoopForest};
use crate::{cfg, MirFunction};

/// Returns true if the function has at least two loops, the minimum for fusion
pub fn function_has_loop_pairs(function: &MirFunction) -> bool {
    let dom_tree = compute_dominator_tree(function);
    LoopForest::compute(function, &dom_tree).len() >= 2
}

/// A trait for MIR optimization passes
pub trait MirPass {
    /// Apply this pass to a MIR function
    /// Returns true if the function was modified
    fn run(&mut self, function: &mut MirFunction) -> bool;

    /// Get the name of this pass for debugging
    fn name(&self) -> &'static str;
}

/// A wrapper for conditional pass execution
///
/// Skips the wrapped pass for functions that cannot benefit from it.
pub struct ConditionalPass {
    pass: Box<dyn MirPass>,
    condition: fn(&MirFunction) -> bool,
}

impl ConditionalPass {
    pub fn new(pass: Box<dyn MirPass>, condition: fn(&MirFunction) -> bool) -> Self {
        Self { pass, condition }
    }
}

impl MirPass for ConditionalPass {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        if (self.condition)(function) {
            self.pass.run(function)
        } else {
            log::trace!("Skipping pass '{}' for '{}'", self.pass.name(), function.name);
            false
        }
    }

    fn name(&self) -> &'static str {
        self.pass.name()
    }
}

/// MIR Validation Pass
///
/// Reports structural problems through the log. Never modifies the function.
#[derive(Debug, Default)]
pub struct Validation;

impl Validation {
    pub const fn new() -> Self {
        Self
    }
}

impl MirPass for Validation {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        if let Err(err) = function.validate() {
            log::error!("MIR validation failed for function '{}': {err}", function.name);
            return false;
        }

        let unreachable = function.unreachable_blocks();
        if !unreachable.is_empty() {
            log::warn!(
                "Function '{}' contains {} unreachable blocks: {:?}",
                function.name,
                unreachable.len(),
                unreachable
            );
        }

        let entry_preds = cfg::get_predecessors(function, function.entry_block);
        if !entry_preds.is_empty() {
            log::debug!(
                "Entry block of '{}' has predecessors: {:?}",
                function.name,
                entry_preds
            );
        }

        false
    }

    fn name(&self) -> &'static str {
        "Validation"
    }
}

/// A pass manager that runs a sequence of passes
pub struct PassManager {
    passes: Vec<Box<dyn MirPass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add a pass to the manager
    pub fn add_pass<P: MirPass + 'static>(mut self, pass: P) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Add a pass that only runs when `condition` holds for the function
    pub fn add_conditional_pass<P: MirPass + 'static>(
        mut self,
        pass: P,
        condition: fn(&MirFunction) -> bool,
    ) -> Self {
        self.passes
            .push(Box::new(ConditionalPass::new(Box::new(pass), condition)));
        self
    }

    /// Names of the registered passes, in execution order
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Run all passes on the function
    /// Returns true if any pass modified the function
    pub fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;

        for pass in &mut self.passes {
            if pass.run(function) {
                modified = true;
                log::debug!("Pass '{}' modified function '{}'", pass.name(), function.name);
            }
        }

        modified
    }

    /// Cleanup only: dead code elimination followed by validation
    pub fn basic_pipeline() -> Self {
        Self::new()
            .add_pass(DeadCodeElimination::new())
            .add_pass(Validation::new())
    }

    /// Loop fusion with the default configuration, then cleanup and validation
    pub fn standard_pipeline() -> Self {
        Self::with_config(FusionConfig::default())
    }

    /// The standard pipeline with a custom fusion configuration
    pub fn with_config(config: FusionConfig) -> Self {
        Self::new()
            .add_conditional_pass(LoopFusion::with_config(config), function_has_loop_pairs)
            .add_pass(DeadCodeElimination::new())
            .add_pass(Validation::new())
    }
}

#[cfg(test)]
#[path = "passes_tests.rs"]
mod tests;
