//! # Loop Fusion
//!
//! Merges two adjacent loops that run the same number of iterations into a
//! single loop. A pair is fused only when every legality gate passes:
//!
//! 0. both loops are guarded, or neither is
//! 1. L2 starts exactly where L1 ends ([`is_adjacent`])
//! 2. both trip counts are the same symbolic expression ([`has_same_trip_count`])
//! 3. L1 runs exactly when L2 runs ([`is_control_flow_equivalent`])
//! 4. no iteration of L2 needs a value L1 only produces later
//!    ([`has_no_negative_dependence`])
//!
//! The transformation itself is split in two: a [`FusionPlan`] is built and
//! checked against the actual block shapes, then applied. When
//! [`FusionConfig::verify_after_fusion`] is set the plan is applied to a copy
//! of the function that replaces the original only if it validates.
//!
//! ```text
//!  preheader1 -> [ header1 -> body1 -> latch1 ] -> exit1 = preheader2
//!             -> [ header2 -> body2 -> latch2 ] -> exit2
//!
//!  becomes
//!
//!  preheader1 -> [ header1 -> body1 -> body2 -> latch1 ] -> exit2
//! ```

mod adjacency;
mod control_flow;
mod dependence;
mod legality;
mod transform;
mod trip_count;

pub use adjacency::is_adjacent;
pub use control_flow::{guards_match, is_control_flow_equivalent};
pub use dependence::{
    has_no_negative_dependence, negative_dependences, Dependence, DependenceKind, InstructionRef,
};
pub use legality::{check_legality, FusionGate, Legality};
pub use transform::{fuse_pair, FusionError, FusionPlan};
pub use trip_count::has_same_trip_count;

use itertools::Itertools;

use crate::analysis::{FunctionAnalyses, Loop, LoopForest, LoopId, ScalarEvolution};
use crate::{Instruction, MirFunction, ValueId};

use super::MirPass;

/// Configuration of the loop fusion pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionConfig {
    /// Whether pairs of guarded loops may be fused
    pub fuse_guarded: bool,
    /// Upper bound on the number of fusions per function
    pub max_fusions: Option<usize>,
    /// Apply each fusion to a copy and keep it only if the result validates
    pub verify_after_fusion: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            fuse_guarded: true,
            max_fusions: None,
            verify_after_fusion: true,
        }
    }
}

/// The analyses of one function snapshot, as consumed by the fusion checks
///
/// Any change to `function` makes the context stale; the driver builds a new
/// one after every fusion.
pub struct FusionContext<'a> {
    /// The function being inspected, never modified through the context
    pub function: &'a MirFunction,
    /// Dominator and post-dominator trees plus the loop forest
    pub analyses: &'a FunctionAnalyses,
    /// Symbolic expressions over `function`, memoized across all checks
    pub scev: ScalarEvolution<'a>,
}

impl<'a> FusionContext<'a> {
    /// Wraps precomputed analyses of `function`
    pub fn new(function: &'a MirFunction, analyses: &'a FunctionAnalyses) -> Self {
        Self {
            function,
            analyses,
            scev: ScalarEvolution::new(function, &analyses.loops),
        }
    }

    /// The loop forest of the snapshot
    pub fn loops(&self) -> &'a LoopForest {
        &self.analyses.loops
    }

    /// Shorthand for `self.loops()[id]`
    pub fn get(&self, id: LoopId) -> &'a Loop {
        self.analyses.loops.get(id)
    }

    /// Returns true if `value` is defined by an instruction inside `loop_id`
    pub fn defined_in(&self, value: ValueId, loop_id: LoopId) -> bool {
        self.scev
            .defining_block(value)
            .is_some_and(|block| self.loops().contains(loop_id, block))
    }

    /// The instruction defining `value` and its position
    pub fn definition(&self, value: ValueId) -> Option<(InstructionRef, &'a Instruction)> {
        let block = self.scev.defining_block(value)?;
        self.function.basic_blocks[block]
            .instructions
            .iter()
            .enumerate()
            .find(|(_, instruction)| instruction.destination() == Some(value))
            .map(|(index, instruction)| (InstructionRef { block, index }, instruction))
    }
}

/// Loop Fusion Pass
///
/// Repeatedly looks for the first legal pair of sibling loops (innermost
/// groups first, each group in program order) and fuses it. Every fusion
/// invalidates the analyses, so the search restarts from fresh ones until no
/// pair fuses or [`FusionConfig::max_fusions`] is reached.
#[derive(Debug, Default)]
pub struct LoopFusion {
    config: FusionConfig,
}

impl LoopFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_config(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Tries every candidate pair of one analysis snapshot and returns the
    /// fused function for the first pair that fuses
    fn fuse_first_candidate(
        &self,
        ctx: &FusionContext<'_>,
        pair_index: &mut usize,
    ) -> Option<MirFunction> {
        for group in ctx.loops().sibling_groups() {
            for (&first, &second) in group.iter().tuple_windows() {
                *pair_index += 1;
                let index = *pair_index;

                if !self.config.fuse_guarded
                    && (ctx.get(first).is_guarded() || ctx.get(second).is_guarded())
                {
                    log::debug!("Pair {index}: guarded loops are not fused by configuration");
                    continue;
                }

                let legality = check_legality(ctx, first, second, index);
                if !legality.is_legal() {
                    continue;
                }

                match fuse_pair(ctx, first, second, legality, self.config.verify_after_fusion) {
                    Ok(fused) => {
                        log::debug!(
                            "Pair {index}: fused loop at bb{} into loop at bb{} in '{}'",
                            ctx.get(second).header.index(),
                            ctx.get(first).header.index(),
                            ctx.function.name
                        );
                        return Some(fused);
                    }
                    Err(err) => {
                        log::warn!("Pair {index}: legal pair not fused: {err}");
                    }
                }
            }
        }
        None
    }
}

impl MirPass for LoopFusion {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut fusions = 0;
        let mut pair_index = 0;

        while self.config.max_fusions.map_or(true, |max| fusions < max) {
            let fused = {
                let analyses = FunctionAnalyses::compute(function);
                let ctx = FusionContext::new(function, &analyses);
                self.fuse_first_candidate(&ctx, &mut pair_index)
            };
            match fused {
                Some(fused) => {
                    *function = fused;
                    fusions += 1;
                }
                None => break,
            }
        }

        if fusions > 0 {
            log::debug!("Fused {fusions} loop pair(s) in '{}'", function.name);
        }
        fusions > 0
    }

    fn name(&self) -> &'static str {
        "LoopFusion"
    }
}

#[cfg(test)]
#[path = "loop_fusion_tests.rs"]
mod tests;
