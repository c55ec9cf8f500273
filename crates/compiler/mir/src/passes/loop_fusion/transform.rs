//! The fusion transformation.
//!
//! A [`FusionPlan`] records the blocks of both loops and checks that their
//! shape is one the rewrite supports. [`FusionPlan::apply`] then moves L2's
//! code into L1 and rewires the CFG:
//!
//! - L2's header phis join L1's header
//! - L2's header and latch code runs at the end of L1's iteration, or, when
//!   L2 has body blocks, those blocks are spliced in front of L1's latch
//! - L1's latch exits to L2's exit; L2's preheader, header and latch become
//!   unreachable and are swept away
//! - for guarded loops, L1's guard skips to L2's join block and the glue
//!   between the loops moves out of the way
//!
//! Code moved ahead of L1 (L2's preheader and guard, and L2's header when it
//! precedes a body) must not touch memory, and every operand it reads must
//! already be available at its new position.

use itertools::Itertools;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::adjacency::skip_target;
use super::{FusionContext, Legality};
use crate::analysis::LoopId;
use crate::passes::{DeadCodeElimination, MirPass};
use crate::{
    cfg, BasicBlockId, Instruction, InstructionKind, MirFunction, Terminator, ValidationError,
    Value, ValueId,
};

/// Reasons a legal pair cannot be fused by [`FusionPlan`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FusionError {
    #[error("loop at {header:?} has no {role}")]
    MissingBlock {
        header: BasicBlockId,
        role: &'static str,
    },
    #[error("loop at {header:?} does not exit from its latch")]
    ExitNotAtLatch { header: BasicBlockId },
    #[error("latch {latch:?} does not branch between its header and exit")]
    UnexpectedLatchBranch { latch: BasicBlockId },
    #[error("header {header:?} does not end in a jump")]
    UnexpectedHeaderBranch { header: BasicBlockId },
    #[error("loop at {header:?} has no induction variable")]
    NoInductionVariable { header: BasicBlockId },
    #[error("body of the loop at {header:?} is not fed to the latch by a single block")]
    IrregularBody { header: BasicBlockId },
    #[error("single-block loop at {header:?} cannot take in body blocks")]
    SingleBlockWithBody { header: BasicBlockId },
    #[error("block {block:?} has phis that cannot be moved")]
    UnsupportedPhi { block: BasicBlockId },
    #[error("instruction {index} of {block:?} cannot move across a loop")]
    UnmovableInstruction { block: BasicBlockId, index: usize },
    #[error("{value:?} is not available in {block:?}")]
    OperandUnavailable { value: ValueId, block: BasicBlockId },
    #[error("exit {block:?} is shared with other control flow")]
    SharedExit { block: BasicBlockId },
    #[error("guard {guard:?} does not have the expected shape")]
    GuardMismatch { guard: BasicBlockId },
    #[error("guard phi {phi:?} is used past its join block")]
    EscapingGuardPhi { phi: ValueId },
    #[error("fused function is invalid: {0}")]
    InvalidResult(#[from] ValidationError),
}

/// The blocks of one loop of the pair
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoopShape {
    header: BasicBlockId,
    latch: BasicBlockId,
    preheader: BasicBlockId,
    exit: BasicBlockId,
    induction: ValueId,
    /// First and last block between header and latch, if any
    body: Option<(BasicBlockId, BasicBlockId)>,
}

impl LoopShape {
    fn analyze(ctx: &FusionContext<'_>, id: LoopId) -> Result<Self, FusionError> {
        let data = ctx.get(id);
        let header = data.header;
        let missing = |role| FusionError::MissingBlock { header, role };
        let latch = data.latch.ok_or_else(|| missing("single latch"))?;
        let preheader = data.preheader.ok_or_else(|| missing("preheader"))?;
        let exit = data.exit.ok_or_else(|| missing("single exit"))?;
        if data.exiting != Some(latch) {
            return Err(FusionError::ExitNotAtLatch { header });
        }

        let blocks = &ctx.function.basic_blocks;
        let rotated = matches!(
            blocks[latch].terminator,
            Terminator::If { then_target, else_target, .. }
                if (then_target == header && else_target == exit)
                    || (then_target == exit && else_target == header)
        );
        if !rotated {
            return Err(FusionError::UnexpectedLatchBranch { latch });
        }

        let induction = ctx
            .scev
            .induction_variable(id)
            .ok_or(FusionError::NoInductionVariable { header })?;

        let body = if header == latch {
            None
        } else {
            let Terminator::Jump { target } = blocks[header].terminator else {
                return Err(FusionError::UnexpectedHeaderBranch { header });
            };
            if target == latch {
                None
            } else {
                let feeding: Vec<BasicBlockId> = cfg::get_predecessors(ctx.function, latch)
                    .into_iter()
                    .filter(|&block| data.contains(block))
                    .collect();
                let [last] = feeding.as_slice() else {
                    return Err(FusionError::IrregularBody { header });
                };
                Some((target, *last))
            }
        };

        Ok(Self {
            header,
            latch,
            preheader,
            exit,
            induction,
            body,
        })
    }
}

/// Blocks around a guarded pair
///
/// ```text
/// guard1 ──► preheader1 … exit1 ──► guard2 ──► preheader2 … exit2 ──► join2
///    └──────────────────────────────►┘  └──────────────────────────────►┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
struct GuardedShape {
    first_guard: BasicBlockId,
    second_guard: BasicBlockId,
    second_join: BasicBlockId,
}

impl GuardedShape {
    fn analyze(
        ctx: &FusionContext<'_>,
        first: &LoopShape,
        second: &LoopShape,
        first_guard: BasicBlockId,
        second_guard: BasicBlockId,
    ) -> Result<Self, FusionError> {
        let function = ctx.function;
        if skip_target(function, first_guard, first.preheader) != Some(second_guard) {
            return Err(FusionError::GuardMismatch { guard: first_guard });
        }
        let second_join = skip_target(function, second_guard, second.preheader)
            .ok_or(FusionError::GuardMismatch {
                guard: second_guard,
            })?;

        let guard_preds = cfg::get_predecessors(function, second_guard)
            .into_iter()
            .sorted()
            .collect_vec();
        if guard_preds != [first.exit, first_guard].into_iter().sorted().collect_vec() {
            return Err(FusionError::GuardMismatch {
                guard: second_guard,
            });
        }

        for (exit, latch, successor) in [
            (first.exit, first.latch, second_guard),
            (second.exit, second.latch, second_join),
        ] {
            let dedicated = cfg::get_predecessors(function, exit) == [latch]
                && function.basic_blocks[exit].terminator == Terminator::jump(successor);
            if !dedicated {
                return Err(FusionError::SharedExit { block: exit });
            }
        }

        let shape = Self {
            first_guard,
            second_guard,
            second_join,
        };
        shape.check_guard_phi_uses(ctx)?;
        Ok(shape)
    }

    /// Phis of the second guard move to the join block, so they may only be
    /// used from there on, or by join phis on the edge from the guard
    fn check_guard_phi_uses(&self, ctx: &FusionContext<'_>) -> Result<(), FusionError> {
        let guard_phis: Vec<ValueId> = ctx.function.basic_blocks[self.second_guard]
            .phis()
            .filter_map(Instruction::destination)
            .collect();
        let dom_tree = &ctx.analyses.dom_tree;
        let past_join = |block: BasicBlockId| dom_tree.strictly_dominates(self.second_join, block);

        for &phi in &guard_phis {
            let escapes = FusionError::EscapingGuardPhi { phi };
            for (block, data) in ctx.function.basic_blocks() {
                for instruction in &data.instructions {
                    if !instruction.used_values().contains(&phi) {
                        continue;
                    }
                    let allowed = match instruction.phi_sources() {
                        Some(sources) if block == self.second_join => sources
                            .iter()
                            .filter(|(_, value)| *value == Value::operand(phi))
                            .all(|(source, _)| *source == self.second_guard),
                        Some(_) => past_join(block),
                        None => block == self.second_join || past_join(block),
                    };
                    if !allowed {
                        return Err(escapes);
                    }
                }
                if data.terminator.used_values().contains(&phi)
                    && block != self.second_join
                    && !past_join(block)
                {
                    return Err(escapes);
                }
            }
        }
        Ok(())
    }
}

/// A checked recipe for fusing one loop pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionPlan {
    first: LoopShape,
    second: LoopShape,
    guards: Option<GuardedShape>,
    /// Both induction variables follow the same recurrence, so L2's is
    /// replaced by L1's
    unify_induction: bool,
}

impl FusionPlan {
    /// Plans the fusion of a pair that passed every legality gate
    ///
    /// # Panics
    ///
    /// Panics if `legality` is not [`Legality::Legal`].
    pub fn build(
        ctx: &FusionContext<'_>,
        first: LoopId,
        second: LoopId,
        legality: Legality,
    ) -> Result<Self, FusionError> {
        assert!(
            legality.is_legal(),
            "fusion planned for an illegal pair: {legality:?}"
        );

        let l1 = LoopShape::analyze(ctx, first)?;
        let l2 = LoopShape::analyze(ctx, second)?;
        let guards = match (ctx.get(first).guard, ctx.get(second).guard) {
            (Some(guard1), Some(guard2)) => {
                Some(GuardedShape::analyze(ctx, &l1, &l2, guard1, guard2)?)
            }
            _ => None,
        };

        let function = ctx.function;
        reject_phis(function, l2.preheader)?;
        for shape in [&l1, &l2] {
            if shape.latch != shape.header {
                reject_phis(function, shape.latch)?;
            }
        }

        require_movable(function, l2.preheader)?;
        if let Some(guards) = &guards {
            require_movable(function, guards.second_guard)?;
            require_movable(function, l1.exit)?;
        }
        if let Some((entry, _)) = l2.body {
            if l1.header == l1.latch {
                return Err(FusionError::SingleBlockWithBody { header: l1.header });
            }
            reject_phis(function, entry)?;
            require_movable(function, l2.header)?;
            require_movable(function, l1.latch)?;
        }

        let induction1 = ctx.scev.scev_of(Value::operand(l1.induction));
        let induction2 = ctx
            .scev
            .scev_of(Value::operand(l2.induction))
            .rebase(l2.header, l1.header);
        let unify_induction = induction1.is_computable() && induction1 == induction2;

        let plan = Self {
            first: l1,
            second: l2,
            guards,
            unify_induction,
        };
        plan.check_availability(ctx, first, second)?;
        Ok(plan)
    }

    /// Checks that every instruction moved into L1, and every instruction of
    /// L2's body, reads values that are defined before its new position
    fn check_availability(
        &self,
        ctx: &FusionContext<'_>,
        first: LoopId,
        second: LoopId,
    ) -> Result<(), FusionError> {
        let (l1, l2) = (&self.first, &self.second);
        let blocks = &ctx.function.basic_blocks;
        let mut placement = Placement {
            ctx,
            plan: self,
            first,
            second,
            homes: FxHashMap::default(),
        };

        if let Some(guards) = &self.guards {
            for instruction in blocks[guards.second_guard].non_phis() {
                placement.place(instruction, guards.first_guard)?;
            }
        }
        for instruction in blocks[l2.preheader].non_phis() {
            placement.place(instruction, l1.preheader)?;
        }

        let header_phis: Vec<&Instruction> = blocks[l2.header]
            .phis()
            .filter(|phi| !self.unifies(phi.destination()))
            .collect();
        for phi in &header_phis {
            if let Some(dest) = phi.destination() {
                placement.homes.insert(dest, l1.header);
            }
        }

        let header_home = if l2.body.is_some() {
            l1.header
        } else {
            l1.latch
        };
        for instruction in blocks[l2.header].non_phis() {
            placement.place(instruction, header_home)?;
        }
        if l2.latch != l2.header {
            for instruction in blocks[l2.latch].non_phis() {
                placement.place(instruction, l1.latch)?;
            }
        }

        for phi in header_phis {
            for (source, value) in phi.phi_sources().unwrap_or_default() {
                let at = if *source == l2.preheader {
                    l1.preheader
                } else {
                    l1.latch
                };
                if let Some(id) = value.as_operand() {
                    placement.require(id, at)?;
                }
            }
        }

        if l2.body.is_none() {
            return Ok(());
        }
        let body_blocks = ctx
            .get(second)
            .blocks
            .iter()
            .copied()
            .filter(|&block| block != l2.header && block != l2.latch)
            .sorted();
        for block in body_blocks {
            let data = &blocks[block];
            for instruction in &data.instructions {
                match instruction.phi_sources() {
                    Some(sources) => {
                        for (source, value) in sources {
                            if let Some(id) = value.as_operand() {
                                placement.require_in_body(id, *source)?;
                            }
                        }
                    }
                    None => {
                        for id in instruction.used_values().into_iter().sorted() {
                            placement.require_in_body(id, block)?;
                        }
                    }
                }
            }
            for id in data.terminator.used_values().into_iter().sorted() {
                placement.require_in_body(id, block)?;
            }
        }
        Ok(())
    }

    fn unifies(&self, value: Option<ValueId>) -> bool {
        self.unify_induction && value == Some(self.second.induction)
    }

    /// Rewrites `function` according to the plan
    ///
    /// `function` must be the function the plan was built from.
    pub fn apply(&self, function: &mut MirFunction) {
        let (l1, l2) = (&self.first, &self.second);

        if self.unify_induction {
            function.replace_all_uses(l2.induction, l1.induction);
            function.basic_blocks[l2.header]
                .instructions
                .retain(|instruction| instruction.destination() != Some(l2.induction));
        }

        if let Some(guards) = &self.guards {
            self.relocate_guard_glue(function, guards);
        }
        let preheader_code = take_non_phis(function, l2.preheader);
        append(function, l1.preheader, preheader_code);

        for phi in take_phis(function, l2.header) {
            function.basic_blocks[l1.header].push_phi(phi);
        }
        let header_code = take_non_phis(function, l2.header);
        let latch_code = take_non_phis(function, l2.latch);
        let header_home = if l2.body.is_some() {
            l1.header
        } else {
            l1.latch
        };
        append(function, header_home, header_code);
        append(function, l1.latch, latch_code);

        let mut renames = vec![(l2.preheader, l1.preheader), (l2.latch, l1.latch)];
        if let Some(guards) = &self.guards {
            renames.push((guards.second_guard, guards.first_guard));
            renames.push((l1.exit, l2.exit));
        }
        for block in function.basic_blocks.iter_mut() {
            for phi in block.instructions.iter_mut().filter(|i| i.is_phi()) {
                for &(old, new) in &renames {
                    phi.rename_phi_source(old, new);
                }
            }
        }

        function.basic_blocks[l1.latch]
            .terminator
            .replace_target(l1.exit, l2.exit);
        if let Some((entry2, last2)) = l2.body {
            let last1 = l1.body.map_or(l1.header, |(_, last)| last);
            function.basic_blocks[last1]
                .terminator
                .replace_target(l1.latch, entry2);
            function.basic_blocks[last2]
                .terminator
                .replace_target(l2.latch, l1.latch);
        }

        DeadCodeElimination::new().run(function);
    }

    /// Moves the blocks between the loops of a guarded pair out of the way:
    /// the second guard's code runs in the first guard, its phis move to the
    /// join block, and L1's exit block merges into L2's
    fn relocate_guard_glue(&self, function: &mut MirFunction, guards: &GuardedShape) {
        let (l1, l2) = (&self.first, &self.second);

        let guard_code = take_non_phis(function, guards.second_guard);
        append(function, guards.first_guard, guard_code);

        let guard_phis = take_phis(function, guards.second_guard);
        let skip_values: FxHashMap<ValueId, Value> = guard_phis
            .iter()
            .filter_map(|phi| {
                let (_, value) = phi
                    .phi_sources()?
                    .iter()
                    .find(|(source, _)| *source == guards.first_guard)?;
                Some((phi.destination()?, *value))
            })
            .collect();
        let join = &mut function.basic_blocks[guards.second_join];
        for phi in join.instructions.iter_mut() {
            let InstructionKind::Phi { sources, .. } = &mut phi.kind else {
                continue;
            };
            for (source, value) in sources.iter_mut() {
                if *source != guards.second_guard {
                    continue;
                }
                if let Some(skipped) = value.as_operand().and_then(|id| skip_values.get(&id)) {
                    *value = *skipped;
                }
            }
        }
        prepend(function, guards.second_join, guard_phis);

        let exit_phis = take_phis(function, l1.exit);
        let exit_code = take_non_phis(function, l1.exit);
        let exit2_phis = take_phis(function, l2.exit);
        let mut leading = exit_phis;
        leading.extend(exit2_phis);
        leading.extend(exit_code);
        prepend(function, l2.exit, leading);

        function.basic_blocks[guards.first_guard]
            .terminator
            .replace_target(guards.second_guard, guards.second_join);
    }
}

/// Tracks where moved values will live while the plan is checked
struct Placement<'p, 'a> {
    ctx: &'p FusionContext<'a>,
    plan: &'p FusionPlan,
    first: LoopId,
    second: LoopId,
    homes: FxHashMap<ValueId, BasicBlockId>,
}

impl Placement<'_, '_> {
    /// Checks the operands of `instruction` at the end of `at`, then records
    /// that its result lives there
    fn place(&mut self, instruction: &Instruction, at: BasicBlockId) -> Result<(), FusionError> {
        let mut operands: Vec<ValueId> = instruction.used_values().into_iter().collect();
        operands.sort();
        for value in operands {
            self.require(value, at)?;
        }
        if let Some(dest) = instruction.destination() {
            self.homes.insert(dest, at);
        }
        Ok(())
    }

    /// The value standing for `value` after fusion, and the block defining it
    fn resolve(&self, value: ValueId) -> (ValueId, Option<BasicBlockId>) {
        let value = if self.plan.unifies(Some(value)) {
            self.plan.first.induction
        } else {
            value
        };
        let home = match self.homes.get(&value) {
            Some(&home) => Some(home),
            None => self.ctx.scev.defining_block(value),
        };
        (value, home)
    }

    /// Checks that `value` is available at the end of `at` after fusion
    fn require(&self, value: ValueId, at: BasicBlockId) -> Result<(), FusionError> {
        let (l1, l2) = (&self.plan.first, &self.plan.second);
        let (value, Some(home)) = self.resolve(value) else {
            return Ok(());
        };

        let dom_tree = &self.ctx.analyses.dom_tree;
        let spliced_body = at == l1.latch
            && l2.body.is_some()
            && home != l2.header
            && home != l2.latch
            && self.ctx.loops().contains(self.second, home)
            && dom_tree.dominates(home, l2.latch);
        if home == at || dom_tree.strictly_dominates(home, at) || spliced_body {
            Ok(())
        } else {
            Err(FusionError::OperandUnavailable { value, block: at })
        }
    }

    /// Checks that `value` is available in `at`, a block of L2's body that
    /// stays in place but now runs after L1's body and before L1's latch
    fn require_in_body(&self, value: ValueId, at: BasicBlockId) -> Result<(), FusionError> {
        let (l1, l2) = (&self.plan.first, &self.plan.second);
        let (value, Some(home)) = self.resolve(value) else {
            return Ok(());
        };

        let dom_tree = &self.ctx.analyses.dom_tree;
        let loops = self.ctx.loops();
        let in_second_body =
            loops.contains(self.second, home) && home != l2.header && home != l2.latch;
        let available = if in_second_body {
            dom_tree.dominates(home, at)
        } else if loops.contains(self.first, home) {
            let last1 = l1.body.map_or(l1.header, |(_, last)| last);
            home != l1.latch && dom_tree.dominates(home, last1)
        } else {
            dom_tree.dominates(home, l1.header)
        };
        if available {
            Ok(())
        } else {
            Err(FusionError::OperandUnavailable { value, block: at })
        }
    }
}

fn take_phis(function: &mut MirFunction, block: BasicBlockId) -> Vec<Instruction> {
    let data = &mut function.basic_blocks[block];
    let count = data.phi_count();
    data.instructions.drain(..count).collect()
}

fn take_non_phis(function: &mut MirFunction, block: BasicBlockId) -> Vec<Instruction> {
    let data = &mut function.basic_blocks[block];
    let count = data.phi_count();
    data.instructions.drain(count..).collect()
}

fn append(function: &mut MirFunction, block: BasicBlockId, instructions: Vec<Instruction>) {
    let data = &mut function.basic_blocks[block];
    for instruction in instructions {
        data.insert_before_terminator(instruction);
    }
}

/// Inserts `instructions` at the start of `block`
fn prepend(function: &mut MirFunction, block: BasicBlockId, instructions: Vec<Instruction>) {
    let data = &mut function.basic_blocks[block];
    let rest = std::mem::replace(&mut data.instructions, instructions);
    data.instructions.extend(rest);
}

fn reject_phis(function: &MirFunction, block: BasicBlockId) -> Result<(), FusionError> {
    if function.basic_blocks[block].phi_count() > 0 {
        return Err(FusionError::UnsupportedPhi { block });
    }
    Ok(())
}

/// Code that changes position relative to a whole loop must not touch memory
fn require_movable(function: &MirFunction, block: BasicBlockId) -> Result<(), FusionError> {
    let data = &function.basic_blocks[block];
    let start = data.first_non_phi_index();
    for (offset, instruction) in data.non_phis().enumerate() {
        if instruction.touches_memory() || instruction.has_side_effects() {
            return Err(FusionError::UnmovableInstruction {
                block,
                index: start + offset,
            });
        }
    }
    Ok(())
}

/// Plans and applies the fusion of a legal pair on a copy of the function
///
/// With `verify` set, the copy must pass [`MirFunction::validate`]. The
/// function behind `ctx` is never modified.
pub fn fuse_pair(
    ctx: &FusionContext<'_>,
    first: LoopId,
    second: LoopId,
    legality: Legality,
    verify: bool,
) -> Result<MirFunction, FusionError> {
    let plan = FusionPlan::build(ctx, first, second, legality)?;
    log::trace!("Fusion plan: {plan:?}");

    let mut fused = ctx.function.clone();
    plan.apply(&mut fused);
    if verify {
        fused.validate()?;
    }
    Ok(fused)
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
