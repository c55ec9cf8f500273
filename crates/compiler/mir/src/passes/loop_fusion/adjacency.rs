//! Adjacency: control leaving L1 reaches L2 through glue blocks only.

use crate::analysis::{Loop, LoopId};
use crate::{cfg, BasicBlockId, MirFunction, Terminator, ValueId};

use super::FusionContext;

/// Returns true if `second` directly follows `first`
///
/// Unguarded loops are adjacent when L1's exit is L2's preheader. Guarded
/// loops are adjacent when L1's guard skips straight to L2's guard and L1's
/// exit leads there too. The blocks in between may not consume values
/// computed by L1, except guarded glue whose results never reach L2 (the
/// merge of a live-out value with its skip value, typically).
pub fn is_adjacent(ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> bool {
    let (l1, l2) = (ctx.get(first), ctx.get(second));
    let Some(between) = intervening_blocks(ctx.function, l1, l2) else {
        return false;
    };
    between
        .into_iter()
        .all(|block| !consumes_first_loop(ctx, first, second, block))
}

/// Blocks executed after L1 and before L2's header, in order
pub(super) fn intervening_blocks(
    function: &MirFunction,
    first: &Loop,
    second: &Loop,
) -> Option<Vec<BasicBlockId>> {
    let exit1 = first.exit?;
    let preheader2 = second.preheader?;

    match (first.guard, second.guard) {
        (None, None) => (exit1 == preheader2).then(|| vec![preheader2]),
        (Some(guard1), Some(guard2)) => {
            if skip_target(function, guard1, first.preheader?)? != guard2 {
                return None;
            }
            if exit1 == guard2 {
                return Some(vec![guard2, preheader2]);
            }
            (cfg::get_successors(function, exit1).as_slice() == [guard2])
                .then(|| vec![exit1, guard2, preheader2])
        }
        _ => None,
    }
}

/// The successor of `guard` that bypasses `preheader`
pub(super) fn skip_target(
    function: &MirFunction,
    guard: BasicBlockId,
    preheader: BasicBlockId,
) -> Option<BasicBlockId> {
    match function.basic_blocks[guard].terminator {
        Terminator::If {
            then_target,
            else_target,
            ..
        } if then_target == preheader => Some(else_target),
        Terminator::If {
            then_target,
            else_target,
            ..
        } if else_target == preheader => Some(then_target),
        _ => None,
    }
}

fn consumes_first_loop(
    ctx: &FusionContext<'_>,
    first: LoopId,
    second: LoopId,
    block: BasicBlockId,
) -> bool {
    let data = &ctx.function.basic_blocks[block];
    let from_first = |value: &ValueId| ctx.defined_in(*value, first);

    if data.terminator.used_values().iter().any(from_first) {
        log::trace!("bb{}: terminator consumes a value of the first loop", block.index());
        return true;
    }

    let first_is_guarded = ctx.get(first).is_guarded();
    data.instructions.iter().any(|instruction| {
        if !instruction.used_values().iter().any(from_first) {
            return false;
        }
        let reaches_second = instruction
            .destination()
            .map_or(true, |dest| used_in_loop(ctx, dest, second));
        let blocking = !first_is_guarded || reaches_second;
        if blocking {
            log::trace!(
                "bb{}: `{}` consumes a value of the first loop",
                block.index(),
                crate::PrettyPrint::pretty_print(instruction, 0)
            );
        }
        blocking
    })
}

fn used_in_loop(ctx: &FusionContext<'_>, value: ValueId, loop_id: LoopId) -> bool {
    ctx.get(loop_id).blocks.iter().any(|&block| {
        let data = &ctx.function.basic_blocks[block];
        data.instructions
            .iter()
            .any(|instruction| instruction.used_values().contains(&value))
            || data.terminator.used_values().contains(&value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FunctionAnalyses;
    use crate::testing::{
        emit_accumulator, emit_counting_loop, param_n, two_sum_loops, CountingLoop,
    };
    use crate::{BinaryOp, InstrBuilder, Value};

    fn first_pair(function: &MirFunction) -> bool {
        let analyses = FunctionAnalyses::compute(function);
        let ctx = FusionContext::new(function, &analyses);
        let groups = ctx.loops().sibling_groups();
        is_adjacent(&ctx, groups[0][0], groups[0][1])
    }

    #[test]
    fn test_back_to_back_loops_are_adjacent() {
        let (function, _, _) =
            two_sum_loops(CountingLoop::new(param_n()), CountingLoop::new(param_n()));
        assert!(first_pair(&function));
    }

    #[test]
    fn test_guarded_live_out_merge_is_allowed() {
        let (function, l1, _) = two_sum_loops(
            CountingLoop::new(param_n()).guarded(),
            CountingLoop::new(param_n()).guarded(),
        );
        // The second guard block merges the first sum with its skip value
        assert_eq!(function.basic_blocks[l1.after].phi_count(), 1);
        assert!(first_pair(&function));
    }

    #[test]
    fn test_extra_block_between_loops() {
        let mut function = MirFunction::new("gap");
        let n = Value::operand(function.new_parameter());
        let entry = function.entry_block;

        let (l1, ()) = emit_counting_loop(&mut function, entry, CountingLoop::new(n), |_, _| {});
        let gap = function.add_basic_block_with_name("gap");
        function.basic_blocks[l1.after].set_terminator(Terminator::jump(gap));
        let (l2, ()) = emit_counting_loop(&mut function, gap, CountingLoop::new(n), |_, _| {});
        function.basic_blocks[l2.after].set_terminator(Terminator::return_void());

        assert!(!first_pair(&function));
    }

    #[test]
    fn test_glue_consuming_first_loop_value() {
        let mut function = MirFunction::new("glue");
        let n = Value::operand(function.new_parameter());
        let entry = function.entry_block;

        let (l1, sum) = emit_counting_loop(&mut function, entry, CountingLoop::new(n), |f, l| {
            emit_accumulator(f, l, Value::integer(0), Value::operand(l.induction)).1
        });
        // Computed between the loops from the first loop's result
        let scaled = InstrBuilder::new(&mut function, l1.after).binary_op(
            BinaryOp::Mul,
            Value::operand(sum),
            Value::integer(3),
        );
        let (l2, ()) = emit_counting_loop(&mut function, l1.after, CountingLoop::new(n), |_, _| {});
        function.basic_blocks[l2.after]
            .set_terminator(Terminator::return_values(vec![Value::operand(scaled)]));

        assert!(function.validate().is_ok());
        assert!(!first_pair(&function));
    }

    #[test]
    fn test_guard_parity_mismatch_is_not_adjacent() {
        let (function, _, _) = two_sum_loops(
            CountingLoop::new(param_n()).guarded(),
            CountingLoop::new(param_n()),
        );
        assert!(!first_pair(&function));
    }
}
