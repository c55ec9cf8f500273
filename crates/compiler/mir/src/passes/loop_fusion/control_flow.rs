//! Control-flow equivalence: one loop runs exactly when the other does.

use crate::analysis::LoopId;
use crate::{InstructionKind, Terminator, Value};

use super::FusionContext;

/// Returns true if `first` executes exactly when `second` does
///
/// Each loop is represented by its guard if it has one, otherwise by its
/// header. The representative of `first` must dominate the one of `second`,
/// which in turn must post-dominate it. Guarded pairs additionally need
/// matching guards ([`guards_match`]).
pub fn is_control_flow_equivalent(ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> bool {
    let (l1, l2) = (ctx.get(first), ctx.get(second));
    if l1.is_guarded() && l2.is_guarded() && !guards_match(ctx, first, second) {
        log::trace!(
            "guards of the loops at bb{} and bb{} differ",
            l1.header.index(),
            l2.header.index()
        );
        return false;
    }

    let (rep1, rep2) = (l1.entry_block(), l2.entry_block());
    ctx.analyses.dom_tree.dominates(rep1, rep2) && ctx.analyses.post_dom_tree.dominates(rep2, rep1)
}

/// Returns true if both guards enter their loop under the same condition
///
/// Conditions match when they are the same value, or two comparisons with
/// the same operator and operands. Both guards must also enter on the same
/// branch polarity.
pub fn guards_match(ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> bool {
    let (l1, l2) = (ctx.get(first), ctx.get(second));
    let (Some(guard1), Some(guard2), Some(preheader1), Some(preheader2)) =
        (l1.guard, l2.guard, l1.preheader, l2.preheader)
    else {
        return false;
    };

    let blocks = &ctx.function.basic_blocks;
    let (
        Terminator::If {
            condition: condition1,
            then_target: then1,
            ..
        },
        Terminator::If {
            condition: condition2,
            then_target: then2,
            ..
        },
    ) = (&blocks[guard1].terminator, &blocks[guard2].terminator)
    else {
        return false;
    };

    if (*then1 == preheader1) != (*then2 == preheader2) {
        return false;
    }
    condition1 == condition2 || same_comparison(ctx, *condition1, *condition2)
}

fn same_comparison(ctx: &FusionContext<'_>, a: Value, b: Value) -> bool {
    let (Some(a), Some(b)) = (a.as_operand(), b.as_operand()) else {
        return false;
    };
    let (Some((_, a)), Some((_, b))) = (ctx.definition(a), ctx.definition(b)) else {
        return false;
    };
    match (&a.kind, &b.kind) {
        (
            InstructionKind::BinaryOp {
                op: op_a,
                left: left_a,
                right: right_a,
                ..
            },
            InstructionKind::BinaryOp {
                op: op_b,
                left: left_b,
                right: right_b,
                ..
            },
        ) => op_a.is_comparison() && op_a == op_b && left_a == left_b && right_a == right_b,
        _ => false,
    }
}
