//! Trip-count equivalence: both loops run their bodies equally often.
//!
//! Counts come from scalar evolution and are compared structurally, so the
//! gate only passes when both are computable.

use crate::analysis::LoopId;

use super::FusionContext;

/// Returns true if both loops are known to execute the same number of times
///
/// Trip counts are compared as canonical symbolic expressions, so `n` and
/// `n + 0` match while `n` and an unrelated `m` never do.
pub fn has_same_trip_count(ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> bool {
    let count1 = ctx.scev.trip_count(first);
    let count2 = ctx.scev.trip_count(second);
    log::trace!("trip counts: {count1} and {count2}");
    count1.is_computable() && count2.is_computable() && count1 == count2
}
