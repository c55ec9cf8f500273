use std::fmt;

use crate::analysis::LoopId;

use super::{
    has_no_negative_dependence, has_same_trip_count, is_adjacent, is_control_flow_equivalent,
    FusionContext,
};

/// The checks a loop pair must pass, in the order they are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FusionGate {
    /// Both loops are guarded or neither is
    GuardParity,
    Adjacency,
    TripCount,
    ControlFlow,
    Dependence,
}

impl FusionGate {
    pub const ALL: [Self; 5] = [
        Self::GuardParity,
        Self::Adjacency,
        Self::TripCount,
        Self::ControlFlow,
        Self::Dependence,
    ];

    fn passes(self, ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> bool {
        match self {
            Self::GuardParity => ctx.get(first).is_guarded() == ctx.get(second).is_guarded(),
            Self::Adjacency => is_adjacent(ctx, first, second),
            Self::TripCount => has_same_trip_count(ctx, first, second),
            Self::ControlFlow => is_control_flow_equivalent(ctx, first, second),
            Self::Dependence => has_no_negative_dependence(ctx, first, second),
        }
    }
}

impl fmt::Display for FusionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GuardParity => "guard parity",
            Self::Adjacency => "adjacency",
            Self::TripCount => "trip count",
            Self::ControlFlow => "control-flow equivalence",
            Self::Dependence => "dependence",
        };
        f.write_str(name)
    }
}

/// Outcome of [`check_legality`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Legality {
    Legal,
    /// The first gate the pair failed
    Illegal(FusionGate),
}

impl Legality {
    pub const fn is_legal(self) -> bool {
        matches!(self, Self::Legal)
    }

    pub const fn failed_gate(self) -> Option<FusionGate> {
        match self {
            Self::Legal => None,
            Self::Illegal(gate) => Some(gate),
        }
    }
}

/// Runs every [`FusionGate`] in order, stopping at the first failure
///
/// `pair` only numbers the pair in the debug log.
pub fn check_legality(
    ctx: &FusionContext<'_>,
    first: LoopId,
    second: LoopId,
    pair: usize,
) -> Legality {
    log::debug!(
        "Pair {pair}: loops at bb{} and bb{}",
        ctx.get(first).header.index(),
        ctx.get(second).header.index()
    );
    for gate in FusionGate::ALL {
        if !gate.passes(ctx, first, second) {
            log::debug!("Pair {pair}: {gate} failed");
            return Legality::Illegal(gate);
        }
        log::debug!("Pair {pair}: {gate} passed");
    }
    Legality::Legal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FunctionAnalyses;
    use crate::testing::{param_n, store_then_load_loops, two_sum_loops, CountingLoop};
    use crate::{MirFunction, Value};

    fn legality(function: &MirFunction) -> Legality {
        let analyses = FunctionAnalyses::compute(function);
        let ctx = FusionContext::new(function, &analyses);
        let group = &ctx.loops().sibling_groups()[0];
        check_legality(&ctx, group[0], group[1], 1)
    }

    #[test]
    fn test_legal_pairs() {
        let (unguarded, _, _) =
            two_sum_loops(CountingLoop::new(param_n()), CountingLoop::new(param_n()));
        assert_eq!(legality(&unguarded), Legality::Legal);

        let (guarded, _, _) = two_sum_loops(
            CountingLoop::new(param_n()).guarded(),
            CountingLoop::new(param_n()).guarded(),
        );
        assert!(legality(&guarded).is_legal());
    }

    #[test]
    fn test_first_failing_gate_is_reported() {
        let (mixed, _, _) = two_sum_loops(
            CountingLoop::new(param_n()).guarded(),
            CountingLoop::new(param_n()),
        );
        assert_eq!(
            legality(&mixed).failed_gate(),
            Some(FusionGate::GuardParity)
        );

        // Different bounds fail on trip count before control flow is looked at
        let (bounds, _, _) = two_sum_loops(
            CountingLoop::new(Value::integer(10)).guarded(),
            CountingLoop::new(Value::integer(20)).guarded(),
        );
        assert_eq!(legality(&bounds), Legality::Illegal(FusionGate::TripCount));

        let (reads_ahead, _, _) = store_then_load_loops(0, 1);
        assert_eq!(
            legality(&reads_ahead),
            Legality::Illegal(FusionGate::Dependence)
        );
    }

    #[test]
    fn test_gate_names() {
        let names: Vec<String> = FusionGate::ALL.iter().map(ToString::to_string).collect();
        insta::assert_debug_snapshot!(names, @r###"
        [
            "guard parity",
            "adjacency",
            "trip count",
            "control-flow equivalence",
            "dependence",
        ]
        "###);
    }
}
