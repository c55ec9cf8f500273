use super::*;
use crate::testing::{emit_accumulator, emit_counting_loop, param_n, two_sum_loops, CountingLoop};
use crate::{Terminator, Value};

/// `count` back-to-back loops over `0..n`, each summing `i` into its own
/// accumulator; returns every sum
fn chained_sum_loops(count: usize) -> MirFunction {
    let mut function = MirFunction::new("chained");
    let n = Value::operand(function.new_parameter());
    let mut from = function.entry_block;
    let mut sums = Vec::with_capacity(count);
    for _ in 0..count {
        let (emitted, sum) =
            emit_counting_loop(&mut function, from, CountingLoop::new(n), |function, emitted| {
                let induction = Value::operand(emitted.induction);
                emit_accumulator(function, emitted, Value::integer(0), induction).1
            });
        sums.push(Value::operand(sum));
        from = emitted.after;
    }
    function.basic_blocks[from].set_terminator(Terminator::return_values(sums));
    function
}

fn loop_count(function: &MirFunction) -> usize {
    FunctionAnalyses::compute(function).loops.len()
}

#[test]
fn test_fuses_adjacent_pair() {
    let (mut function, _, _) =
        two_sum_loops(CountingLoop::new(param_n()), CountingLoop::new(param_n()));

    assert!(LoopFusion::new().run(&mut function));
    assert_eq!(loop_count(&function), 1);
    assert!(function.validate().is_ok());
}

#[test]
fn test_chain_collapses_into_one_loop() {
    let mut function = chained_sum_loops(3);
    assert_eq!(loop_count(&function), 3);

    assert!(LoopFusion::new().run(&mut function));
    assert_eq!(loop_count(&function), 1);
    assert!(function.validate().is_ok());

    // A second run has nothing left to do
    assert!(!LoopFusion::new().run(&mut function));
}

#[test]
fn test_max_fusions_limits_rounds() {
    let mut function = chained_sum_loops(4);
    let mut pass = LoopFusion::with_config(FusionConfig {
        max_fusions: Some(2),
        ..FusionConfig::default()
    });

    assert!(pass.run(&mut function));
    assert_eq!(loop_count(&function), 2);
}

#[test]
fn test_guarded_pairs_can_be_disabled() {
    let (mut function, _, _) = two_sum_loops(
        CountingLoop::new(param_n()).guarded(),
        CountingLoop::new(param_n()).guarded(),
    );
    let before = function.clone();
    let mut pass = LoopFusion::with_config(FusionConfig {
        fuse_guarded: false,
        ..FusionConfig::default()
    });

    assert!(!pass.run(&mut function));
    assert_eq!(function, before);

    assert!(LoopFusion::new().run(&mut function));
    assert_eq!(loop_count(&function), 1);
}

#[test]
fn test_illegal_pair_is_left_alone() {
    let (mut function, _, _) = two_sum_loops(
        CountingLoop::new(Value::integer(10)),
        CountingLoop::new(Value::integer(20)),
    );
    let before = function.clone();

    assert!(!LoopFusion::new().run(&mut function));
    assert_eq!(function, before);
}

#[test]
fn test_unverified_fusion() {
    let (mut function, _, _) =
        two_sum_loops(CountingLoop::new(param_n()), CountingLoop::new(param_n()));
    let mut pass = LoopFusion::with_config(FusionConfig {
        verify_after_fusion: false,
        ..FusionConfig::default()
    });

    assert!(pass.run(&mut function));
    assert!(function.validate().is_ok());
}

#[test]
fn test_definition_lookup() {
    let (function, l1, _) =
        two_sum_loops(CountingLoop::new(param_n()), CountingLoop::new(param_n()));
    let analyses = FunctionAnalyses::compute(&function);
    let ctx = FusionContext::new(&function, &analyses);
    let first = ctx.loops().sibling_groups()[0][0];

    let (at, instruction) = ctx.definition(l1.next_induction).unwrap();
    assert_eq!(at.block, l1.latch);
    assert_eq!(instruction.destination(), Some(l1.next_induction));
    assert!(ctx.defined_in(l1.induction, first));
    assert!(ctx.definition(ValueId::from_raw(0)).is_none());
}

#[test]
fn test_pass_name() {
    assert_eq!(LoopFusion::new().name(), "LoopFusion");
}
