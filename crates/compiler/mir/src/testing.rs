//! # Testing Utilities for MIR
//!
//! Helpers for building loop-shaped functions in unit tests.

use crate::builder::{CfgBuilder, DoWhileBlocks};
use crate::{BasicBlockId, BinaryOp, InstrBuilder, MirFunction, Terminator, Value, ValueId};

/// Shape of a counting loop `i = start; do { body } while (i + step < bound)`
#[derive(Debug, Clone, Copy)]
pub struct CountingLoop {
    pub start: i64,
    pub step: i64,
    pub bound: Value,
    pub guarded: bool,
}

impl CountingLoop {
    pub const fn new(bound: Value) -> Self {
        Self {
            start: 0,
            step: 1,
            bound,
            guarded: false,
        }
    }

    pub const fn guarded(mut self) -> Self {
        self.guarded = true;
        self
    }

    pub const fn starting_at(mut self, start: i64) -> Self {
        self.start = start;
        self
    }
}

/// Blocks and values of an emitted loop
#[derive(Debug, Clone, Copy)]
pub struct EmittedLoop {
    pub guard: Option<BasicBlockId>,
    pub preheader: BasicBlockId,
    pub header: BasicBlockId,
    pub latch: BasicBlockId,
    pub exit: BasicBlockId,
    /// Block where code after the loop goes (the join block when guarded)
    pub after: BasicBlockId,
    pub induction: ValueId,
    pub next_induction: ValueId,
}

/// Emits a counting loop reached from `from`
///
/// An unguarded loop uses `from` as its preheader; a guarded loop uses `from`
/// as the guard and gets a fresh preheader. Either way `from` must not be
/// terminated yet. `body` fills the header (which jumps to the latch) and gets
/// the induction variable; whatever it returns is passed back. `after` is left
/// unterminated.
pub fn emit_counting_loop<R>(
    function: &mut MirFunction,
    from: BasicBlockId,
    shape: CountingLoop,
    body: impl FnOnce(&mut MirFunction, &EmittedLoop) -> R,
) -> (EmittedLoop, R) {
    let mut cfg = CfgBuilder::new(function, from);
    let (guard, preheader, header, latch, exit, after) = if shape.guarded {
        let DoWhileBlocks {
            preheader,
            header,
            latch,
            exit,
        } = cfg.create_do_while_blocks();
        let join = cfg.new_block(Some("for_join".to_string()));
        (Some(from), preheader, header, latch, exit, join)
    } else {
        let header = cfg.new_block(Some("loop_header".to_string()));
        let latch = cfg.new_block(Some("loop_latch".to_string()));
        let exit = cfg.new_block(Some("loop_exit".to_string()));
        (None, from, header, latch, exit, exit)
    };

    let induction = function.new_value_id();
    let next_induction = function.new_value_id();
    let emitted = EmittedLoop {
        guard,
        preheader,
        header,
        latch,
        exit,
        after,
        induction,
        next_induction,
    };

    if let Some(guard) = guard {
        let enter = InstrBuilder::new(function, guard).binary_op(
            BinaryOp::Less,
            Value::integer(shape.start),
            shape.bound,
        );
        function.basic_blocks[guard].set_terminator(Terminator::branch(
            Value::operand(enter),
            preheader,
            after,
        ));
        function.basic_blocks[exit].set_terminator(Terminator::jump(after));
    }
    function.basic_blocks[preheader].set_terminator(Terminator::jump(header));

    InstrBuilder::new(function, header).phi_to(
        induction,
        vec![
            (preheader, Value::integer(shape.start)),
            (latch, Value::operand(next_induction)),
        ],
    );
    let result = body(function, &emitted);
    function.basic_blocks[header].set_terminator(Terminator::jump(latch));

    let mut instrs = InstrBuilder::new(function, latch);
    instrs.binary_op_to(
        BinaryOp::Add,
        next_induction,
        Value::operand(induction),
        Value::integer(shape.step),
    );
    let keep_going = instrs.binary_op(BinaryOp::Less, Value::operand(next_induction), shape.bound);
    function.basic_blocks[latch].set_terminator(Terminator::branch(
        Value::operand(keep_going),
        header,
        exit,
    ));

    (emitted, result)
}

/// Adds `acc = phi [preheader: init, latch: acc + addend]` to a loop header and
/// returns `(acc, acc + addend)`
pub fn emit_accumulator(
    function: &mut MirFunction,
    emitted: &EmittedLoop,
    init: Value,
    addend: Value,
) -> (ValueId, ValueId) {
    let acc = function.new_value_id();
    let next = function.new_value_id();
    InstrBuilder::new(function, emitted.header)
        .phi_to(
            acc,
            vec![
                (emitted.preheader, init),
                (emitted.latch, Value::operand(next)),
            ],
        )
        .binary_op_to(BinaryOp::Add, next, Value::operand(acc), addend);
    (acc, next)
}

/// `fn sum(n) { s = 0; for i in 0..n { s += i }; return s }` as a rotated loop
pub fn single_sum_loop() -> (MirFunction, EmittedLoop) {
    let mut function = MirFunction::new("sum");
    let n = function.new_parameter();
    let entry = function.entry_block;

    let (emitted, sum) = emit_counting_loop(
        &mut function,
        entry,
        CountingLoop::new(Value::operand(n)),
        |function, emitted| {
            let induction = Value::operand(emitted.induction);
            emit_accumulator(function, emitted, Value::integer(0), induction).1
        },
    );
    function.basic_blocks[emitted.after]
        .set_terminator(Terminator::return_values(vec![Value::operand(sum)]));
    (function, emitted)
}

/// The single parameter `n` of the generated functions
pub fn param_n() -> Value {
    Value::operand(ValueId::from_raw(0))
}

/// Two sibling loops summing `i` and `2 * i` into separate accumulators
///
/// Bounds may refer to [`param_n`]. The function returns both sums.
pub fn two_sum_loops(
    first: CountingLoop,
    second: CountingLoop,
) -> (MirFunction, EmittedLoop, EmittedLoop) {
    let mut function = MirFunction::new("two_sums");
    let n = function.new_parameter();
    debug_assert_eq!(Value::operand(n), param_n());
    let entry = function.entry_block;

    let (l1, s1) = emit_counting_loop(&mut function, entry, first, |function, emitted| {
        let induction = Value::operand(emitted.induction);
        emit_accumulator(function, emitted, Value::integer(0), induction).1
    });
    let s1_out = live_out(&mut function, &l1, s1, Value::integer(0));

    let (l2, s2) = emit_counting_loop(&mut function, l1.after, second, |function, emitted| {
        let doubled = InstrBuilder::new(function, emitted.header).binary_op(
            BinaryOp::Mul,
            Value::operand(emitted.induction),
            Value::integer(2),
        );
        emit_accumulator(function, emitted, Value::integer(0), Value::operand(doubled)).1
    });
    let s2_out = live_out(&mut function, &l2, s2, Value::integer(0));

    function.basic_blocks[l2.after].set_terminator(Terminator::return_values(vec![
        Value::operand(s1_out),
        Value::operand(s2_out),
    ]));
    (function, l1, l2)
}

/// Value of `inside` after the loop: merged with `skipped` when the loop is guarded
pub fn live_out(
    function: &mut MirFunction,
    emitted: &EmittedLoop,
    inside: ValueId,
    skipped: Value,
) -> ValueId {
    match emitted.guard {
        Some(guard) => InstrBuilder::new(function, emitted.after)
            .phi(vec![(emitted.exit, Value::operand(inside)), (guard, skipped)]),
        None => inside,
    }
}

/// Cells of the array used by [`store_then_load_loops`]
pub const ARRAY_LEN: usize = 16;

/// Trip count of both loops of [`store_then_load_loops`]
pub const ARRAY_TRIPS: i64 = 8;

/// `a[i + write_offset] = i` for every `i`, then `s += a[j + read_offset]`
/// for every `j`, over a frame array; returns `s`
pub fn store_then_load_loops(
    write_offset: i64,
    read_offset: i64,
) -> (MirFunction, EmittedLoop, EmittedLoop) {
    let mut function = MirFunction::new("store_then_load");
    let entry = function.entry_block;
    let array = Value::operand(InstrBuilder::new(&mut function, entry).alloc_frame(ARRAY_LEN));
    let bound = Value::integer(ARRAY_TRIPS);

    let (l1, ()) = emit_counting_loop(&mut function, entry, CountingLoop::new(bound), |f, l| {
        let mut instrs = InstrBuilder::new(f, l.header);
        let index = instrs.binary_op(
            BinaryOp::Add,
            Value::operand(l.induction),
            Value::integer(write_offset),
        );
        let address = instrs.get_element_ptr(array, Value::operand(index));
        instrs.store(Value::operand(address), Value::operand(l.induction));
    });

    let (l2, sum) = emit_counting_loop(&mut function, l1.after, CountingLoop::new(bound), |f, l| {
        let mut instrs = InstrBuilder::new(f, l.header);
        let index = instrs.binary_op(
            BinaryOp::Add,
            Value::operand(l.induction),
            Value::integer(read_offset),
        );
        let address = instrs.get_element_ptr(array, Value::operand(index));
        let loaded = instrs.load(Value::operand(address));
        emit_accumulator(f, l, Value::integer(0), Value::operand(loaded)).1
    });

    function.basic_blocks[l2.after]
        .set_terminator(Terminator::return_values(vec![Value::operand(sum)]));
    (function, l1, l2)
}
