//! Common loop shapes for the integration tests
//!
//! Every loop is emitted in rotated form: the header runs the body, the latch
//! increments the induction variable and branches back while `i < bound`.

#![allow(dead_code)]

use loopweave_mir::analysis::FunctionAnalyses;
use loopweave_mir::passes::loop_fusion::{check_legality, FusionContext, Legality};
use loopweave_mir::{BasicBlockId, BinaryOp, InstrBuilder, MirFunction, Terminator, Value, ValueId};

/// Cells of the arrays allocated by [`copy_loops`]
pub const ARRAY_LEN: usize = 16;
/// Trip count of both loops of [`copy_loops`]
pub const ARRAY_TRIPS: i64 = 8;
/// Offset of the first cell written by [`copy_loops`]
pub const ARRAY_BASE: i64 = 4;

/// `for (i = start; i < bound; i += 1)`, optionally behind a guard
#[derive(Debug, Clone, Copy)]
pub struct LoopSpec {
    pub start: i64,
    pub bound: Value,
    /// Lower value the guard compares against the bound, when guarded
    pub guard_from: Option<i64>,
}

impl LoopSpec {
    pub const fn new(bound: Value) -> Self {
        Self {
            start: 0,
            bound,
            guard_from: None,
        }
    }

    pub const fn starting_at(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    /// Guards the loop with `start < bound`
    pub const fn guarded(mut self) -> Self {
        self.guard_from = Some(self.start);
        self
    }

    /// Guards the loop with `from < bound`
    pub const fn guarded_from(mut self, from: i64) -> Self {
        self.guard_from = Some(from);
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
    /// Where the code after the loop goes
    pub after: BasicBlockId,
    pub induction: ValueId,
}

/// A function under construction with a single parameter `n`
pub struct Program {
    pub function: MirFunction,
    pub n: Value,
    cursor: BasicBlockId,
}

impl Program {
    pub fn new(name: &str) -> Self {
        let mut function = MirFunction::new(name);
        let n = Value::operand(function.new_parameter());
        let cursor = function.entry_block;
        Self {
            function,
            n,
            cursor,
        }
    }

    /// Builder positioned in the block where straight-line code goes next
    pub fn instrs(&mut self) -> InstrBuilder<'_> {
        InstrBuilder::new(&mut self.function, self.cursor)
    }

    pub fn array(&mut self, len: usize) -> Value {
        Value::operand(self.instrs().alloc_frame(len))
    }

    /// Emits a loop at the cursor; `body` fills the header
    pub fn counting_loop(
        &mut self,
        spec: LoopSpec,
        body: impl FnOnce(&mut MirFunction, &EmittedLoop),
    ) -> EmittedLoop {
        let function = &mut self.function;
        let from = self.cursor;
        let (guard, preheader) = match spec.guard_from {
            Some(_) => (Some(from), function.add_basic_block_with_name("preheader")),
            None => (None, from),
        };
        let header = function.add_basic_block_with_name("header");
        let latch = function.add_basic_block_with_name("latch");
        let exit = function.add_basic_block_with_name("exit");
        let after = match guard {
            Some(_) => function.add_basic_block_with_name("join"),
            None => exit,
        };
        let induction = function.new_value_id();
        let next = function.new_value_id();
        let emitted = EmittedLoop {
            guard,
            preheader,
            header,
            latch,
            exit,
            after,
            induction,
        };

        if let (Some(guard), Some(lower)) = (guard, spec.guard_from) {
            let enter = InstrBuilder::new(function, guard).binary_op(
                BinaryOp::Less,
                Value::integer(lower),
                spec.bound,
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
                (preheader, Value::integer(spec.start)),
                (latch, Value::operand(next)),
            ],
        );
        body(function, &emitted);
        function.basic_blocks[header].set_terminator(Terminator::jump(latch));

        let mut instrs = InstrBuilder::new(function, latch);
        instrs.binary_op_to(
            BinaryOp::Add,
            next,
            Value::operand(induction),
            Value::integer(1),
        );
        let again = instrs.binary_op(BinaryOp::Less, Value::operand(next), spec.bound);
        function.basic_blocks[latch].set_terminator(Terminator::branch(
            Value::operand(again),
            header,
            exit,
        ));

        self.cursor = after;
        emitted
    }

    /// Value of `inside` after the loop, `skipped` if a guard bypassed it
    pub fn live_out(&mut self, emitted: &EmittedLoop, inside: ValueId, skipped: Value) -> Value {
        match emitted.guard {
            Some(guard) => Value::operand(
                InstrBuilder::new(&mut self.function, emitted.after)
                    .phi(vec![(emitted.exit, Value::operand(inside)), (guard, skipped)]),
            ),
            None => Value::operand(inside),
        }
    }

    pub fn finish(mut self, values: Vec<Value>) -> MirFunction {
        self.function.basic_blocks[self.cursor].set_terminator(Terminator::return_values(values));
        self.function
    }
}

/// Adds `acc = phi [preheader: init, latch: acc + addend]` to the header and
/// returns `acc + addend`
pub fn accumulate(
    function: &mut MirFunction,
    emitted: &EmittedLoop,
    init: Value,
    addend: Value,
) -> ValueId {
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
    next
}

/// `s1 += i` over `first`, then `s2 += 2 * j` over `second`; returns both
pub fn sum_loops(first: LoopSpec, second: LoopSpec) -> MirFunction {
    let mut program = Program::new("sums");
    let mut s1 = None;
    let l1 = program.counting_loop(first, |function, l| {
        s1 = Some(accumulate(function, l, Value::integer(0), Value::operand(l.induction)));
    });
    let s1 = program.live_out(&l1, s1.unwrap(), Value::integer(0));

    let mut s2 = None;
    let l2 = program.counting_loop(second, |function, l| {
        let doubled = InstrBuilder::new(function, l.header).binary_op(
            BinaryOp::Mul,
            Value::operand(l.induction),
            Value::integer(2),
        );
        s2 = Some(accumulate(function, l, Value::integer(0), Value::operand(doubled)));
    });
    let s2 = program.live_out(&l2, s2.unwrap(), Value::integer(0));
    program.finish(vec![s1, s2])
}

/// Both loops over `0..n`, unguarded
pub fn plain_sum_loops() -> MirFunction {
    let n = Value::operand(ValueId::from_raw(0));
    sum_loops(LoopSpec::new(n), LoopSpec::new(n))
}

/// `a[i + 4] = 3 * i + 1` for `i` in `0..8`, then `s += a[j + 4 + read_offset]`
/// for `j` in `0..8`; returns `s`
pub fn copy_loops(read_offset: i64) -> MirFunction {
    let mut program = Program::new("copy");
    let array = program.array(ARRAY_LEN);
    let trips = Value::integer(ARRAY_TRIPS);

    program.counting_loop(LoopSpec::new(trips), |function, l| {
        let mut instrs = InstrBuilder::new(function, l.header);
        let i = Value::operand(l.induction);
        let index = instrs.binary_op(BinaryOp::Add, i, Value::integer(ARRAY_BASE));
        let address = instrs.get_element_ptr(array, Value::operand(index));
        let scaled = instrs.binary_op(BinaryOp::Mul, i, Value::integer(3));
        let value = instrs.binary_op(BinaryOp::Add, Value::operand(scaled), Value::integer(1));
        instrs.store(Value::operand(address), Value::operand(value));
    });

    let mut sum = None;
    program.counting_loop(LoopSpec::new(trips), |function, l| {
        let mut instrs = InstrBuilder::new(function, l.header);
        let index = instrs.binary_op(
            BinaryOp::Add,
            Value::operand(l.induction),
            Value::integer(ARRAY_BASE + read_offset),
        );
        let address = instrs.get_element_ptr(array, Value::operand(index));
        let loaded = instrs.load(Value::operand(address));
        sum = Some(accumulate(function, l, Value::integer(0), Value::operand(loaded)));
    });
    let sum = Value::operand(sum.unwrap());
    program.finish(vec![sum])
}

/// `count` back-to-back loops over `0..n`, the k-th summing `k * i`
pub fn chained_loops(count: i64) -> MirFunction {
    let mut program = Program::new("chain");
    let n = program.n;
    let mut sums = Vec::new();
    for k in 1..=count {
        program.counting_loop(LoopSpec::new(n), |function, l| {
            let scaled = InstrBuilder::new(function, l.header).binary_op(
                BinaryOp::Mul,
                Value::operand(l.induction),
                Value::integer(k),
            );
            let sum = accumulate(function, l, Value::integer(0), Value::operand(scaled));
            sums.push(Value::operand(sum));
        });
    }
    program.finish(sums)
}

/// Legality of the first sibling pair of `function`
pub fn first_pair_legality(function: &MirFunction) -> Legality {
    let analyses = FunctionAnalyses::compute(function);
    let ctx = FusionContext::new(function, &analyses);
    let group = &ctx.loops().sibling_groups()[0];
    check_legality(&ctx, group[0], group[1], 1)
}

pub fn loop_count(function: &MirFunction) -> usize {
    FunctionAnalyses::compute(function).loops.len()
}
