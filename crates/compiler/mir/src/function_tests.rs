use super::*;
use crate::testing::{single_sum_loop, two_sum_loops, CountingLoop};
use crate::{BinaryOp, InstrBuilder, Instruction, Literal, Terminator, Value};

/// `entry -> (left | right) -> merge`, branching on the single parameter
fn diamond() -> (MirFunction, [BasicBlockId; 4]) {
    let mut func = MirFunction::new("diamond");
    let flag = func.new_parameter();
    let entry = func.entry_block;
    let left = func.add_basic_block_with_name("left");
    let right = func.add_basic_block_with_name("right");
    let merge = func.add_basic_block_with_name("merge");

    func.basic_blocks[entry].set_terminator(Terminator::branch(
        Value::operand(flag),
        left,
        right,
    ));
    func.basic_blocks[left].set_terminator(Terminator::jump(merge));
    func.basic_blocks[right].set_terminator(Terminator::jump(merge));
    func.basic_blocks[merge].set_terminator(Terminator::return_void());
    (func, [entry, left, right, merge])
}

#[test]
fn test_generated_loops_validate() {
    let (single, _) = single_sum_loop();
    assert_eq!(single.validate(), Ok(()));

    let (guarded, _, _) = two_sum_loops(
        CountingLoop::new(Value::integer(3)).guarded(),
        CountingLoop::new(Value::integer(3)).guarded(),
    );
    assert_eq!(guarded.validate(), Ok(()));
}

#[test]
fn test_value_definitions() {
    let (func, emitted) = single_sum_loop();
    let definitions = func.value_definitions();

    assert_eq!(definitions[&func.parameters[0]], ValueDefinition::Parameter);
    assert_eq!(
        definitions[&emitted.induction],
        ValueDefinition::Instruction {
            block: emitted.header,
            index: 0
        }
    );
    assert_eq!(definitions[&emitted.next_induction].block(), Some(emitted.latch));
}

#[test]
fn test_dangling_target() {
    let mut func = MirFunction::new("dangling");
    let entry = func.entry_block;
    let nowhere = BasicBlockId::from_raw(7);
    func.basic_blocks[entry].set_terminator(Terminator::jump(nowhere));

    assert_eq!(
        func.validate(),
        Err(ValidationError::DanglingTarget {
            block: entry,
            target: nowhere
        })
    );
}

#[test]
fn test_misplaced_phi() {
    let (mut func, [_, left, right, merge]) = diamond();
    let x = func.new_value_id();
    let y = func.new_value_id();
    func.basic_blocks[merge].push_instruction(Instruction::assign(x, Value::integer(1)));
    func.basic_blocks[merge].push_instruction(Instruction::phi(
        y,
        vec![(left, Value::integer(0)), (right, Value::integer(1))],
    ));

    assert_eq!(
        func.validate(),
        Err(ValidationError::MisplacedPhi {
            block: merge,
            position: 1
        })
    );
}

#[test]
fn test_phi_operands_must_match_predecessors() {
    let (mut func, [_, left, right, merge]) = diamond();
    let missing = func.new_value_id();
    InstrBuilder::new(&mut func, merge).phi_to(missing, vec![(left, Value::integer(0))]);

    assert_eq!(
        func.validate(),
        Err(ValidationError::PhiPredecessorMismatch {
            block: merge,
            phi: missing,
            pred: right,
            count: 0
        })
    );

    let (mut func, [entry, left, right, merge]) = diamond();
    let foreign = func.new_value_id();
    InstrBuilder::new(&mut func, merge).phi_to(
        foreign,
        vec![
            (left, Value::integer(0)),
            (right, Value::integer(1)),
            (entry, Value::integer(2)),
        ],
    );
    assert_eq!(
        func.validate(),
        Err(ValidationError::PhiFromNonPredecessor {
            block: merge,
            phi: foreign,
            source_block: entry
        })
    );
}

#[test]
fn test_duplicate_definition() {
    let mut func = MirFunction::new("twice");
    let entry = func.entry_block;
    let x = func.new_value_id();
    func.basic_blocks[entry].push_instruction(Instruction::assign(x, Value::integer(1)));
    func.basic_blocks[entry].push_instruction(Instruction::assign(x, Value::integer(2)));
    func.basic_blocks[entry].set_terminator(Terminator::return_values(vec![Value::operand(x)]));

    assert_eq!(func.validate(), Err(ValidationError::DuplicateDefinition(x)));
}

#[test]
fn test_use_before_definition() {
    let mut func = MirFunction::new("early");
    let entry = func.entry_block;
    let x = func.new_value_id();
    let y = func.new_value_id();
    func.basic_blocks[entry].push_instruction(Instruction::binary_op(
        BinaryOp::Add,
        y,
        Value::operand(x),
        Value::integer(1),
    ));
    func.basic_blocks[entry].push_instruction(Instruction::assign(x, Value::integer(1)));
    func.basic_blocks[entry].set_terminator(Terminator::return_values(vec![Value::operand(y)]));

    assert_eq!(
        func.validate(),
        Err(ValidationError::UseNotDominated {
            block: entry,
            value: x
        })
    );
}

#[test]
fn test_use_not_dominated_across_blocks() {
    let (mut func, [_, left, _, merge]) = diamond();
    let x = InstrBuilder::new(&mut func, left).literal(Literal::Integer(5));
    func.basic_blocks[merge].set_terminator(Terminator::return_values(vec![Value::operand(x)]));

    assert_eq!(
        func.validate(),
        Err(ValidationError::UseNotDominated {
            block: merge,
            value: x
        })
    );
}

#[test]
fn test_undefined_value() {
    let mut func = MirFunction::new("ghost");
    let ghost = func.new_value_id();
    let entry = func.entry_block;
    func.basic_blocks[entry].set_terminator(Terminator::return_values(vec![ghost.into()]));

    assert_eq!(
        func.validate(),
        Err(ValidationError::UndefinedValue {
            block: entry,
            value: ghost
        })
    );
}

#[test]
fn test_unreachable_blocks_are_not_checked() {
    let (mut func, _) = single_sum_loop();
    let orphan = func.add_basic_block();
    let ghost = func.new_value_id();
    func.basic_blocks[orphan].set_terminator(Terminator::return_values(vec![ghost.into()]));

    assert_eq!(func.unreachable_blocks(), vec![orphan]);
    assert!(!func.is_block_reachable(orphan));
    assert_eq!(func.validate(), Ok(()));
}

#[test]
fn test_replace_all_uses() {
    let (mut func, emitted) = single_sum_loop();
    let n = func.parameters[0];
    let uses = func.get_value_use_counts();
    let before = uses.get(&emitted.induction).copied().unwrap_or(0);
    assert!(before > 0);

    func.replace_all_uses(emitted.induction, n);
    let uses = func.get_value_use_counts();
    assert_eq!(uses.get(&emitted.induction), None);
}
