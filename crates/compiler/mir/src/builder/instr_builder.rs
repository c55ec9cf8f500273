//! # Instruction Builder
//!
//! A fluent API for appending instructions to one block of a function.
//! Methods without the `_to` suffix allocate their destination value.

use crate::{
    BasicBlockId, BinaryOp, Instruction, Literal, MirFunction, UnaryOp, Value, ValueId,
};

/// Appends instructions to a single block, allocating destinations on demand
pub struct InstrBuilder<'f> {
    function: &'f mut MirFunction,
    current_block: BasicBlockId,
}

impl<'f> InstrBuilder<'f> {
    /// Creates a new instruction builder for the given function and block
    pub const fn new(function: &'f mut MirFunction, current_block: BasicBlockId) -> Self {
        Self {
            function,
            current_block,
        }
    }

    /// Re-targets the builder to another block
    pub const fn at(&mut self, block: BasicBlockId) -> &mut Self {
        self.current_block = block;
        self
    }

    /// Add an instruction to the current block
    pub fn add_instruction(&mut self, instruction: Instruction) {
        if let Some(block) = self.function.basic_blocks.get_mut(self.current_block) {
            if instruction.is_phi() {
                block.push_phi(instruction);
            } else {
                block.push_instruction(instruction);
            }
        }
    }

    /// Create and add a binary operation instruction with explicit destination
    pub fn binary_op_to(
        &mut self,
        op: BinaryOp,
        dest: ValueId,
        lhs: Value,
        rhs: Value,
    ) -> &mut Self {
        self.add_instruction(Instruction::binary_op(op, dest, lhs, rhs));
        self
    }

    /// Create and add a phi with explicit destination
    ///
    /// Loop-carried phis need their destination before the latch value exists,
    /// so they are usually created through this method.
    pub fn phi_to(&mut self, dest: ValueId, sources: Vec<(BasicBlockId, Value)>) -> &mut Self {
        self.add_instruction(Instruction::phi(dest, sources));
        self
    }

    /// Create and add a store instruction
    pub fn store(&mut self, address: Value, value: Value) -> &mut Self {
        self.add_instruction(Instruction::store(address, value));
        self
    }

    /// Create and add an assignment from a literal value
    pub fn literal(&mut self, lit: Literal) -> ValueId {
        let dest = self.function.new_value_id();
        self.add_instruction(Instruction::assign(dest, Value::Literal(lit)));
        dest
    }

    /// Create and add a frame allocation of `size` cells
    pub fn alloc_frame(&mut self, size: usize) -> ValueId {
        let dest = self.function.new_value_id();
        self.add_instruction(Instruction::frame_alloc(dest, size));
        dest
    }

    /// Create and add an address computation `base + offset`
    pub fn get_element_ptr(&mut self, base: Value, offset: Value) -> ValueId {
        let dest = self.function.new_value_id();
        self.add_instruction(Instruction::get_element_ptr(dest, base, offset));
        dest
    }

    /// Create and add a load with automatic destination
    pub fn load(&mut self, address: Value) -> ValueId {
        let dest = self.function.new_value_id();
        self.add_instruction(Instruction::load(dest, address));
        dest
    }

    /// Create and add a binary operation with automatic destination
    pub fn binary_op(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> ValueId {
        let dest = self.function.new_value_id();
        self.add_instruction(Instruction::binary_op(op, dest, lhs, rhs));
        dest
    }

    /// Create and add a unary operation with automatic destination
    pub fn unary_op(&mut self, op: UnaryOp, operand: Value) -> ValueId {
        let dest = self.function.new_value_id();
        self.add_instruction(Instruction::unary_op(op, dest, operand));
        dest
    }

    /// Create and add a phi with automatic destination
    pub fn phi(&mut self, sources: Vec<(BasicBlockId, Value)>) -> ValueId {
        let dest = self.function.new_value_id();
        self.add_instruction(Instruction::phi(dest, sources));
        dest
    }
}
