//! # MIR Interpreter
//!
//! Executes a [`MirFunction`] directly. Integers are `i64` with wrapping
//! arithmetic; frame allocations are zero-initialized arrays whose accesses are
//! bounds checked. Phis of a block are evaluated in parallel on entry, using the
//! values that were live at the end of the predecessor.
//!
//! The interpreter exists to check that transformations preserve behavior:
//! run a function before and after a pass and compare the results.

use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    BasicBlockId, BinaryOp, InstructionKind, Literal, MirFunction, Terminator, UnaryOp, Value,
    ValueId,
};

/// A value produced at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeValue {
    Int(i64),
    Bool(bool),
    /// A cell of a frame allocation
    Pointer { allocation: usize, offset: i64 },
}

impl RuntimeValue {
    const fn kind(self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Bool(_) => "boolean",
            Self::Pointer { .. } => "pointer",
        }
    }

    pub const fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Literal> for RuntimeValue {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Integer(value) => Self::Int(value),
            Literal::Boolean(value) => Self::Bool(value),
        }
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Pointer { allocation, offset } => write!(f, "&frame{allocation}[{offset}]"),
        }
    }
}

/// Faults raised while executing a function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
    #[error("value %{} read before it was defined", .0.index())]
    UnknownValue(ValueId),
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: RuntimeValue,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("access at offset {offset} outside an allocation of {size} cells")]
    OutOfBounds { offset: i64, size: usize },
    #[error("step budget of {0} exhausted")]
    BudgetExhausted(usize),
    #[error("reached unreachable terminator of bb{}", .0.index())]
    Unreachable(BasicBlockId),
    #[error("phi in bb{} has no source for predecessor bb{}", .block.index(), .predecessor.index())]
    MissingPhiSource {
        block: BasicBlockId,
        predecessor: BasicBlockId,
    },
    #[error("function expects {expected} argument(s), got {found}")]
    ArityMismatch { expected: usize, found: usize },
}

/// Bounds on a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Instructions and terminators executed before giving up
    pub max_steps: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
        }
    }
}

/// Outcome of a completed execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub values: Vec<RuntimeValue>,
    /// Instructions and terminators executed
    pub steps: usize,
    /// Number of blocks entered, the entry block included
    pub blocks_visited: usize,
}

/// Runs `function` on integer arguments with the default limits
pub fn execute(function: &MirFunction, args: &[i64]) -> Result<ExecutionResult, InterpError> {
    execute_with_limits(function, args, ExecutionLimits::default())
}

pub fn execute_with_limits(
    function: &MirFunction,
    args: &[i64],
    limits: ExecutionLimits,
) -> Result<ExecutionResult, InterpError> {
    if args.len() != function.parameters.len() {
        return Err(InterpError::ArityMismatch {
            expected: function.parameters.len(),
            found: args.len(),
        });
    }

    let mut frame = Frame {
        values: function
            .parameters
            .iter()
            .zip(args)
            .map(|(&param, &arg)| (param, RuntimeValue::Int(arg)))
            .collect(),
        memory: Vec::new(),
        steps: 0,
        limits,
    };

    let mut block_id = function.entry_block;
    let mut blocks_visited = 1;
    loop {
        let block = &function.basic_blocks[block_id];
        for instruction in block.non_phis() {
            frame.step()?;
            frame.execute(&instruction.kind)?;
        }

        frame.step()?;
        let next = match &block.terminator {
            Terminator::Jump { target } => *target,
            Terminator::If {
                condition,
                then_target,
                else_target,
            } => match frame.read(*condition)? {
                RuntimeValue::Bool(true) => *then_target,
                RuntimeValue::Bool(false) => *else_target,
                found => {
                    return Err(InterpError::TypeMismatch {
                        expected: "boolean",
                        found,
                    })
                }
            },
            Terminator::Return { values } => {
                let values = values
                    .iter()
                    .map(|&value| frame.read(value))
                    .collect::<Result<_, _>>()?;
                return Ok(ExecutionResult {
                    values,
                    steps: frame.steps,
                    blocks_visited,
                });
            }
            Terminator::Unreachable => return Err(InterpError::Unreachable(block_id)),
        };

        frame.enter(function, block_id, next)?;
        block_id = next;
        blocks_visited += 1;
    }
}

struct Frame {
    values: FxHashMap<ValueId, RuntimeValue>,
    memory: Vec<Vec<RuntimeValue>>,
    steps: usize,
    limits: ExecutionLimits,
}

impl Frame {
    fn step(&mut self) -> Result<(), InterpError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(InterpError::BudgetExhausted(self.limits.max_steps));
        }
        Ok(())
    }

    fn read(&self, value: Value) -> Result<RuntimeValue, InterpError> {
        match value {
            Value::Literal(literal) => Ok(literal.into()),
            Value::Operand(id) => self
                .values
                .get(&id)
                .copied()
                .ok_or(InterpError::UnknownValue(id)),
        }
    }

    fn read_int(&self, value: Value) -> Result<i64, InterpError> {
        match self.read(value)? {
            RuntimeValue::Int(value) => Ok(value),
            found => Err(InterpError::TypeMismatch {
                expected: "integer",
                found,
            }),
        }
    }

    fn read_bool(&self, value: Value) -> Result<bool, InterpError> {
        match self.read(value)? {
            RuntimeValue::Bool(value) => Ok(value),
            found => Err(InterpError::TypeMismatch {
                expected: "boolean",
                found,
            }),
        }
    }

    /// Binds the phis of `to` for the edge `from -> to`
    fn enter(
        &mut self,
        function: &MirFunction,
        from: BasicBlockId,
        to: BasicBlockId,
    ) -> Result<(), InterpError> {
        let mut incoming = Vec::new();
        for phi in function.basic_blocks[to].phis() {
            let InstructionKind::Phi { dest, sources } = &phi.kind else {
                continue;
            };
            self.step()?;
            let &(_, source) = sources
                .iter()
                .find(|(predecessor, _)| *predecessor == from)
                .ok_or(InterpError::MissingPhiSource {
                    block: to,
                    predecessor: from,
                })?;
            incoming.push((*dest, self.read(source)?));
        }
        self.values.extend(incoming);
        Ok(())
    }

    fn cell(&mut self, address: Value) -> Result<&mut RuntimeValue, InterpError> {
        let (allocation, offset) = match self.read(address)? {
            RuntimeValue::Pointer { allocation, offset } => (allocation, offset),
            found => {
                return Err(InterpError::TypeMismatch {
                    expected: "pointer",
                    found,
                })
            }
        };
        let cells = &mut self.memory[allocation];
        let size = cells.len();
        usize::try_from(offset)
            .ok()
            .and_then(|index| cells.get_mut(index))
            .ok_or(InterpError::OutOfBounds { offset, size })
    }

    fn execute(&mut self, kind: &InstructionKind) -> Result<(), InterpError> {
        let (dest, result) = match kind {
            InstructionKind::Assign { dest, source } => (*dest, self.read(*source)?),
            InstructionKind::UnaryOp { op, dest, source } => {
                let result = match op {
                    UnaryOp::Neg => RuntimeValue::Int(self.read_int(*source)?.wrapping_neg()),
                    UnaryOp::Not => RuntimeValue::Bool(!self.read_bool(*source)?),
                };
                (*dest, result)
            }
            InstructionKind::BinaryOp {
                op,
                dest,
                left,
                right,
            } => (*dest, self.binary(*op, *left, *right)?),
            InstructionKind::FrameAlloc { dest, size } => {
                self.memory.push(vec![RuntimeValue::Int(0); *size]);
                let pointer = RuntimeValue::Pointer {
                    allocation: self.memory.len() - 1,
                    offset: 0,
                };
                (*dest, pointer)
            }
            InstructionKind::GetElementPtr { dest, base, offset } => {
                let delta = self.read_int(*offset)?;
                match self.read(*base)? {
                    RuntimeValue::Pointer { allocation, offset } => (
                        *dest,
                        RuntimeValue::Pointer {
                            allocation,
                            offset: offset.wrapping_add(delta),
                        },
                    ),
                    found => {
                        return Err(InterpError::TypeMismatch {
                            expected: "pointer",
                            found,
                        })
                    }
                }
            }
            InstructionKind::Load { dest, address } => (*dest, *self.cell(*address)?),
            InstructionKind::Store { address, value } => {
                let value = self.read(*value)?;
                *self.cell(*address)? = value;
                return Ok(());
            }
            InstructionKind::Phi { .. } | InstructionKind::Nop => return Ok(()),
        };
        self.values.insert(dest, result);
        Ok(())
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> Result<RuntimeValue, InterpError> {
        let arith = |apply: fn(i64, i64) -> RuntimeValue| {
            Ok::<_, InterpError>(apply(self.read_int(left)?, self.read_int(right)?))
        };
        match op {
            BinaryOp::Add => arith(|a, b| RuntimeValue::Int(a.wrapping_add(b))),
            BinaryOp::Sub => arith(|a, b| RuntimeValue::Int(a.wrapping_sub(b))),
            BinaryOp::Mul => arith(|a, b| RuntimeValue::Int(a.wrapping_mul(b))),
            BinaryOp::Div | BinaryOp::Rem => {
                let (a, b) = (self.read_int(left)?, self.read_int(right)?);
                if b == 0 {
                    return Err(InterpError::DivisionByZero);
                }
                let result = if op == BinaryOp::Div {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                };
                Ok(RuntimeValue::Int(result))
            }
            BinaryOp::Less => arith(|a, b| RuntimeValue::Bool(a < b)),
            BinaryOp::LessEqual => arith(|a, b| RuntimeValue::Bool(a <= b)),
            BinaryOp::Greater => arith(|a, b| RuntimeValue::Bool(a > b)),
            BinaryOp::GreaterEqual => arith(|a, b| RuntimeValue::Bool(a >= b)),
            BinaryOp::Eq | BinaryOp::Neq => {
                let equal = match (self.read(left)?, self.read(right)?) {
                    (RuntimeValue::Int(a), RuntimeValue::Int(b)) => a == b,
                    (RuntimeValue::Bool(a), RuntimeValue::Bool(b)) => a == b,
                    (a, found) => {
                        return Err(InterpError::TypeMismatch {
                            expected: a.kind(),
                            found,
                        })
                    }
                };
                Ok(RuntimeValue::Bool(equal == (op == BinaryOp::Eq)))
            }
            BinaryOp::And | BinaryOp::Or => {
                let (a, b) = (self.read_bool(left)?, self.read_bool(right)?);
                Ok(RuntimeValue::Bool(if op == BinaryOp::And {
                    a && b
                } else {
                    a || b
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        param_n, single_sum_loop, store_then_load_loops, two_sum_loops, CountingLoop,
        ARRAY_TRIPS,
    };
    use crate::InstrBuilder;

    fn ints(result: &ExecutionResult) -> Vec<i64> {
        result.values.iter().filter_map(|value| value.as_int()).collect()
    }

    #[test]
    fn test_sum_loop() {
        let (function, _) = single_sum_loop();
        assert_eq!(ints(&execute(&function, &[5]).unwrap()), vec![10]);
        // The loop is rotated: its body runs once even for n = 0
        assert_eq!(ints(&execute(&function, &[0]).unwrap()), vec![0]);
    }

    #[test]
    fn test_guarded_loops_skip_body() {
        let (function, _, _) = two_sum_loops(
            CountingLoop::new(param_n()).guarded(),
            CountingLoop::new(param_n()).guarded(),
        );
        assert_eq!(ints(&execute(&function, &[4]).unwrap()), vec![6, 12]);
        assert_eq!(ints(&execute(&function, &[-3]).unwrap()), vec![0, 0]);
    }

    #[test]
    fn test_memory_round_trip() {
        let (function, _, _) = store_then_load_loops(0, 0);
        let expected = (0..ARRAY_TRIPS).sum::<i64>();
        assert_eq!(ints(&execute(&function, &[]).unwrap()), vec![expected]);
    }

    #[test]
    fn test_out_of_bounds_store() {
        let (function, _, _) = store_then_load_loops(10, 0);
        assert_eq!(
            execute(&function, &[]),
            Err(InterpError::OutOfBounds {
                offset: 16,
                size: 16
            })
        );
    }

    #[test]
    fn test_budget_exhausted() {
        let (function, _) = single_sum_loop();
        let limits = ExecutionLimits { max_steps: 50 };
        assert_eq!(
            execute_with_limits(&function, &[1000], limits),
            Err(InterpError::BudgetExhausted(50))
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let (function, _) = single_sum_loop();
        assert_eq!(
            execute(&function, &[]),
            Err(InterpError::ArityMismatch {
                expected: 1,
                found: 0
            })
        );
    }

    #[test]
    fn test_arithmetic_faults() {
        let mut function = MirFunction::new("faults");
        let x = Value::operand(function.new_parameter());
        let entry = function.entry_block;
        let quotient = InstrBuilder::new(&mut function, entry).binary_op(
            BinaryOp::Div,
            Value::integer(1),
            x,
        );
        function.basic_blocks[entry]
            .set_terminator(Terminator::return_values(vec![Value::operand(quotient)]));

        assert_eq!(execute(&function, &[0]), Err(InterpError::DivisionByZero));
        assert_eq!(ints(&execute(&function, &[1]).unwrap()), vec![1]);
    }

    #[test]
    fn test_branch_on_integer() {
        let mut function = MirFunction::new("bad_branch");
        let x = Value::operand(function.new_parameter());
        let entry = function.entry_block;
        let exit = function.add_basic_block();
        function.basic_blocks[entry].set_terminator(Terminator::branch(x, exit, exit));
        function.basic_blocks[exit].set_terminator(Terminator::return_void());

        assert!(matches!(
            execute(&function, &[1]),
            Err(InterpError::TypeMismatch {
                expected: "boolean",
                ..
            })
        ));
    }

    #[test]
    fn test_unreachable() {
        let function = MirFunction::new("empty");
        assert_eq!(
            execute(&function, &[]),
            Err(InterpError::Unreachable(function.entry_block))
        );
    }
}
