//! Dependence checking between two loops about to be fused.
//!
//! After fusion, iteration `j` of L2 runs right after iteration `j` of L1
//! instead of after all of L1. A dependence from L1 to L2 is *negative* when
//! the L1 access feeding iteration `j` of L2 happens in a later iteration of
//! L1; fusing would then let L2 observe memory or registers too early.
//!
//! Memory accesses are described by a root base and a symbolic offset from
//! it. The root is a frame allocation or a parameter; anything else makes the
//! access unknown. A frame allocation aliases nothing but itself, while two
//! different parameters may point into the same memory. For a pair through
//! the same base, with L1 stepping by `s` cells per iteration and L2's offset
//! exceeding L1's by the constant `d`, the same cell is touched by L1 `d / s`
//! iterations after L2. The pair is a hazard when that is positive, or when
//! both access the same invariant cell.

use std::fmt;

use crate::analysis::{LoopId, Scev};
use crate::{BasicBlockId, InstructionKind, Value, ValueId};

use super::FusionContext;

/// Position of an instruction; `index == instructions.len()` is the terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionRef {
    pub block: BasicBlockId,
    pub index: usize,
}

impl fmt::Display for InstructionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}[{}]", self.block.index(), self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependenceKind {
    /// L2 reads what L1 writes (read after write)
    Flow,
    /// L2 writes what L1 reads (write after read)
    Anti,
    /// Both write (write after write)
    Output,
    /// L2 consumes a register L1 recomputes every iteration
    Scalar,
}

impl fmt::Display for DependenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flow => "flow",
            Self::Anti => "anti",
            Self::Output => "output",
            Self::Scalar => "scalar",
        };
        f.write_str(name)
    }
}

/// A dependence from an instruction of L1 to one of L2 that forbids fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependence {
    pub source: InstructionRef,
    pub sink: InstructionRef,
    pub kind: DependenceKind,
    /// Iterations between the L2 access and the L1 access of the same cell,
    /// when that is a known constant
    pub distance: Option<i64>,
}

impl fmt::Display for Dependence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dependence {} -> {}", self.kind, self.source, self.sink)?;
        match self.distance {
            Some(distance) => write!(f, " (distance {distance})"),
            None => write!(f, " (distance unknown)"),
        }
    }
}

/// A load or store, with its address split into root base and offset
#[derive(Debug, Clone)]
struct MemoryAccess {
    at: InstructionRef,
    is_write: bool,
    /// `None` when the address could not be traced to a root
    location: Option<Location>,
}

#[derive(Debug, Clone)]
struct Location {
    base: ValueId,
    /// The base is a frame allocation
    fresh: bool,
    offset: Scev,
}

/// Returns true if fusing `first` and `second` cannot reverse a dependence
pub fn has_no_negative_dependence(ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> bool {
    let dependences = negative_dependences(ctx, first, second);
    for dependence in &dependences {
        log::debug!("  {dependence}");
    }
    dependences.is_empty()
}

/// Every dependence that would be violated by fusing `first` and `second`
///
/// Accesses whose relation cannot be computed are reported with an unknown
/// distance.
pub fn negative_dependences(
    ctx: &FusionContext<'_>,
    first: LoopId,
    second: LoopId,
) -> Vec<Dependence> {
    let mut dependences = memory_dependences(ctx, first, second);
    dependences.extend(scalar_dependences(ctx, first, second));
    dependences
}

fn memory_dependences(ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> Vec<Dependence> {
    let accesses1 = memory_accesses(ctx, first);
    let accesses2 = memory_accesses(ctx, second);
    let header1 = ctx.get(first).header;
    let header2 = ctx.get(second).header;

    let mut dependences = Vec::new();
    for a in &accesses1 {
        for b in accesses2.iter().filter(|b| a.is_write || b.is_write) {
            let kind = match (a.is_write, b.is_write) {
                (true, false) => DependenceKind::Flow,
                (false, true) => DependenceKind::Anti,
                _ => DependenceKind::Output,
            };
            let unknown = Dependence {
                source: a.at,
                sink: b.at,
                kind,
                distance: None,
            };

            let (Some(location1), Some(location2)) = (&a.location, &b.location) else {
                dependences.push(unknown);
                continue;
            };
            if location1.base != location2.base {
                if !location1.fresh && !location2.fresh {
                    dependences.push(unknown);
                }
                continue;
            }

            let offset1 = &location1.offset;
            let offset2 = location2.offset.rebase(header2, header1);
            let Some(difference) = Scev::sub(offset2, offset1.clone()).as_constant() else {
                dependences.push(unknown);
                continue;
            };
            let Some(stride) = stride(ctx, offset1, first) else {
                dependences.push(unknown);
                continue;
            };

            let hazard = (difference > 0 && stride > 0)
                || (difference < 0 && stride < 0)
                || (stride == 0 && difference == 0);
            if hazard {
                let distance = difference
                    .checked_rem(stride)
                    .filter(|&remainder| remainder == 0)
                    .and_then(|_| difference.checked_div(stride));
                dependences.push(Dependence { distance, ..unknown });
            }
        }
    }
    dependences
}

/// Cells advanced per iteration of `loop_id` by an access at `offset`
fn stride(ctx: &FusionContext<'_>, offset: &Scev, loop_id: LoopId) -> Option<i64> {
    if ctx.scev.is_invariant(offset, loop_id) {
        return Some(0);
    }
    let (_, step, header) = offset.as_add_rec()?;
    if header != ctx.get(loop_id).header {
        return None;
    }
    step.as_constant()
}

fn memory_accesses(ctx: &FusionContext<'_>, loop_id: LoopId) -> Vec<MemoryAccess> {
    let mut accesses = Vec::new();
    for &block in &ctx.get(loop_id).blocks {
        let instructions = &ctx.function.basic_blocks[block].instructions;
        for (index, instruction) in instructions.iter().enumerate() {
            let (address, is_write) = match instruction.kind {
                InstructionKind::Load { address, .. } => (address, false),
                InstructionKind::Store { address, .. } => (address, true),
                _ => continue,
            };
            accesses.push(MemoryAccess {
                at: InstructionRef { block, index },
                is_write,
                location: decompose_address(ctx, address),
            });
        }
    }
    accesses
}

/// Follows address arithmetic back to the root base, summing the offsets
fn decompose_address(ctx: &FusionContext<'_>, address: Value) -> Option<Location> {
    let mut offset = Scev::constant(0);
    let mut current = address.as_operand()?;
    let fresh = loop {
        let kind = ctx.definition(current).map(|(_, instruction)| &instruction.kind);
        match kind {
            Some(InstructionKind::GetElementPtr {
                base,
                offset: step,
                ..
            }) => {
                offset = Scev::add(offset, ctx.scev.scev_of(*step));
                current = base.as_operand()?;
            }
            Some(InstructionKind::Assign { source, .. }) => {
                current = source.as_operand()?;
            }
            Some(InstructionKind::FrameAlloc { .. }) => break true,
            None if ctx.function.parameters.contains(&current) => break false,
            _ => return None,
        }
    };
    offset.is_computable().then_some(Location {
        base: current,
        fresh,
        offset,
    })
}

/// Uses in L2 of registers that change from one iteration of L1 to the next
fn scalar_dependences(ctx: &FusionContext<'_>, first: LoopId, second: LoopId) -> Vec<Dependence> {
    let mut dependences = Vec::new();
    for &block in &ctx.get(second).blocks {
        let data = &ctx.function.basic_blocks[block];
        let uses = data
            .instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| (index, instruction.used_values()))
            .chain(std::iter::once((
                data.instructions.len(),
                data.terminator.used_values(),
            )));

        for (index, used) in uses {
            let mut used: Vec<ValueId> = used.into_iter().collect();
            used.sort();
            for value in used {
                if !ctx.defined_in(value, first) || is_invariant_in(ctx, value, first) {
                    continue;
                }
                if let Some((source, _)) = ctx.definition(value) {
                    dependences.push(Dependence {
                        source,
                        sink: InstructionRef { block, index },
                        kind: DependenceKind::Scalar,
                        distance: None,
                    });
                }
            }
        }
    }
    dependences
}

/// Returns true if `value` is computed by pure instructions from operands
/// that are all defined outside `loop_id`
fn is_invariant_in(ctx: &FusionContext<'_>, value: ValueId, loop_id: LoopId) -> bool {
    if !ctx.defined_in(value, loop_id) {
        return true;
    }
    let Some((_, instruction)) = ctx.definition(value) else {
        return false;
    };
    instruction.is_pure()
        && instruction
            .used_values()
            .into_iter()
            .all(|operand| is_invariant_in(ctx, operand, loop_id))
}
