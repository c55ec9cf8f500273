//! # Scalar Evolution
//!
//! Symbolic description of how integer values change across loop iterations.
//!
//! Expressions are a tagged tree ([`Scev`]) kept in a canonical form by the
//! smart constructors: sums and products are flattened, constants folded,
//! like terms combined and operands sorted. Two expressions describe the same
//! quantity when they are structurally equal, which is what `==` compares.
//!
//! The central form is the affine recurrence `{start,+,step}<header>`: the
//! value `start + k * step` on iteration `k` of the loop headed by `header`.
//! Anything the analysis cannot express is [`Scev::CouldNotCompute`], and every
//! consumer treats it as "unknown, assume the worst".

use std::cell::RefCell;
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::loops::{LoopForest, LoopId};
use crate::function::ValueDefinition;
use crate::{
    BasicBlockId, BinaryOp, InstructionKind, MirFunction, Terminator, UnaryOp, Value, ValueId,
};

/// A symbolic integer expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scev {
    /// A known constant
    Constant(i64),
    /// An opaque value: a parameter or a result the analysis does not model
    Value(ValueId),
    /// Sum of at least two terms
    Add(Vec<Scev>),
    /// Product of at least two factors
    Mul(Vec<Scev>),
    /// Floor division
    UDiv(Box<Scev>, Box<Scev>),
    /// Affine recurrence `{start,+,step}` over the loop headed by `header`
    AddRec {
        start: Box<Scev>,
        step: Box<Scev>,
        header: BasicBlockId,
    },
    /// Not expressible in closed form
    CouldNotCompute,
}

impl Scev {
    pub const fn constant(value: i64) -> Self {
        Self::Constant(value)
    }

    pub const fn value(id: ValueId) -> Self {
        Self::Value(id)
    }

    pub const fn is_computable(&self) -> bool {
        !matches!(self, Self::CouldNotCompute)
    }

    pub const fn as_constant(&self) -> Option<i64> {
        match self {
            Self::Constant(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns `(start, step, header)` if this is an affine recurrence
    pub fn as_add_rec(&self) -> Option<(&Self, &Self, BasicBlockId)> {
        match self {
            Self::AddRec {
                start,
                step,
                header,
            } => Some((start, step, *header)),
            _ => None,
        }
    }

    /// Builds `{start,+,step}<header>`; a zero step collapses to `start`
    pub fn add_rec(start: Self, step: Self, header: BasicBlockId) -> Self {
        if !start.is_computable() || !step.is_computable() {
            return Self::CouldNotCompute;
        }
        if step == Self::Constant(0) {
            return start;
        }
        Self::AddRec {
            start: Box::new(start),
            step: Box::new(step),
            header,
        }
    }

    /// Builds `lhs + rhs` in canonical form
    pub fn add(lhs: Self, rhs: Self) -> Self {
        Self::sum(vec![lhs, rhs])
    }

    /// Builds `lhs - rhs` in canonical form
    pub fn sub(lhs: Self, rhs: Self) -> Self {
        Self::add(lhs, Self::neg(rhs))
    }

    /// Builds `-operand` in canonical form
    pub fn neg(operand: Self) -> Self {
        Self::mul(Self::Constant(-1), operand)
    }

    /// Builds the canonical sum of `terms`
    pub fn sum(terms: Vec<Self>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Self::CouldNotCompute => return Self::CouldNotCompute,
                Self::Add(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        // {a,+,s} + {b,+,t} = {a+b,+,s+t}; invariant terms join the start.
        let (recurrences, invariant): (Vec<Self>, Vec<Self>) = flat
            .into_iter()
            .partition(|term| matches!(term, Self::AddRec { .. }));
        if !recurrences.is_empty() {
            let mut header = None;
            let mut starts = invariant;
            let mut steps = Vec::new();
            for recurrence in recurrences {
                let Self::AddRec {
                    start,
                    step,
                    header: rec_header,
                } = recurrence
                else {
                    continue;
                };
                if header.is_some_and(|h| h != rec_header) {
                    return Self::CouldNotCompute;
                }
                header = Some(rec_header);
                starts.push(*start);
                steps.push(*step);
            }
            return match header {
                Some(header) => Self::add_rec(Self::sum(starts), Self::sum(steps), header),
                None => Self::CouldNotCompute,
            };
        }

        let mut constant: i64 = 0;
        let mut coefficients: BTreeMap<Self, i64> = BTreeMap::new();
        for term in invariant {
            if let Self::Constant(value) = term {
                let Some(folded) = constant.checked_add(value) else {
                    return Self::CouldNotCompute;
                };
                constant = folded;
                continue;
            }
            let (coefficient, base) = term.split_coefficient();
            let entry = coefficients.entry(base).or_insert(0);
            let Some(total) = entry.checked_add(coefficient) else {
                return Self::CouldNotCompute;
            };
            *entry = total;
        }

        let mut result: Vec<Self> = coefficients
            .into_iter()
            .filter(|(_, coefficient)| *coefficient != 0)
            .map(|(base, coefficient)| Self::scale(coefficient, base))
            .collect();
        if constant != 0 {
            result.push(Self::Constant(constant));
        }
        result.sort();

        match result.len() {
            0 => Self::Constant(0),
            1 => result.pop().unwrap_or(Self::Constant(0)),
            _ => Self::Add(result),
        }
    }

    /// Builds `lhs * rhs` in canonical form
    pub fn mul(lhs: Self, rhs: Self) -> Self {
        Self::product(vec![lhs, rhs])
    }

    /// Builds the canonical product of `factors`
    pub fn product(factors: Vec<Self>) -> Self {
        let mut flat = Vec::with_capacity(factors.len());
        for factor in factors {
            match factor {
                Self::CouldNotCompute => return Self::CouldNotCompute,
                Self::Mul(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        let mut constant: i64 = 1;
        let mut rest = Vec::new();
        for factor in flat {
            match factor {
                Self::Constant(value) => {
                    let Some(folded) = constant.checked_mul(value) else {
                        return Self::CouldNotCompute;
                    };
                    constant = folded;
                }
                other => rest.push(other),
            }
        }
        if constant == 0 {
            return Self::Constant(0);
        }

        // An affine recurrence times an invariant factor stays affine;
        // the product of two recurrences does not.
        if let Some(position) = rest
            .iter()
            .position(|factor| matches!(factor, Self::AddRec { .. }))
        {
            let recurrence = rest.remove(position);
            if rest.iter().any(|factor| matches!(factor, Self::AddRec { .. })) {
                return Self::CouldNotCompute;
            }
            let Self::AddRec {
                start,
                step,
                header,
            } = recurrence
            else {
                return Self::CouldNotCompute;
            };
            let mut start_factors = rest.clone();
            start_factors.push(Self::Constant(constant));
            start_factors.push(*start);
            let mut step_factors = rest;
            step_factors.push(Self::Constant(constant));
            step_factors.push(*step);
            return Self::add_rec(
                Self::product(start_factors),
                Self::product(step_factors),
                header,
            );
        }

        // Constants distribute over sums so that `-(n - 1)` reads `1 - n`.
        if rest.len() == 1 {
            if let Some(Self::Add(terms)) = rest.first() {
                let scaled = terms
                    .iter()
                    .cloned()
                    .map(|term| Self::mul(Self::Constant(constant), term))
                    .collect();
                return Self::sum(scaled);
            }
        }

        match rest.len() {
            0 => Self::Constant(constant),
            _ => {
                rest.sort();
                let base = if rest.len() == 1 {
                    rest.pop().unwrap_or(Self::Constant(1))
                } else {
                    Self::Mul(rest)
                };
                Self::scale(constant, base)
            }
        }
    }

    /// Builds `lhs / rhs` (floor division)
    pub fn udiv(lhs: Self, rhs: Self) -> Self {
        if !lhs.is_computable() || !rhs.is_computable() {
            return Self::CouldNotCompute;
        }
        match (lhs.as_constant(), rhs.as_constant()) {
            (_, Some(0)) => Self::CouldNotCompute,
            (_, Some(1)) => lhs,
            (Some(numerator), Some(denominator)) => numerator
                .checked_div_euclid(denominator)
                .map_or(Self::CouldNotCompute, Self::Constant),
            _ => Self::UDiv(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// `coefficient * base` without re-normalizing `base`
    fn scale(coefficient: i64, base: Self) -> Self {
        if coefficient == 1 {
            return base;
        }
        let mut factors = vec![Self::Constant(coefficient)];
        match base {
            Self::Mul(inner) => factors.extend(inner),
            other => factors.push(other),
        }
        Self::Mul(factors)
    }

    /// Splits `c * x` into `(c, x)`; anything else has coefficient 1
    fn split_coefficient(self) -> (i64, Self) {
        match self {
            Self::Mul(mut factors) => match factors.first() {
                Some(Self::Constant(coefficient)) => {
                    let coefficient = *coefficient;
                    factors.remove(0);
                    let base = if factors.len() == 1 {
                        factors.pop().unwrap_or(Self::Constant(1))
                    } else {
                        Self::Mul(factors)
                    };
                    (coefficient, base)
                }
                _ => (1, Self::Mul(factors)),
            },
            other => (1, other),
        }
    }

    /// Replaces every recurrence over `from` by the same recurrence over `to`
    pub fn rebase(&self, from: BasicBlockId, to: BasicBlockId) -> Self {
        match self {
            Self::AddRec {
                start,
                step,
                header,
            } => Self::AddRec {
                start: Box::new(start.rebase(from, to)),
                step: Box::new(step.rebase(from, to)),
                header: if *header == from { to } else { *header },
            },
            Self::Add(terms) => Self::Add(terms.iter().map(|t| t.rebase(from, to)).collect()),
            Self::Mul(factors) => {
                Self::Mul(factors.iter().map(|f| f.rebase(from, to)).collect())
            }
            Self::UDiv(lhs, rhs) => {
                Self::UDiv(Box::new(lhs.rebase(from, to)), Box::new(rhs.rebase(from, to)))
            }
            Self::Constant(_) | Self::Value(_) | Self::CouldNotCompute => self.clone(),
        }
    }
}

impl std::fmt::Display for Scev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(f: &mut std::fmt::Formatter<'_>, items: &[Scev], sep: &str) -> std::fmt::Result {
            write!(f, "(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::Constant(value) => write!(f, "{value}"),
            Self::Value(id) => write!(f, "%{}", id.index()),
            Self::Add(terms) => join(f, terms, "+"),
            Self::Mul(factors) => join(f, factors, "*"),
            Self::UDiv(lhs, rhs) => write!(f, "({lhs} /u {rhs})"),
            Self::AddRec {
                start,
                step,
                header,
            } => write!(f, "{{{start},+,{step}}}<bb{}>", header.index()),
            Self::CouldNotCompute => write!(f, "***COULDNOTCOMPUTE***"),
        }
    }
}

/// Scalar evolution queries over one function snapshot
///
/// Results are memoized per value. The snapshot must not outlive a CFG
/// mutation of the function.
pub struct ScalarEvolution<'a> {
    function: &'a MirFunction,
    loops: &'a LoopForest,
    definitions: FxHashMap<ValueId, ValueDefinition>,
    cache: RefCell<FxHashMap<ValueId, Scev>>,
}

impl<'a> ScalarEvolution<'a> {
    pub fn new(function: &'a MirFunction, loops: &'a LoopForest) -> Self {
        Self {
            function,
            loops,
            definitions: function.value_definitions(),
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// The loop forest this analysis was built against
    pub const fn loops(&self) -> &'a LoopForest {
        self.loops
    }

    /// The block defining `value`, or `None` for parameters and unknown values
    pub fn defining_block(&self, value: ValueId) -> Option<BasicBlockId> {
        self.definitions.get(&value).and_then(ValueDefinition::block)
    }

    /// Symbolic expression for `value`
    pub fn scev_of(&self, value: Value) -> Scev {
        match value {
            Value::Literal(crate::Literal::Integer(constant)) => Scev::Constant(constant),
            Value::Literal(crate::Literal::Boolean(_)) => Scev::CouldNotCompute,
            Value::Operand(id) => self.scev_of_id(id),
        }
    }

    fn scev_of_id(&self, id: ValueId) -> Scev {
        if let Some(cached) = self.cache.borrow().get(&id) {
            return cached.clone();
        }
        let result = self.compute(id);
        self.cache.borrow_mut().insert(id, result.clone());
        result
    }

    fn compute(&self, id: ValueId) -> Scev {
        let Some(definition) = self.definitions.get(&id).copied() else {
            return Scev::CouldNotCompute;
        };
        let ValueDefinition::Instruction { block, index } = definition else {
            return Scev::Value(id);
        };
        let instruction = &self.function.basic_blocks[block].instructions[index];

        match &instruction.kind {
            InstructionKind::Assign { source, .. } => self.scev_of(*source),
            InstructionKind::UnaryOp {
                op: UnaryOp::Neg,
                source,
                ..
            } => Scev::neg(self.scev_of(*source)),
            InstructionKind::BinaryOp {
                op: BinaryOp::Add,
                left,
                right,
                ..
            } => Scev::add(self.scev_of(*left), self.scev_of(*right)),
            InstructionKind::BinaryOp {
                op: BinaryOp::Sub,
                left,
                right,
                ..
            } => Scev::sub(self.scev_of(*left), self.scev_of(*right)),
            InstructionKind::BinaryOp {
                op: BinaryOp::Mul,
                left,
                right,
                ..
            } => Scev::mul(self.scev_of(*left), self.scev_of(*right)),
            InstructionKind::Phi { sources, .. } => self
                .header_phi_recurrence(id, block, sources)
                .unwrap_or(Scev::Value(id)),
            _ => Scev::Value(id),
        }
    }

    /// Recognizes `phi [outside: start, latch: phi + step]` in a loop header
    fn header_phi_recurrence(
        &self,
        phi: ValueId,
        block: BasicBlockId,
        sources: &[(BasicBlockId, Value)],
    ) -> Option<Scev> {
        let loop_id = self.loops.loop_for(block)?;
        let data = &self.loops[loop_id];
        if data.header != block {
            return None;
        }

        let [(first_block, first), (second_block, second)] = sources else {
            return None;
        };
        let (start, next) = match (data.contains(*first_block), data.contains(*second_block)) {
            (false, true) => (*first, *second),
            (true, false) => (*second, *first),
            _ => return None,
        };

        // The back-edge value is evaluated with the phi as an opaque leaf;
        // entries cached meanwhile would capture that leaf, so they are dropped.
        let saved = self.cache.borrow().clone();
        self.cache.borrow_mut().insert(phi, Scev::Value(phi));
        let next = self.scev_of(next);
        *self.cache.borrow_mut() = saved;

        let step = Scev::sub(next, Scev::Value(phi));
        let start = self.scev_of(start);
        if !step.is_computable()
            || !start.is_computable()
            || !self.is_invariant(&step, loop_id)
            || !self.is_invariant(&start, loop_id)
        {
            return None;
        }
        Some(Scev::add_rec(start, step, data.header))
    }

    /// Returns true if `value` does not change while `loop_id` runs
    pub fn is_loop_invariant(&self, value: Value, loop_id: LoopId) -> bool {
        match value {
            Value::Literal(_) => true,
            Value::Operand(id) => match self.definitions.get(&id) {
                Some(ValueDefinition::Parameter) => true,
                Some(ValueDefinition::Instruction { block, .. }) => {
                    !self.loops.contains(loop_id, *block)
                }
                None => false,
            },
        }
    }

    /// Returns true if `scev` does not change while `loop_id` runs
    pub fn is_invariant(&self, scev: &Scev, loop_id: LoopId) -> bool {
        match scev {
            Scev::Constant(_) => true,
            Scev::Value(id) => self.is_loop_invariant(Value::Operand(*id), loop_id),
            Scev::Add(terms) | Scev::Mul(terms) => {
                terms.iter().all(|term| self.is_invariant(term, loop_id))
            }
            Scev::UDiv(lhs, rhs) => {
                self.is_invariant(lhs, loop_id) && self.is_invariant(rhs, loop_id)
            }
            Scev::AddRec { header, .. } => !self.loops.contains(loop_id, *header),
            Scev::CouldNotCompute => false,
        }
    }

    /// The exit test of a rotated loop, normalized to "keep looping while
    /// `recurrence op bound`"
    fn exit_test(&self, loop_id: LoopId) -> Option<(BinaryOp, Scev, Scev)> {
        let data = &self.loops[loop_id];
        let latch = data.latch?;
        if data.exiting != Some(latch) {
            return None;
        }

        let Terminator::If {
            condition: Value::Operand(condition),
            then_target,
            else_target,
        } = self.function.basic_blocks[latch].terminator
        else {
            return None;
        };
        let ValueDefinition::Instruction { block, index } = *self.definitions.get(&condition)?
        else {
            return None;
        };
        let InstructionKind::BinaryOp {
            op, left, right, ..
        } = self.function.basic_blocks[block].instructions[index].kind
        else {
            return None;
        };
        if !op.is_comparison() {
            return None;
        }

        let op = if then_target == data.header {
            op
        } else if else_target == data.header {
            op.negated()?
        } else {
            return None;
        };

        let lhs = self.scev_of(left);
        let rhs = self.scev_of(right);
        let is_own_recurrence =
            |scev: &Scev| scev.as_add_rec().is_some_and(|(_, _, h)| h == data.header);
        let (op, recurrence, bound) = if is_own_recurrence(&lhs) {
            (op, lhs, rhs)
        } else if is_own_recurrence(&rhs) {
            (op.swapped(), rhs, lhs)
        } else {
            return None;
        };
        if !self.is_invariant(&bound, loop_id) {
            return None;
        }
        Some((op, recurrence, bound))
    }

    /// Number of times the body of a rotated loop executes
    ///
    /// With the tested value `{a,+,s}` and bound `n`, and the loop continuing
    /// while the test holds:
    ///
    /// | test     | step   | executions                  |
    /// |----------|--------|-----------------------------|
    /// | `x < n`  | s > 0  | `(n - a + 2s - 1) / s`      |
    /// | `x <= n` | s > 0  | `(n - a + 2s) / s`          |
    /// | `x > n`  | s < 0  | `(a - n + 2|s| - 1) / |s|`  |
    /// | `x >= n` | s < 0  | `(a - n + 2|s|) / |s|`      |
    /// | `x != n` | ±1     | `±(n - a) + 1`              |
    ///
    /// These hold whenever the loop runs more than once and fall to one or
    /// less otherwise, so equal expressions imply equal execution counts.
    pub fn trip_count(&self, loop_id: LoopId) -> Scev {
        let Some((op, recurrence, bound)) = self.exit_test(loop_id) else {
            return Scev::CouldNotCompute;
        };
        let Some((start, step, _)) = recurrence.as_add_rec() else {
            return Scev::CouldNotCompute;
        };
        let Some(step) = step.as_constant() else {
            return Scev::CouldNotCompute;
        };
        let start = start.clone();

        let ceil_count = |distance: Scev, stride: i64, inclusive: bool| -> Scev {
            let Some(twice) = stride.checked_mul(2) else {
                return Scev::CouldNotCompute;
            };
            let bias = if inclusive { twice } else { twice - 1 };
            Scev::udiv(
                Scev::add(distance, Scev::Constant(bias)),
                Scev::Constant(stride),
            )
        };

        match op {
            BinaryOp::Less if step > 0 => ceil_count(Scev::sub(bound, start), step, false),
            BinaryOp::LessEqual if step > 0 => ceil_count(Scev::sub(bound, start), step, true),
            BinaryOp::Greater if step < 0 => {
                ceil_count(Scev::sub(start, bound), step.saturating_neg(), false)
            }
            BinaryOp::GreaterEqual if step < 0 => {
                ceil_count(Scev::sub(start, bound), step.saturating_neg(), true)
            }
            BinaryOp::Neq if step == 1 => Scev::add(Scev::sub(bound, start), Scev::Constant(1)),
            BinaryOp::Neq if step == -1 => {
                Scev::add(Scev::sub(start, bound), Scev::Constant(1))
            }
            _ => Scev::CouldNotCompute,
        }
    }

    /// The header phi that drives the exit test of `loop_id`
    ///
    /// The tested value is either the phi itself or the phi advanced by one step.
    pub fn induction_variable(&self, loop_id: LoopId) -> Option<ValueId> {
        let (_, recurrence, _) = self.exit_test(loop_id)?;
        let (tested_start, tested_step, _) = recurrence.as_add_rec()?;
        let header = self.loops[loop_id].header;

        self.function.basic_blocks[header]
            .phis()
            .filter_map(|phi| phi.destination())
            .find(|&phi| {
                let scev = self.scev_of_id(phi);
                let Some((start, step, rec_header)) = scev.as_add_rec() else {
                    return false;
                };
                rec_header == header
                    && step == tested_step
                    && (start == tested_start
                        || Scev::add(start.clone(), step.clone()) == *tested_start)
            })
    }
}

#[cfg(test)]
#[path = "scev_tests.rs"]
mod tests;
