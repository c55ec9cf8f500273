//! # MIR Values
//!
//! This module defines values and operands in the MIR system.
//! Values represent data that flows through the program.

use crate::{PrettyPrint, ValueId};

/// Represents any value in the program: literals, parameters, temporaries.
///
/// # Design Notes
///
/// - Literals are embedded directly so constant operands need no definition
/// - Operands reference values computed by instructions or bound as parameters
/// - The type is Copy for efficient passing around
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy, PartialOrd, Ord)]
pub enum Value {
    /// A constant literal value
    Literal(Literal),

    /// An operand that references a computed value
    /// The `ValueId` points to the instruction or parameter that produces it
    Operand(ValueId),
}

/// Literal constant values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy, PartialOrd, Ord)]
pub enum Literal {
    /// Signed 64-bit integer literal
    Integer(i64),

    /// Boolean literal
    Boolean(bool),
}

impl Value {
    /// Creates a new integer literal value
    pub const fn integer(value: i64) -> Self {
        Self::Literal(Literal::Integer(value))
    }

    /// Creates a new boolean literal value
    pub const fn boolean(value: bool) -> Self {
        Self::Literal(Literal::Boolean(value))
    }

    /// Creates a new operand value
    pub const fn operand(id: ValueId) -> Self {
        Self::Operand(id)
    }

    /// Returns the operand ID if this is an operand
    pub const fn as_operand(&self) -> Option<ValueId> {
        match self {
            Self::Operand(id) => Some(*id),
            Self::Literal(_) => None,
        }
    }

    /// Rewrites this value in place if it references `from`
    pub fn replace_use(&mut self, from: ValueId, to: ValueId) {
        if *self == Self::Operand(from) {
            *self = Self::Operand(to);
        }
    }
}

impl PrettyPrint for Value {
    fn pretty_print(&self, _indent: usize) -> String {
        match self {
            Self::Literal(lit) => lit.pretty_print(0),
            Self::Operand(id) => format!("%{}", id.index()),
        }
    }
}

impl PrettyPrint for Literal {
    fn pretty_print(&self, _indent: usize) -> String {
        match self {
            Self::Integer(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_print(0))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<ValueId> for Value {
    fn from(id: ValueId) -> Self {
        Self::operand(id)
    }
}
