//! # MIR Module
//!
//! The top-level container for MIR: every function of a compilation unit.

use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::{indent_str, FunctionId, MirFunction, PrettyPrint, ValidationError};

/// Structural problems of a module as a whole
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("function name map points '{name}' at missing function {id:?}")]
    DanglingName { name: String, id: FunctionId },
    #[error("function name mismatch: map has '{expected}', function has '{found}'")]
    NameMismatch { expected: String, found: String },
    #[error("duplicate function name '{0}'")]
    DuplicateName(String),
    #[error("function '{function}' is invalid: {error}")]
    InvalidFunction {
        function: String,
        #[source]
        error: ValidationError,
    },
}

/// The MIR for a whole compilation unit
///
/// Functions are stored in an `IndexVec` and can also be looked up by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirModule {
    /// All functions in this module, indexed by `FunctionId`
    pub functions: IndexVec<FunctionId, MirFunction>,

    /// Mapping from function names to their IDs
    pub function_names: FxHashMap<String, FunctionId>,
}

impl MirModule {
    /// Creates a new empty MIR module
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function to the module and returns its ID
    pub fn add_function(&mut self, function: MirFunction) -> FunctionId {
        let name = function.name.clone();
        let function_id = self.functions.push(function);
        self.function_names.insert(name, function_id);
        function_id
    }

    pub fn get_function(&self, id: FunctionId) -> Option<&MirFunction> {
        self.functions.get(id)
    }

    /// Looks up a function by name
    pub fn lookup_function(&self, name: &str) -> Option<FunctionId> {
        self.function_names.get(name).copied()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &MirFunction)> {
        self.functions.iter_enumerated()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut MirFunction> {
        self.functions.iter_mut()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Validates the name map and every function
    pub fn validate(&self) -> Result<(), ModuleError> {
        for (name, &id) in &self.function_names {
            let function = self.functions.get(id).ok_or_else(|| ModuleError::DanglingName {
                name: name.clone(),
                id,
            })?;
            if function.name != *name {
                return Err(ModuleError::NameMismatch {
                    expected: name.clone(),
                    found: function.name.clone(),
                });
            }
        }

        let mut seen_names = FxHashSet::default();
        for (_, function) in self.functions() {
            if !seen_names.insert(function.name.as_str()) {
                return Err(ModuleError::DuplicateName(function.name.clone()));
            }
        }

        for (_, function) in self.functions() {
            function
                .validate()
                .map_err(|error| ModuleError::InvalidFunction {
                    function: function.name.clone(),
                    error,
                })?;
        }

        Ok(())
    }
}

impl PrettyPrint for MirModule {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = String::new();
        let base_indent = indent_str(indent);

        result.push_str(&format!("{base_indent}module {{\n"));

        for (func_id, function) in self.functions() {
            result.push_str(&format!("{base_indent}  // Function {}\n", func_id.index()));
            result.push_str(&function.pretty_print(indent + 1));
            result.push('\n');
        }

        result.push_str(&format!("{base_indent}}}\n"));
        result
    }
}
