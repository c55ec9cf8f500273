//! Optimization pipeline over whole modules

use thiserror::Error;

use crate::module::ModuleError;
use crate::{FusionConfig, MirModule, PassManager};

/// How much work [`optimize_module`] does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OptimizationLevel {
    /// No passes run
    None,
    /// Dead code elimination and validation only
    Basic,
    /// Loop fusion followed by cleanup
    #[default]
    Standard,
}

impl OptimizationLevel {
    /// Parses the numeric form used by `LOOPWEAVE_OPT_LEVEL`
    ///
    /// Levels above 2 saturate to [`OptimizationLevel::Standard`].
    pub fn from_level(level: &str) -> Option<Self> {
        match level.trim().parse::<u8>().ok()? {
            0 => Some(Self::None),
            1 => Some(Self::Basic),
            _ => Some(Self::Standard),
        }
    }

    fn pass_manager(self, fusion: FusionConfig) -> Option<PassManager> {
        match self {
            Self::None => None,
            Self::Basic => Some(PassManager::basic_pipeline()),
            Self::Standard => Some(PassManager::with_config(fusion)),
        }
    }
}

/// Configuration for [`optimize_module`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub optimization_level: OptimizationLevel,
    /// Settings of the loop fusion pass at [`OptimizationLevel::Standard`]
    pub fusion: FusionConfig,
    /// Validate the module before and after optimizing it
    pub validate: bool,
}

impl PipelineConfig {
    pub fn no_opt() -> Self {
        Self {
            optimization_level: OptimizationLevel::None,
            ..Self::default()
        }
    }

    /// Default configuration with validation turned on
    pub fn checked() -> Self {
        Self {
            validate: true,
            ..Self::default()
        }
    }

    /// Reads overrides from the environment
    ///
    /// - `LOOPWEAVE_OPT_LEVEL`: `0`, `1` or `2`
    /// - `LOOPWEAVE_MAX_FUSIONS`: upper bound on fusions per function
    /// - `LOOPWEAVE_VALIDATE`: any value but `0` turns validation on
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_environment() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOOPWEAVE_OPT_LEVEL") {
            match OptimizationLevel::from_level(&level) {
                Some(level) => config.optimization_level = level,
                None => log::warn!("Ignoring LOOPWEAVE_OPT_LEVEL={level}"),
            }
        }
        if let Ok(max) = std::env::var("LOOPWEAVE_MAX_FUSIONS") {
            match max.trim().parse() {
                Ok(max) => config.fusion.max_fusions = Some(max),
                Err(_) => log::warn!("Ignoring LOOPWEAVE_MAX_FUSIONS={max}"),
            }
        }
        if let Ok(validate) = std::env::var("LOOPWEAVE_VALIDATE") {
            config.validate = validate.trim() != "0";
        }

        config
    }
}

/// Errors reported by [`optimize_module`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("module is invalid before optimization: {0}")]
    InvalidInput(#[source] ModuleError),
    #[error("optimization produced an invalid module: {0}")]
    InvalidOutput(#[source] ModuleError),
}

/// Runs the passes selected by `config` over every function of `module`
///
/// Returns whether any function changed.
pub fn optimize_module(
    module: &mut MirModule,
    config: &PipelineConfig,
) -> Result<bool, PipelineError> {
    if config.validate {
        module.validate().map_err(PipelineError::InvalidInput)?;
    }

    let Some(mut passes) = config.optimization_level.pass_manager(config.fusion) else {
        return Ok(false);
    };
    log::debug!(
        "Optimizing {} function(s) with {:?}",
        module.function_count(),
        passes.pass_names()
    );

    let mut modified = false;
    for function in module.functions_mut() {
        modified |= passes.run(function);
    }

    if config.validate {
        module.validate().map_err(PipelineError::InvalidOutput)?;
    }
    Ok(modified)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
