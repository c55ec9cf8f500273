use super::*;
use crate::analysis::FunctionAnalyses;
use crate::testing::{param_n, two_sum_loops, CountingLoop};
use crate::{MirFunction, Terminator};

fn fusable_module() -> MirModule {
    let (function, _, _) =
        two_sum_loops(CountingLoop::new(param_n()), CountingLoop::new(param_n()));
    let mut module = MirModule::new();
    module.add_function(function);
    module
}

fn loop_count(module: &MirModule) -> usize {
    let (_, function) = module.functions().next().unwrap();
    FunctionAnalyses::compute(function).loops.len()
}

#[test]
fn test_default_config() {
    let config = PipelineConfig::default();
    assert_eq!(config.optimization_level, OptimizationLevel::Standard);
    assert_eq!(config.fusion, FusionConfig::default());
    assert!(!config.validate);
}

#[test]
fn test_optimization_levels() {
    assert_eq!(OptimizationLevel::from_level("0"), Some(OptimizationLevel::None));
    assert_eq!(OptimizationLevel::from_level("1"), Some(OptimizationLevel::Basic));
    assert_eq!(OptimizationLevel::from_level(" 2 "), Some(OptimizationLevel::Standard));
    assert_eq!(OptimizationLevel::from_level("3"), Some(OptimizationLevel::Standard));
    assert_eq!(OptimizationLevel::from_level("fast"), None);
}

#[test]
fn test_environment_config() {
    std::env::set_var("LOOPWEAVE_OPT_LEVEL", "1");
    std::env::set_var("LOOPWEAVE_MAX_FUSIONS", "3");
    std::env::set_var("LOOPWEAVE_VALIDATE", "1");
    let config = PipelineConfig::from_environment();
    std::env::remove_var("LOOPWEAVE_OPT_LEVEL");
    std::env::remove_var("LOOPWEAVE_MAX_FUSIONS");
    std::env::remove_var("LOOPWEAVE_VALIDATE");

    assert_eq!(config.optimization_level, OptimizationLevel::Basic);
    assert_eq!(config.fusion.max_fusions, Some(3));
    assert!(config.validate);
}

#[test]
fn test_standard_level_fuses() {
    let mut module = fusable_module();
    assert_eq!(optimize_module(&mut module, &PipelineConfig::checked()), Ok(true));
    assert_eq!(loop_count(&module), 1);
}

#[test]
fn test_no_opt_leaves_module_alone() {
    let mut module = fusable_module();
    let before = module.clone();
    assert_eq!(optimize_module(&mut module, &PipelineConfig::no_opt()), Ok(false));
    assert_eq!(module, before);
}

#[test]
fn test_basic_level_keeps_loops() {
    let mut module = fusable_module();
    let config = PipelineConfig {
        optimization_level: OptimizationLevel::Basic,
        ..PipelineConfig::checked()
    };
    optimize_module(&mut module, &config).unwrap();
    assert_eq!(loop_count(&module), 2);
}

#[test]
fn test_invalid_input_is_reported() {
    let mut broken = MirFunction::new("broken");
    let ghost = broken.new_value_id();
    let entry = broken.entry_block;
    broken.basic_blocks[entry].set_terminator(Terminator::return_values(vec![ghost.into()]));
    let mut module = MirModule::new();
    module.add_function(broken);

    let result = optimize_module(&mut module, &PipelineConfig::checked());
    assert!(matches!(
        result,
        Err(PipelineError::InvalidInput(ModuleError::InvalidFunction { .. }))
    ));
}
