//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::bridge::{KeySlot, Registry};
use crate::host::{
    AnalysisManager, Function, Module, PassBuilder, PassManager, PipelineElement, Unit,
};
use once_cell::sync::Lazy;

/// Describes one granularity of IR that foreign passes and analyses can work over.
///
/// Implementors are uninhabited, they only exist to select the unit type, the
/// process-wide identity slot and registry, and the right builder hooks at
/// compile time.
pub trait IrUnit: 'static {
    /// The unit of IR itself.
    type Unit: Unit;

    /// Name used in diagnostics, `"module"` or `"function"`.
    const NAME: &'static str;

    /// The "current identity" cell that analyses of this kind resolve through.
    fn key_slot() -> &'static KeySlot;

    /// The registry of foreign passes and analyses of this kind.
    fn registry() -> &'static Registry;

    /// Adds a pipeline parsing callback for this kind to `builder`.
    fn add_pipeline_parsing_callback<F>(builder: &mut PassBuilder, callback: F)
    where
        F: Fn(&str, &mut PassManager<Self::Unit>, &[PipelineElement]) -> bool + 'static;

    /// Adds an analysis registration callback for this kind to `builder`.
    fn add_analysis_registration_callback<F>(builder: &mut PassBuilder, callback: F)
    where
        F: Fn(&mut AnalysisManager<Self::Unit>) + 'static;
}

/// The analysis manager for units of kind `IR`.
pub type AnalysisManagerOf<IR> = AnalysisManager<<IR as IrUnit>::Unit>;

/// The pass manager for units of kind `IR`.
pub type PassManagerOf<IR> = PassManager<<IR as IrUnit>::Unit>;

/// Whole compilation units.
pub enum ModuleIr {}

/// Single procedures.
pub enum FunctionIr {}

static MODULE_KEY: KeySlot = KeySlot::new();
static FUNCTION_KEY: KeySlot = KeySlot::new();

static MODULE_REGISTRY: Lazy<Registry> = Lazy::new(|| Registry::new(ModuleIr::NAME));
static FUNCTION_REGISTRY: Lazy<Registry> = Lazy::new(|| Registry::new(FunctionIr::NAME));

impl IrUnit for ModuleIr {
    type Unit = Module;

    const NAME: &'static str = "module";

    fn key_slot() -> &'static KeySlot {
        &MODULE_KEY
    }

    fn registry() -> &'static Registry {
        &MODULE_REGISTRY
    }

    fn add_pipeline_parsing_callback<F>(builder: &mut PassBuilder, callback: F)
    where
        F: Fn(&str, &mut PassManager<Module>, &[PipelineElement]) -> bool + 'static,
    {
        builder.register_module_pipeline_parsing_callback(callback)
    }

    fn add_analysis_registration_callback<F>(builder: &mut PassBuilder, callback: F)
    where
        F: Fn(&mut AnalysisManager<Module>) + 'static,
    {
        builder.register_module_analysis_registration_callback(callback)
    }
}

impl IrUnit for FunctionIr {
    type Unit = Function;

    const NAME: &'static str = "function";

    fn key_slot() -> &'static KeySlot {
        &FUNCTION_KEY
    }

    fn registry() -> &'static Registry {
        &FUNCTION_REGISTRY
    }

    fn add_pipeline_parsing_callback<F>(builder: &mut PassBuilder, callback: F)
    where
        F: Fn(&str, &mut PassManager<Function>, &[PipelineElement]) -> bool + 'static,
    {
        builder.register_function_pipeline_parsing_callback(callback)
    }

    fn add_analysis_registration_callback<F>(builder: &mut PassBuilder, callback: F)
    where
        F: Fn(&mut AnalysisManager<Function>) + 'static,
    {
        builder.register_function_analysis_registration_callback(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_its_own_state() {
        assert!(!std::ptr::eq(ModuleIr::key_slot(), FunctionIr::key_slot()));
        assert!(!std::ptr::eq(ModuleIr::registry(), FunctionIr::registry()));
        assert_eq!(ModuleIr::registry().unit(), "module");
        assert_eq!(FunctionIr::registry().unit(), "function");
    }
}
