//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::host::{
    AnalysisManager, Function, FunctionAnalysisManagerModuleProxy, Module, PreservedAnalyses, Unit,
};
use log::trace;

/// Models a pass that possibly performs a transformation over a unit of IR.
///
/// While the pass may not actually modify the IR, it has the ability to, and needs to
/// declare what it changed (if anything) through [`PreservedAnalyses`].
pub trait TransformPass<U: Unit> {
    /// A name for diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Performs the transformation over a given unit.
    ///
    /// This function is expected to act as-if it was pure, i.e. calling the same
    /// pass multiple times on the same IR should produce equivalent IR each time
    /// and should return the same preserved analyses each time.
    fn run(&mut self, unit: &mut U, am: &mut AnalysisManager<U>) -> PreservedAnalyses;
}

/// Manages running a set of passes over IR.
///
/// An important note is that this is actually a pass itself, it's a pass
/// that simply runs other passes.
pub struct PassManager<U: Unit> {
    passes: Vec<Box<dyn TransformPass<U>>>,
}

/// Runs passes over whole modules.
pub type ModulePassManager = PassManager<Module>;

/// Runs passes over single functions.
pub type FunctionPassManager = PassManager<Function>;

impl<U: Unit> PassManager<U> {
    /// Creates a new, empty, pass manager.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Adds a transformation pass to the pass manager. This pass's order is defined
    /// relative to other calls to [`Self::add_pass`].
    pub fn add_pass<T: TransformPass<U> + 'static>(&mut self, pass: T) {
        self.passes.push(Box::new(pass));
    }

    /// The number of passes directly owned by this manager.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether the manager contains any passes.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// The names of the passes, in the order they run.
    pub fn pass_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.passes.iter().map(|pass| pass.name())
    }
}

impl<U: Unit> Default for PassManager<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: Unit> TransformPass<U> for PassManager<U> {
    fn name(&self) -> &str {
        "pass-manager"
    }

    fn run(&mut self, unit: &mut U, am: &mut AnalysisManager<U>) -> PreservedAnalyses {
        let mut preserved = PreservedAnalyses::all();

        for pass in self.passes.iter_mut() {
            trace!("running `{}` over `{}`", pass.name(), unit.name());

            let other = pass.run(unit, am);

            // analyses of later passes must never observe stale results
            am.invalidate(unit, &other);
            preserved = preserved.intersect(other);
        }

        preserved
    }
}

/// Adapts a function transform pass to a module pass that runs the given
/// function pass over every function in the module.
///
/// This is mostly used when building the final pass pipeline.
pub struct FunctionToModulePassAdapter {
    pass: Box<dyn TransformPass<Function>>,
}

impl FunctionToModulePassAdapter {
    /// Adapts a given pass into a [`FunctionToModulePassAdapter`] that can then
    /// be used as a module pass.
    pub fn adapt<T: TransformPass<Function> + 'static>(pass: T) -> Self {
        Self {
            pass: Box::new(pass),
        }
    }
}

impl TransformPass<Module> for FunctionToModulePassAdapter {
    fn name(&self) -> &str {
        "function-to-module"
    }

    fn run(&mut self, module: &mut Module, am: &mut AnalysisManager<Module>) -> PreservedAnalyses {
        let fam = am.get_result::<FunctionAnalysisManagerModuleProxy>(module);
        let mut preserved = PreservedAnalyses::all();

        for func in module.functions_mut() {
            let mut fam = fam.borrow_mut();
            let other = self.pass.run(func, &mut fam);

            fam.invalidate(func, &other);
            preserved = preserved.intersect(other);
        }

        preserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{
        AnalysisId, AnalysisKey, AnalysisPass, FunctionAnalysisManager, ModuleAnalysisManager,
    };

    struct StripNops;

    impl TransformPass<Function> for StripNops {
        fn run(
            &mut self,
            func: &mut Function,
            _: &mut FunctionAnalysisManager,
        ) -> PreservedAnalyses {
            let before = func.body().len();
            func.body_mut().retain(|inst| inst != "nop");

            if before == func.body().len() {
                PreservedAnalyses::all()
            } else {
                PreservedAnalyses::none()
            }
        }
    }

    struct Length;

    impl AnalysisPass<Function> for Length {
        type Result = usize;

        fn id() -> AnalysisId {
            static KEY: AnalysisKey = AnalysisKey::new();

            AnalysisId::of(&KEY)
        }

        fn run(&mut self, func: &Function, _: &FunctionAnalysisManager) -> usize {
            func.body().len()
        }
    }

    fn module() -> Module {
        let mut module = Module::new("m");
        module.add_function(Function::with_body("a", ["nop", "ret"]));
        module.add_function(Function::with_body("b", ["ret"]));

        module
    }

    fn managers() -> ModuleAnalysisManager {
        let mut fam = FunctionAnalysisManager::new();
        fam.register_pass(|| Length);

        let mut mam = ModuleAnalysisManager::new();
        mam.register_pass(move || FunctionAnalysisManagerModuleProxy::wrap(fam));

        mam
    }

    #[test]
    fn function_passes_run_over_every_function() {
        let mut module = module();
        let mut mam = managers();
        let mut mpm = ModulePassManager::new();
        mpm.add_pass(FunctionToModulePassAdapter::adapt(StripNops));

        let preserved = mpm.run(&mut module, &mut mam);

        assert!(!preserved.preserves_all());
        assert_eq!(module.function("a").unwrap().body(), ["ret"]);
        assert_eq!(module.function("b").unwrap().body(), ["ret"]);
    }

    #[test]
    fn module_invalidation_reaches_function_analyses() {
        let mut module = module();
        let mut mam = managers();

        let fam = mam.get_result::<FunctionAnalysisManagerModuleProxy>(&module);
        let length = *fam.borrow().get_result::<Length>(&module.functions()[0]);
        assert_eq!(length, 2);

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(FunctionToModulePassAdapter::adapt(StripNops));
        mpm.run(&mut module, &mut mam);

        let func = &module.functions()[0];
        assert!(fam.borrow().get_cached_result::<Length>(func).is_none());
        assert_eq!(*fam.borrow().get_result::<Length>(func), 1);
    }

    #[test]
    fn pass_manager_reports_its_passes() {
        let mut fpm = FunctionPassManager::new();
        assert!(fpm.is_empty());

        fpm.add_pass(StripNops);
        assert_eq!(fpm.len(), 1);
        assert!(fpm.pass_names().next().unwrap().ends_with("StripNops"));
    }
}
