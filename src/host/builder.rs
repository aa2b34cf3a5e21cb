//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::error::PipelineError;
use crate::host::{
    FunctionAnalysisManager, FunctionAnalysisManagerModuleProxy, FunctionPassManager,
    FunctionToModulePassAdapter, ModuleAnalysisManager, ModulePassManager,
};
use paste::paste;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// The host's representation of an optimization level, a pair of how hard to
/// optimize for speed and how hard to optimize for size.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct OptimizationLevel {
    speedup: u32,
    size: u32,
}

#[allow(non_upper_case_globals)]
impl OptimizationLevel {
    /// Disable as many optimizations as possible.
    pub const O0: Self = Self::new(0, 0);

    /// Optimize quickly without destroying debuggability.
    pub const O1: Self = Self::new(1, 0);

    /// Optimize for fast execution as much as possible without triggering
    /// significant incremental compile time or code size growth.
    pub const O2: Self = Self::new(2, 0);

    /// Optimize for fast execution as much as possible.
    pub const O3: Self = Self::new(3, 0);

    /// Similar to [`Self::O2`], but tries to optimize for small code size instead.
    pub const Os: Self = Self::new(2, 1);

    /// Optimize for code size at any and all costs.
    pub const Oz: Self = Self::new(2, 2);

    /// Creates an arbitrary level. The host never validates these, so levels
    /// outside of the named ones are representable.
    pub const fn new(speedup: u32, size: u32) -> Self {
        Self { speedup, size }
    }

    /// How hard to optimize for speed.
    pub fn speedup_level(self) -> u32 {
        self.speedup
    }

    /// How hard to optimize for size.
    pub fn size_level(self) -> u32 {
        self.size
    }
}

/// One element of a textual pipeline description, e.g. `function(a,b)`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct PipelineElement {
    /// The pass (or pass manager) name.
    pub name: String,
    /// The nested elements inside of parentheses, empty if there were none.
    pub inner: Vec<PipelineElement>,
}

/// Parses a textual pipeline description into a list of elements.
///
/// ```
/// # use passlink::host::parse_pipeline_text;
/// let elements = parse_pipeline_text("a,function(b,c)").unwrap();
///
/// assert_eq!(elements.len(), 2);
/// assert_eq!(elements[1].name, "function");
/// assert_eq!(elements[1].inner.len(), 2);
/// ```
pub fn parse_pipeline_text(text: &str) -> Result<Vec<PipelineElement>, PipelineError> {
    let mut parser = PipelineParser { text, pos: 0 };
    let elements = parser.pipeline()?;
    parser.skip_whitespace();

    // the only thing that can stop a top-level pipeline early is a stray `)`
    if parser.pos != text.len() {
        return Err(PipelineError::UnbalancedParens(parser.pos));
    }

    Ok(elements)
}

struct PipelineParser<'a> {
    text: &'a str,
    pos: usize,
}

impl PipelineParser<'_> {
    fn pipeline(&mut self) -> Result<Vec<PipelineElement>, PipelineError> {
        let mut elements = vec![self.element()?];

        while self.eat(',') {
            elements.push(self.element()?);
        }

        Ok(elements)
    }

    fn element(&mut self) -> Result<PipelineElement, PipelineError> {
        let start = self.pos;

        while let Some(c) = self.peek() {
            if matches!(c, ',' | '(' | ')') {
                break;
            }

            self.pos += c.len_utf8();
        }

        let name = self.text[start..self.pos].trim();

        if name.is_empty() {
            return Err(PipelineError::EmptyName(start));
        }

        let mut inner = Vec::new();

        if self.eat('(') {
            inner = self.pipeline()?;

            if !self.eat(')') {
                return Err(PipelineError::UnbalancedParens(self.pos));
            }
        }

        Ok(PipelineElement {
            name: name.to_owned(),
            inner,
        })
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();

        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();

            true
        } else {
            false
        }
    }
}

type ModuleParsingCallback =
    Box<dyn Fn(&str, &mut ModulePassManager, &[PipelineElement]) -> bool>;

type FunctionParsingCallback =
    Box<dyn Fn(&str, &mut FunctionPassManager, &[PipelineElement]) -> bool>;

macro_rules! extension_points {
    ($( $(#[$doc:meta])* $slot:ident($manager:ty); )*) => {
        paste! {
            /// Assembles optimization pipelines, and lets plugins contribute passes to them
            /// through callbacks fired at fixed extension points.
            ///
            /// Callbacks are kept for as long as the builder lives, and each one may be
            /// invoked any number of times (once per pipeline that is built).
            #[derive(Default)]
            pub struct PassBuilder {
                $( $slot: Vec<Box<dyn Fn(&mut $manager, OptimizationLevel)>>, )*
                module_analysis_registration: Vec<Box<dyn Fn(&mut ModuleAnalysisManager)>>,
                function_analysis_registration: Vec<Box<dyn Fn(&mut FunctionAnalysisManager)>>,
                module_pipeline_parsing: Vec<ModuleParsingCallback>,
                function_pipeline_parsing: Vec<FunctionParsingCallback>,
            }

            impl PassBuilder {
                $(
                    $(#[$doc])*
                    pub fn [<register_ $slot _ep_callback>]<F>(&mut self, callback: F)
                    where
                        F: Fn(&mut $manager, OptimizationLevel) + 'static,
                    {
                        self.$slot.push(Box::new(callback));
                    }

                    fn [<invoke_ $slot _ep_callbacks>](
                        &self,
                        manager: &mut $manager,
                        level: OptimizationLevel,
                    ) {
                        for callback in self.$slot.iter() {
                            callback(manager, level);
                        }
                    }
                )*
            }
        }
    };
}

extension_points! {
    /// Registers a callback for adding passes once at the start of the pipeline.
    pipeline_start(ModulePassManager);

    /// Registers a callback for adding passes right after the passes that do basic
    /// simplification of the input IR.
    pipeline_early_simplification(ModulePassManager);

    /// Registers a callback for adding passes just before the main module-level
    /// optimization passes.
    optimizer_early(ModulePassManager);

    /// Registers a callback for adding passes that run after everything else.
    optimizer_last(ModulePassManager);

    /// Registers a callback for adding passes that run at link time, before full
    /// link-time optimization.
    full_lto_early(ModulePassManager);

    /// Registers a callback for adding passes that run at link time, after full
    /// link-time optimization.
    full_lto_last(ModulePassManager);

    /// Registers a callback for adding peephole passes, which run after each
    /// instance of instruction combining.
    peephole(FunctionPassManager);

    /// Registers a callback for adding passes after most of the main optimizations,
    /// but before the last cleanup-ish optimizations.
    scalar_optimizer_late(FunctionPassManager);

    /// Registers a callback for adding passes before the vectorizer and other
    /// highly target specific optimizations.
    vectorizer_start(FunctionPassManager);
}

impl PassBuilder {
    /// Creates a builder with no callbacks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback that may parse a single module pipeline element and
    /// populate the given pass manager accordingly.
    ///
    /// The callback returns whether it recognized the element.
    pub fn register_module_pipeline_parsing_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str, &mut ModulePassManager, &[PipelineElement]) -> bool + 'static,
    {
        self.module_pipeline_parsing.push(Box::new(callback));
    }

    /// Registers a callback that may parse a single function pipeline element and
    /// populate the given pass manager accordingly.
    ///
    /// The callback returns whether it recognized the element.
    pub fn register_function_pipeline_parsing_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str, &mut FunctionPassManager, &[PipelineElement]) -> bool + 'static,
    {
        self.function_pipeline_parsing.push(Box::new(callback));
    }

    /// Registers a callback that registers analyses into every new module analysis manager.
    pub fn register_module_analysis_registration_callback<F>(&mut self, callback: F)
    where
        F: Fn(&mut ModuleAnalysisManager) + 'static,
    {
        self.module_analysis_registration.push(Box::new(callback));
    }

    /// Registers a callback that registers analyses into every new function analysis manager.
    pub fn register_function_analysis_registration_callback<F>(&mut self, callback: F)
    where
        F: Fn(&mut FunctionAnalysisManager) + 'static,
    {
        self.function_analysis_registration.push(Box::new(callback));
    }

    /// Fires every analysis registration callback, and then makes `fam` reachable
    /// from `mam` through a [`FunctionAnalysisManagerModuleProxy`].
    pub fn register_analyses(
        &self,
        mam: &mut ModuleAnalysisManager,
        mut fam: FunctionAnalysisManager,
    ) {
        for callback in self.function_analysis_registration.iter() {
            callback(&mut fam);
        }

        for callback in self.module_analysis_registration.iter() {
            callback(mam);
        }

        mam.register_pass(move || FunctionAnalysisManagerModuleProxy::wrap(fam));
    }

    /// Parses a textual pipeline description, appending the passes it names to `mpm`.
    ///
    /// `function(...)` nests a function pass manager, and `module(...)` simply groups
    /// module passes. A bare name is offered to every module parsing callback first,
    /// and if none of them recognize it, to every function parsing callback.
    pub fn parse_pass_pipeline(
        &self,
        mpm: &mut ModulePassManager,
        text: &str,
    ) -> Result<(), PipelineError> {
        for element in parse_pipeline_text(text)?.iter() {
            self.parse_module_element(mpm, element)?;
        }

        Ok(())
    }

    fn parse_module_element(
        &self,
        mpm: &mut ModulePassManager,
        element: &PipelineElement,
    ) -> Result<(), PipelineError> {
        match element.name.as_str() {
            "module" if !element.inner.is_empty() => {
                for inner in element.inner.iter() {
                    self.parse_module_element(mpm, inner)?;
                }

                return Ok(());
            }
            "function" if !element.inner.is_empty() => {
                let mut fpm = FunctionPassManager::new();

                for inner in element.inner.iter() {
                    self.parse_function_element(&mut fpm, inner)?;
                }

                mpm.add_pass(FunctionToModulePassAdapter::adapt(fpm));

                return Ok(());
            }
            _ => {}
        }

        let name = element.name.as_str();

        if self
            .module_pipeline_parsing
            .iter()
            .any(|callback| callback(name, mpm, &element.inner))
        {
            return Ok(());
        }

        let mut fpm = FunctionPassManager::new();

        if self
            .function_pipeline_parsing
            .iter()
            .any(|callback| callback(name, &mut fpm, &element.inner))
        {
            mpm.add_pass(FunctionToModulePassAdapter::adapt(fpm));

            return Ok(());
        }

        Err(PipelineError::UnknownPass(element.name.clone()))
    }

    fn parse_function_element(
        &self,
        fpm: &mut FunctionPassManager,
        element: &PipelineElement,
    ) -> Result<(), PipelineError> {
        let name = element.name.as_str();

        if self
            .function_pipeline_parsing
            .iter()
            .any(|callback| callback(name, fpm, &element.inner))
        {
            Ok(())
        } else {
            Err(PipelineError::UnknownPass(element.name.clone()))
        }
    }

    /// Builds the default per-module pipeline for `level`, giving every extension
    /// point a chance to contribute passes.
    pub fn build_per_module_default_pipeline(&self, level: OptimizationLevel) -> ModulePassManager {
        let mut mpm = ModulePassManager::new();

        self.invoke_pipeline_start_ep_callbacks(&mut mpm, level);
        self.invoke_pipeline_early_simplification_ep_callbacks(&mut mpm, level);

        let mut simplification = FunctionPassManager::new();
        self.invoke_peephole_ep_callbacks(&mut simplification, level);
        self.invoke_scalar_optimizer_late_ep_callbacks(&mut simplification, level);

        if !simplification.is_empty() {
            mpm.add_pass(FunctionToModulePassAdapter::adapt(simplification));
        }

        self.invoke_optimizer_early_ep_callbacks(&mut mpm, level);

        let mut vectorization = FunctionPassManager::new();
        self.invoke_vectorizer_start_ep_callbacks(&mut vectorization, level);

        if !vectorization.is_empty() {
            mpm.add_pass(FunctionToModulePassAdapter::adapt(vectorization));
        }

        self.invoke_optimizer_last_ep_callbacks(&mut mpm, level);

        mpm
    }

    /// Builds the full link-time optimization pipeline for `level`.
    pub fn build_lto_default_pipeline(&self, level: OptimizationLevel) -> ModulePassManager {
        let mut mpm = ModulePassManager::new();

        self.invoke_full_lto_early_ep_callbacks(&mut mpm, level);
        self.invoke_full_lto_last_ep_callbacks(&mut mpm, level);

        mpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Function, Module, PreservedAnalyses, TransformPass};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Named(&'static str);

    impl TransformPass<Module> for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&mut self, _: &mut Module, _: &mut ModuleAnalysisManager) -> PreservedAnalyses {
            PreservedAnalyses::all()
        }
    }

    struct Touch(Rc<RefCell<Vec<String>>>);

    impl TransformPass<Function> for Touch {
        fn run(
            &mut self,
            func: &mut Function,
            _: &mut FunctionAnalysisManager,
        ) -> PreservedAnalyses {
            self.0.borrow_mut().push(func.body().join(" "));

            PreservedAnalyses::all()
        }
    }

    #[test]
    fn pipeline_text_nesting() {
        let elements = parse_pipeline_text("a, function(b,c) ,d").unwrap();
        let names: Vec<_> = elements.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names, ["a", "function", "d"]);
        assert_eq!(elements[1].inner[1].name, "c");
    }

    #[test]
    fn pipeline_text_errors() {
        let error = |text| parse_pipeline_text(text).unwrap_err();

        assert_eq!(error(""), PipelineError::EmptyName(0));
        assert_eq!(error("a,,b"), PipelineError::EmptyName(2));
        assert_eq!(error("f(a"), PipelineError::UnbalancedParens(3));
        assert_eq!(error("a)"), PipelineError::UnbalancedParens(1));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let builder = PassBuilder::new();
        let mut mpm = ModulePassManager::new();

        assert_eq!(
            builder.parse_pass_pipeline(&mut mpm, "nope"),
            Err(PipelineError::UnknownPass("nope".to_owned()))
        );
        assert!(mpm.is_empty());
    }

    #[test]
    fn module_callbacks_win_over_function_callbacks() {
        let mut builder = PassBuilder::new();

        builder.register_module_pipeline_parsing_callback(|name, mpm, _| {
            (name == "shared")
                .then(|| mpm.add_pass(Named("module")))
                .is_some()
        });
        builder.register_function_pipeline_parsing_callback(|name, fpm, _| {
            let seen = Rc::default();
            (name == "shared" || name == "only-fn")
                .then(|| fpm.add_pass(Touch(seen)))
                .is_some()
        });

        let mut mpm = ModulePassManager::new();
        builder
            .parse_pass_pipeline(&mut mpm, "shared,only-fn,function(shared)")
            .unwrap();

        let names: Vec<_> = mpm.pass_names().collect();
        assert_eq!(
            names,
            ["module", "function-to-module", "function-to-module"]
        );
    }

    #[test]
    fn default_pipeline_fires_extension_points_in_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut builder = PassBuilder::new();

        macro_rules! record {
            ($register:ident, $label:literal) => {{
                let order = Rc::clone(&order);
                builder.$register(move |_, level| order.borrow_mut().push(($label, level)));
            }};
        }

        record!(register_optimizer_last_ep_callback, "optimizer-last");
        record!(register_vectorizer_start_ep_callback, "vectorizer-start");
        record!(register_optimizer_early_ep_callback, "optimizer-early");
        record!(register_scalar_optimizer_late_ep_callback, "scalar-late");
        record!(register_peephole_ep_callback, "peephole");
        record!(
            register_pipeline_early_simplification_ep_callback,
            "early-simplification"
        );
        record!(register_pipeline_start_ep_callback, "start");
        record!(register_full_lto_early_ep_callback, "lto-early");
        record!(register_full_lto_last_ep_callback, "lto-last");

        builder.build_per_module_default_pipeline(OptimizationLevel::Os);

        let labels: Vec<_> = order.borrow().iter().map(|(label, _)| *label).collect();
        assert_eq!(
            labels,
            [
                "start",
                "early-simplification",
                "peephole",
                "scalar-late",
                "optimizer-early",
                "vectorizer-start",
                "optimizer-last"
            ]
        );
        assert!(order
            .borrow()
            .iter()
            .all(|(_, level)| *level == OptimizationLevel::Os));

        order.borrow_mut().clear();
        builder.build_lto_default_pipeline(OptimizationLevel::O3);

        let labels: Vec<_> = order.borrow().iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, ["lto-early", "lto-last"]);
    }

    #[test]
    fn registered_analyses_reach_both_managers() {
        let mut builder = PassBuilder::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        let c = Rc::clone(&calls);
        builder.register_function_analysis_registration_callback(move |_| {
            c.borrow_mut().push("function");
        });
        let c = Rc::clone(&calls);
        builder.register_module_analysis_registration_callback(move |_| {
            c.borrow_mut().push("module");
        });

        let mut mam = ModuleAnalysisManager::new();
        builder.register_analyses(&mut mam, FunctionAnalysisManager::new());

        assert_eq!(*calls.borrow(), ["function", "module"]);
        assert!(mam.is_registered(
            <FunctionAnalysisManagerModuleProxy as crate::host::AnalysisPass<Module>>::id()
        ));
    }

    #[test]
    fn levels_expose_their_components() {
        assert_eq!(OptimizationLevel::Oz.speedup_level(), 2);
        assert_eq!(OptimizationLevel::Oz.size_level(), 2);
        assert_eq!(OptimizationLevel::O0, OptimizationLevel::new(0, 0));
    }
}
