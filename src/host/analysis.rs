//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::host::{Function, Module, Unit, UnitId};
use crate::utility::SaHashMap;
use log::trace;
use smallvec::{smallvec, SmallVec};
use std::any::Any;
use std::cell::RefCell;
use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;
use std::sync::atomic::AtomicU8;

/// An anchor whose address is the identity of an analysis.
///
/// Every analysis owns exactly one `static` key, and the address of that key
/// is what the analysis manager uses to tell analyses apart:
///
/// ```
/// # use passlink::host::*;
/// static KEY: AnalysisKey = AnalysisKey::new();
///
/// assert_eq!(AnalysisId::of(&KEY), AnalysisId::of(&KEY));
/// ```
#[repr(C)]
pub struct AnalysisKey {
    // interior mutability keeps two keys from ever being merged into one address
    _anchor: AtomicU8,
}

impl AnalysisKey {
    /// Creates a new key. This is only meaningful in a `static`.
    pub const fn new() -> Self {
        Self {
            _anchor: AtomicU8::new(0),
        }
    }
}

impl Default for AnalysisKey {
    fn default() -> Self {
        Self::new()
    }
}

/// The identity of an analysis, derived from the address of its [`AnalysisKey`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnalysisId(usize);

impl AnalysisId {
    /// Gets the identity of the analysis that owns `key`.
    pub fn of(key: &'static AnalysisKey) -> Self {
        Self(key as *const AnalysisKey as usize)
    }

    /// Gets an identity from a raw key pointer, returning `None` for null.
    pub fn from_raw(key: *const AnalysisKey) -> Option<Self> {
        (!key.is_null()).then_some(Self(key as usize))
    }

    /// The key pointer this identity was derived from.
    pub fn as_ptr(self) -> *const AnalysisKey {
        self.0 as *const AnalysisKey
    }
}

impl Debug for AnalysisId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AnalysisId({:#x})", self.0)
    }
}

impl Display for AnalysisId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

static ALL: AnalysisKey = AnalysisKey::new();

/// Models the set of analyses that a given transformation pass
/// preserves.
///
/// This is not a contract that is checked, it is expected the the transform knows what
/// analyses it can preserve. If it reports incorrectly, stale analysis results will be
/// handed out to later passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservedAnalyses {
    // sorted so we can binary_search for `contains`
    preserved: SmallVec<[AnalysisId; 2]>,
}

impl PreservedAnalyses {
    /// Returns a [`PreservedAnalyses`] that marks every analysis as preserved.
    pub fn all() -> Self {
        Self {
            preserved: smallvec![AnalysisId::of(&ALL)],
        }
    }

    /// Returns a [`PreservedAnalyses`] that marks every analysis as invalidated.
    pub fn none() -> Self {
        Self {
            preserved: smallvec![],
        }
    }

    /// Checks if *all* analyses are preserved by a given transformation. If this
    /// is true, the transformation effectively reports to have not changed
    /// *anything* in the IR.
    ///
    /// This cannot be obtained in any way except [`Self::all`].
    pub fn preserves_all(&self) -> bool {
        self.preserved.len() == 1 && self.preserved[0] == AnalysisId::of(&ALL)
    }

    /// Reports that an analysis is preserved by the current transformation.
    pub fn preserve(&mut self, id: AnalysisId) {
        if !self.preserves_all() {
            self.insert(id)
        }
    }

    /// Gets the intersection of two sets of preserved analyses, returning
    /// the analyses that are preserved both by `self` and by `other`.
    pub fn intersect(self, other: PreservedAnalyses) -> PreservedAnalyses {
        if self.preserves_all() {
            return other;
        }

        if other.preserves_all() {
            return self;
        }

        let mut new = PreservedAnalyses::none();
        let intersection = self.preserved.into_iter().filter(|id| other.contains(*id));

        for id in intersection {
            new.insert(id)
        }

        new
    }

    /// Checks if an analysis is preserved. If all are preserved
    /// or the analysis has been preserved with [`Self::preserve`],
    /// this returns `true`.
    pub fn is_preserved(&self, id: AnalysisId) -> bool {
        self.preserves_all() || self.contains(id)
    }

    fn contains(&self, id: AnalysisId) -> bool {
        self.preserved.binary_search(&id).is_ok()
    }

    fn insert(&mut self, id: AnalysisId) {
        if let Err(pos) = self.preserved.binary_search(&id) {
            self.preserved.insert(pos, id);
        }
    }
}

/// An analysis over a unit of IR of type `U`.
///
/// The identity of an analysis is resolved through [`Self::id`], which takes no
/// `self`: the manager asks the *type* for its identity, exactly once, at the
/// start of every registration and every lookup.
pub trait AnalysisPass<U: Unit>: 'static {
    /// The result type of a given analysis.
    type Result: 'static;

    /// The identity the manager caches this analysis's results under.
    fn id() -> AnalysisId;

    /// Tells the analysis that its result for `unit` has been invalidated. It also
    /// sends preservation information along, some analyses need this.
    fn invalidate(&mut self, unit: &U, preserved: &PreservedAnalyses) {
        let _ = unit;
        let _ = preserved;
    }

    /// Performs the analysis and returns a computed result. This should not be an impure
    /// operation, running the analysis twice on the same input should produce the same result.
    fn run(&mut self, unit: &U, am: &AnalysisManager<U>) -> Self::Result;
}

trait ErasedAnalysis<U: Unit> {
    fn invalidate(&mut self, unit: &U, preserved: &PreservedAnalyses);

    fn run(&mut self, unit: &U, am: &AnalysisManager<U>) -> Rc<dyn Any>;
}

struct AnalysisWrapper<T> {
    inner: T,
}

impl<U, T> ErasedAnalysis<U> for AnalysisWrapper<T>
where
    U: Unit,
    T: AnalysisPass<U>,
{
    fn invalidate(&mut self, unit: &U, preserved: &PreservedAnalyses) {
        self.inner.invalidate(unit, preserved)
    }

    fn run(&mut self, unit: &U, am: &AnalysisManager<U>) -> Rc<dyn Any> {
        Rc::new(self.inner.run(unit, am))
    }
}

/// A lazy analysis manager for units of type `U`.
///
/// Analyses are registered through [`Self::register_pass`], and then can be later requested
/// through [`Self::get_result`]. These are lazily recomputed as they are invalidated and
/// requested through different passes.
///
/// When a pass completes, it returns a list of preserved analyses ([`PreservedAnalyses`]),
/// those are then passed to [`Self::invalidate`], which drops the cached results of every
/// analysis that is not preserved.
pub struct AnalysisManager<U: Unit> {
    passes: SaHashMap<AnalysisId, RefCell<Box<dyn ErasedAnalysis<U>>>>,
    results: RefCell<SaHashMap<(UnitId, AnalysisId), Rc<dyn Any>>>,
}

/// An analysis manager for whole modules.
pub type ModuleAnalysisManager = AnalysisManager<Module>;

/// An analysis manager for single functions.
pub type FunctionAnalysisManager = AnalysisManager<Function>;

impl<U: Unit> AnalysisManager<U> {
    /// Creates an empty manager with no analyses registered.
    pub fn new() -> Self {
        Self {
            passes: SaHashMap::default(),
            results: RefCell::default(),
        }
    }

    /// Registers an analysis with the manager. The analysis is not run until it is
    /// later requested through [`Self::get_result`].
    ///
    /// Returns `false` if an analysis with the same identity is already registered,
    /// in which case `make` is never called.
    pub fn register_pass<A, F>(&mut self, make: F) -> bool
    where
        A: AnalysisPass<U>,
        F: FnOnce() -> A,
    {
        let id = A::id();

        if self.passes.contains_key(&id) {
            return false;
        }

        // initially, every analysis is invalid. there's a possibility none of them
        // will even be ran, so there's no point to running them eagerly.
        let wrapper = AnalysisWrapper { inner: make() };
        self.passes.insert(id, RefCell::new(Box::new(wrapper)));

        true
    }

    /// Checks whether an analysis with the identity `id` is registered.
    pub fn is_registered(&self, id: AnalysisId) -> bool {
        self.passes.contains_key(&id)
    }

    /// The number of registered analyses.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether no analyses are registered at all.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Lazily gets the result of an analysis. If the analysis has been invalidated,
    /// the result is re-computed, cached, and then returned.
    ///
    /// # Panics
    /// Panics if the analysis was never registered, or if an analysis requests its
    /// own result while it is being computed.
    pub fn get_result<A: AnalysisPass<U>>(&self, unit: &U) -> Rc<A::Result> {
        let id = A::id();

        if let Some(result) = self.cached(unit.unit_id(), id) {
            trace!("cache hit for analysis {id} on `{}`", unit.name());

            return downcast::<A::Result>(result);
        }

        let pass = self
            .passes
            .get(&id)
            .expect("trying to get analysis that hasn't been registered");

        trace!("computing analysis {id} on `{}`", unit.name());

        // the results map must not be borrowed here, the analysis is free to
        // request the results of other analyses while it runs
        let result = pass
            .try_borrow_mut()
            .expect("analysis cannot request its own result")
            .run(unit, self);

        self.results
            .borrow_mut()
            .insert((unit.unit_id(), id), Rc::clone(&result));

        downcast::<A::Result>(result)
    }

    /// Gets the result of an analysis only if it is already cached and valid.
    ///
    /// This never runs an analysis.
    pub fn get_cached_result<A: AnalysisPass<U>>(&self, unit: &U) -> Option<Rc<A::Result>> {
        let id = A::id();

        self.cached(unit.unit_id(), id).map(downcast::<A::Result>)
    }

    /// Invalidates a set of analyses for a given unit.
    ///
    /// Any analysis not explicitly marked to be preserved in `preserved` has its result
    /// dropped. This does not trigger any analyses to be re-run.
    pub fn invalidate(&mut self, unit: &U, preserved: &PreservedAnalyses) {
        if preserved.preserves_all() {
            return;
        }

        let key = unit.unit_id();
        let results = self.results.get_mut();

        for (&id, pass) in self.passes.iter_mut() {
            if !preserved.is_preserved(id) {
                results.remove(&(key, id));
                pass.get_mut().invalidate(unit, preserved);
            }
        }
    }

    /// Drops every cached result for every unit.
    pub fn clear(&mut self) {
        self.results.get_mut().clear();
    }

    fn cached(&self, unit: UnitId, id: AnalysisId) -> Option<Rc<dyn Any>> {
        self.results.borrow().get(&(unit, id)).cloned()
    }
}

fn downcast<T: Any>(result: Rc<dyn Any>) -> Rc<T> {
    match result.downcast::<T>() {
        Ok(result) => result,
        Err(_) => panic!("two analyses share one identity but disagree on the result type"),
    }
}

impl<U: Unit> Default for AnalysisManager<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: Unit> Debug for AnalysisManager<U> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_set();

        for id in self.passes.keys() {
            m.entry(id);
        }

        m.finish()
    }
}

/// Wrapper type that maps the function analysis manager into an
/// "analysis" that can be requested by module passes.
///
/// The FAM is stored in an `Rc<RefCell<...>>` to facilitate both borrowing inside of
/// passes, and invalidation (which requires a `&mut`). One should not happen at
/// the same time as the other, but this is impossible to prove to the compiler otherwise.
pub struct FunctionAnalysisManagerModuleProxy {
    inner: FAMProxy,
}

/// Alias for the underlying FAM type.
pub type FAMProxy = Rc<RefCell<FunctionAnalysisManager>>;

impl FunctionAnalysisManagerModuleProxy {
    /// Wraps the FAM into a module analysis.
    pub fn wrap(inner: FunctionAnalysisManager) -> Self {
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }
}

impl AnalysisPass<Module> for FunctionAnalysisManagerModuleProxy {
    type Result = FAMProxy;

    fn id() -> AnalysisId {
        static KEY: AnalysisKey = AnalysisKey::new();

        AnalysisId::of(&KEY)
    }

    fn invalidate(&mut self, module: &Module, preserved: &PreservedAnalyses) {
        let mut fam = self.inner.borrow_mut();

        for func in module.functions() {
            fam.invalidate(func, preserved);
        }
    }

    fn run(&mut self, _: &Module, _: &ModuleAnalysisManager) -> Self::Result {
        Rc::clone(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Length {
        runs: Rc<Cell<usize>>,
    }

    impl AnalysisPass<Function> for Length {
        type Result = usize;

        fn id() -> AnalysisId {
            static KEY: AnalysisKey = AnalysisKey::new();

            AnalysisId::of(&KEY)
        }

        fn run(&mut self, func: &Function, _: &FunctionAnalysisManager) -> usize {
            self.runs.set(self.runs.get() + 1);

            func.body().len()
        }
    }

    struct DoubleLength;

    impl AnalysisPass<Function> for DoubleLength {
        type Result = usize;

        fn id() -> AnalysisId {
            static KEY: AnalysisKey = AnalysisKey::new();

            AnalysisId::of(&KEY)
        }

        fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> usize {
            *am.get_result::<Length>(func) * 2
        }
    }

    fn manager(runs: &Rc<Cell<usize>>) -> FunctionAnalysisManager {
        let mut fam = FunctionAnalysisManager::new();
        let runs = Rc::clone(runs);

        assert!(fam.register_pass(move || Length { runs }));
        assert!(fam.register_pass(|| DoubleLength));

        fam
    }

    #[test]
    fn results_are_cached_until_invalidated() {
        let runs = Rc::new(Cell::new(0));
        let mut fam = manager(&runs);
        let func = Function::with_body("f", ["a", "b", "c"]);

        assert!(fam.get_cached_result::<Length>(&func).is_none());
        assert_eq!(*fam.get_result::<Length>(&func), 3);
        assert_eq!(*fam.get_result::<Length>(&func), 3);
        assert_eq!(runs.get(), 1);
        assert_eq!(fam.get_cached_result::<Length>(&func).as_deref(), Some(&3));

        fam.invalidate(&func, &PreservedAnalyses::all());
        assert!(fam.get_cached_result::<Length>(&func).is_some());

        fam.invalidate(&func, &PreservedAnalyses::none());
        assert!(fam.get_cached_result::<Length>(&func).is_none());
        assert_eq!(*fam.get_result::<Length>(&func), 3);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn analyses_can_depend_on_each_other() {
        let runs = Rc::new(Cell::new(0));
        let fam = manager(&runs);
        let func = Function::with_body("f", ["a", "b"]);

        assert_eq!(*fam.get_result::<DoubleLength>(&func), 4);
        assert!(fam.get_cached_result::<Length>(&func).is_some());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let runs = Rc::new(Cell::new(0));
        let mut fam = manager(&runs);

        assert!(!fam.register_pass(|| -> Length { unreachable!() }));
        assert_eq!(fam.len(), 2);
    }

    #[test]
    fn partial_preservation_keeps_only_listed_results() {
        let runs = Rc::new(Cell::new(0));
        let mut fam = manager(&runs);
        let func = Function::with_body("f", ["a"]);

        fam.get_result::<DoubleLength>(&func);

        let mut preserved = PreservedAnalyses::none();
        preserved.preserve(<Length as AnalysisPass<Function>>::id());
        fam.invalidate(&func, &preserved);

        assert!(fam.get_cached_result::<Length>(&func).is_some());
        assert!(fam.get_cached_result::<DoubleLength>(&func).is_none());
    }

    #[test]
    fn intersection_of_preserved_sets() {
        let a = AnalysisId::of(&ALL);
        let b = <Length as AnalysisPass<Function>>::id();

        assert!(PreservedAnalyses::all()
            .intersect(PreservedAnalyses::all())
            .preserves_all());
        assert!(!PreservedAnalyses::all()
            .intersect(PreservedAnalyses::none())
            .is_preserved(b));

        let mut only_b = PreservedAnalyses::none();
        only_b.preserve(b);

        let both = PreservedAnalyses::all().intersect(only_b.clone());
        assert!(both.is_preserved(b));
        assert!(!both.preserves_all());
        assert_ne!(a, b);
    }

    #[test]
    #[should_panic(expected = "hasn't been registered")]
    fn unregistered_lookup_panics() {
        let fam = FunctionAnalysisManager::new();

        fam.get_result::<DoubleLength>(&Function::new("f"));
    }
}
