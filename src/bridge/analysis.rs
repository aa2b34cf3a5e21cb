//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::bridge::{AnalysisManagerOf, IrUnit, OpaqueValue, RawOpaque};
use crate::host::{AnalysisId, AnalysisPass};
use log::{debug, trace};
use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard};
use std::cell::Cell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;

/// A foreign analysis computation.
///
/// Receives the context bound to the analysis (null if there is none), the unit
/// and the analysis manager for the unit. The result is owned by the analysis
/// manager's cache from then on.
pub type AnalysisEntrypoint = unsafe extern "C" fn(
    context: *mut c_void,
    unit: *const c_void,
    manager: *const c_void,
) -> RawOpaque;

/// The "current identity" cell for one kind of IR.
///
/// The host asks an analysis *type* for its identity, and every foreign analysis of
/// one kind shares the type [`Analysis<IR>`]. The identity the host sees is whatever
/// is in this cell, so it is only ever read while a [`KeyScope`] is held, and the
/// scope is held for the whole host call that resolves identity.
///
/// The lock is re-entrant: an analysis that requests another analysis of the same
/// kind while it is being computed opens a nested scope on the same thread.
pub struct KeySlot {
    current: ReentrantMutex<Cell<Option<AnalysisId>>>,
}

impl KeySlot {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        Self {
            current: const_reentrant_mutex(Cell::new(None)),
        }
    }

    /// Locks the slot and makes `key` the current identity until the scope is dropped.
    pub fn scope(&self, key: AnalysisId) -> KeyScope<'_> {
        let guard = self.current.lock();
        let previous = guard.replace(Some(key));

        trace!("entering key scope for {key}");

        KeyScope { guard, previous }
    }

    /// The current identity, if any scope is open on this thread.
    ///
    /// Blocks while another thread holds a scope.
    pub fn current(&self) -> Option<AnalysisId> {
        self.current.lock().get()
    }
}

impl Default for KeySlot {
    fn default() -> Self {
        Self::new()
    }
}

/// An open identity scope, see [`KeySlot::scope`]. Restores the previous identity
/// and unlocks the slot when dropped.
pub struct KeyScope<'a> {
    guard: ReentrantMutexGuard<'a, Cell<Option<AnalysisId>>>,
    previous: Option<AnalysisId>,
}

impl Drop for KeyScope<'_> {
    fn drop(&mut self) {
        self.guard.set(self.previous);
    }
}

/// A foreign analysis, presented to the host as a native analysis over `IR`.
///
/// Results are [`OpaqueValue`]s, so the host's cache releases them through the
/// foreign deleter when they are invalidated.
pub struct Analysis<IR: IrUnit> {
    entrypoint: AnalysisEntrypoint,
    context: OpaqueValue,
    _unit: PhantomData<IR>,
}

impl<IR: IrUnit> Analysis<IR> {
    /// Binds an entrypoint and its context.
    ///
    /// # Safety
    /// `entrypoint` must be sound to call with the pointer owned by `context`, a
    /// pointer to an `IR::Unit` and a pointer to the analysis manager for it, and must
    /// return a value that [`OpaqueValue::from_raw`] can take ownership of.
    pub unsafe fn new(entrypoint: AnalysisEntrypoint, context: OpaqueValue) -> Self {
        Self {
            entrypoint,
            context,
            _unit: PhantomData,
        }
    }

    /// Runs the foreign computation over `unit`.
    pub fn compute(&mut self, unit: &IR::Unit, am: &AnalysisManagerOf<IR>) -> OpaqueValue {
        let unit = unit as *const IR::Unit as *const c_void;
        let am = am as *const AnalysisManagerOf<IR> as *const c_void;

        // SAFETY: the contract of `Self::new`
        unsafe { OpaqueValue::from_raw((self.entrypoint)(self.context.as_ptr(), unit, am)) }
    }

    /// The identity the host is resolving right now.
    ///
    /// # Panics
    /// Panics if no [`KeyScope`] for `IR` is open, i.e. if the host resolves identity
    /// outside of one of the bridge's identity-sensitive calls.
    pub fn identity() -> AnalysisId {
        match IR::key_slot().current() {
            Some(key) => key,
            None => panic!(
                "{} analysis identity resolved outside of a key scope",
                IR::NAME
            ),
        }
    }

    /// Registers a foreign analysis into `am` under the identity `key`.
    ///
    /// Returns `false` if an analysis with that identity is already registered, in
    /// which case `context` is released right away.
    ///
    /// # Safety
    /// Same as [`Self::new`].
    pub unsafe fn register(
        am: &mut AnalysisManagerOf<IR>,
        key: AnalysisId,
        entrypoint: AnalysisEntrypoint,
        context: OpaqueValue,
    ) -> bool {
        let _scope = IR::key_slot().scope(key);
        let registered = am.register_pass(move || Self::new(entrypoint, context));

        debug!(
            "{} analysis {key} registered into manager: {registered}",
            IR::NAME
        );

        registered
    }

    /// Gets the result of the analysis with identity `key`, computing it if needed.
    ///
    /// The pointer stays valid until the result is invalidated.
    ///
    /// # Panics
    /// Panics if no analysis with identity `key` is registered in `am`.
    pub fn result(am: &AnalysisManagerOf<IR>, key: AnalysisId, unit: &IR::Unit) -> *mut c_void {
        let _scope = IR::key_slot().scope(key);

        am.get_result::<Self>(unit).as_ptr()
    }

    /// Gets the result of the analysis with identity `key` if it is cached, and
    /// null otherwise.
    pub fn cached_result(
        am: &AnalysisManagerOf<IR>,
        key: AnalysisId,
        unit: &IR::Unit,
    ) -> *mut c_void {
        let _scope = IR::key_slot().scope(key);

        am.get_cached_result::<Self>(unit)
            .map_or(ptr::null_mut(), |result| result.as_ptr())
    }

    /// Registers every analysis in `IR`'s registry into a fresh analysis manager.
    pub fn register_known(am: &mut AnalysisManagerOf<IR>) {
        IR::registry().for_each_analysis(|key, entrypoint| {
            // SAFETY: entrypoints are vouched for when they enter the registry
            unsafe { Self::register(am, key, entrypoint, OpaqueValue::null()) };
        });
    }
}

impl<IR: IrUnit> AnalysisPass<IR::Unit> for Analysis<IR> {
    type Result = OpaqueValue;

    fn id() -> AnalysisId {
        Self::identity()
    }

    fn run(&mut self, unit: &IR::Unit, am: &AnalysisManagerOf<IR>) -> OpaqueValue {
        self.compute(unit, am)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{FunctionIr, ModuleIr};
    use crate::host::{
        AnalysisKey, Function, FunctionAnalysisManager, Module, ModuleAnalysisManager,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    static LENGTH: AnalysisKey = AnalysisKey::new();
    static DOUBLE: AnalysisKey = AnalysisKey::new();

    unsafe extern "C" fn tagged(
        context: *mut c_void,
        _: *const c_void,
        _: *const c_void,
    ) -> RawOpaque {
        RawOpaque::boxed(*(context as *const usize))
    }

    unsafe extern "C" fn length(
        _: *mut c_void,
        unit: *const c_void,
        _: *const c_void,
    ) -> RawOpaque {
        let func = &*(unit as *const Function);

        RawOpaque::boxed(func.body().len())
    }

    unsafe extern "C" fn double(
        _: *mut c_void,
        unit: *const c_void,
        am: *const c_void,
    ) -> RawOpaque {
        let func = &*(unit as *const Function);
        let am = &*(am as *const FunctionAnalysisManager);
        let length = Analysis::<FunctionIr>::result(am, AnalysisId::of(&LENGTH), func);

        RawOpaque::boxed(*(length as *const usize) * 2)
    }

    fn read(result: *mut c_void) -> usize {
        assert!(!result.is_null());

        unsafe { *(result as *const usize) }
    }

    fn manager() -> FunctionAnalysisManager {
        let mut fam = FunctionAnalysisManager::new();

        unsafe {
            assert!(Analysis::<FunctionIr>::register(
                &mut fam,
                AnalysisId::of(&LENGTH),
                length,
                OpaqueValue::null()
            ));
            assert!(Analysis::<FunctionIr>::register(
                &mut fam,
                AnalysisId::of(&DOUBLE),
                double,
                OpaqueValue::null()
            ));
        }

        fam
    }

    #[test]
    fn cached_results_appear_after_computation() {
        let fam = manager();
        let func = Function::with_body("f", ["a", "b", "c"]);
        let key = AnalysisId::of(&LENGTH);

        assert!(Analysis::<FunctionIr>::cached_result(&fam, key, &func).is_null());

        let computed = Analysis::<FunctionIr>::result(&fam, key, &func);
        let cached = Analysis::<FunctionIr>::cached_result(&fam, key, &func);

        assert_eq!(computed, cached);
        assert_eq!(read(cached), 3);
    }

    #[test]
    fn nested_lookups_restore_the_outer_identity() {
        let fam = manager();
        let func = Function::with_body("f", ["a", "b"]);

        let double = Analysis::<FunctionIr>::result(&fam, AnalysisId::of(&DOUBLE), &func);
        let length = Analysis::<FunctionIr>::cached_result(&fam, AnalysisId::of(&LENGTH), &func);

        assert_eq!(read(double), 4);
        assert_eq!(read(length), 2);
        assert_eq!(FunctionIr::key_slot().current(), None);
    }

    #[test]
    fn key_scopes_nest() {
        static A: AnalysisKey = AnalysisKey::new();
        static B: AnalysisKey = AnalysisKey::new();
        let slot = KeySlot::new();

        {
            let _a = slot.scope(AnalysisId::of(&A));
            {
                let _b = slot.scope(AnalysisId::of(&B));
                assert_eq!(slot.current(), Some(AnalysisId::of(&B)));
            }
            assert_eq!(slot.current(), Some(AnalysisId::of(&A)));
        }

        assert_eq!(slot.current(), None);
    }

    #[test]
    fn duplicate_registration_releases_the_context() {
        static RELEASED: AtomicUsize = AtomicUsize::new(0);
        static KEY: AnalysisKey = AnalysisKey::new();

        struct Context;

        impl Drop for Context {
            fn drop(&mut self) {
                RELEASED.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut mam = ModuleAnalysisManager::new();
        let key = AnalysisId::of(&KEY);

        let register = |mam: &mut ModuleAnalysisManager| unsafe {
            Analysis::<ModuleIr>::register(mam, key, tagged, OpaqueValue::boxed(Context))
        };

        assert!(register(&mut mam));
        assert!(!register(&mut mam));

        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);

        drop(mam);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "outside of a key scope")]
    fn identity_requires_a_scope() {
        Analysis::<ModuleIr>::identity();
    }

    #[test]
    fn identities_never_leak_between_threads() {
        #[allow(clippy::declare_interior_mutable_const)]
        const KEY: AnalysisKey = AnalysisKey::new();
        static KEYS: [AnalysisKey; 4] = [KEY; 4];

        thread::scope(|s| {
            for t in 0..4 {
                s.spawn(move || {
                    let mut fam = FunctionAnalysisManager::new();
                    let mut mam = ModuleAnalysisManager::new();

                    for (i, key) in KEYS.iter().enumerate() {
                        let id = AnalysisId::of(key);

                        unsafe {
                            assert!(Analysis::<FunctionIr>::register(
                                &mut fam,
                                id,
                                tagged,
                                OpaqueValue::boxed(i)
                            ));
                            assert!(Analysis::<ModuleIr>::register(
                                &mut mam,
                                id,
                                tagged,
                                OpaqueValue::boxed(100 + i)
                            ));
                        }
                    }

                    let func = Function::new("f");
                    let module = Module::new("m");

                    for round in 0..200 {
                        let i = (round + t) % KEYS.len();
                        let id = AnalysisId::of(&KEYS[i]);

                        let function_result = Analysis::<FunctionIr>::result(&fam, id, &func);
                        let module_result = Analysis::<ModuleIr>::result(&mam, id, &module);

                        assert_eq!(read(function_result), i);
                        assert_eq!(read(module_result), 100 + i);

                        if round % 7 == 0 {
                            fam.clear();
                            mam.clear();
                        }

                        thread::yield_now();
                    }
                });
            }
        });
    }
}
