//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::bridge::{AnalysisEntrypoint, IrUnit, OpaqueValue, Pass, PassEntrypoint, PassManagerOf};
use crate::error::BridgeError;
use crate::host::AnalysisId;
use crate::utility::SaHashMap;
use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;

/// The foreign passes and analyses known for one kind of IR.
///
/// Entries are only ever added, never removed or replaced. Everything is meant to be
/// registered once while the plugin loads, before any pipeline runs. The locks make
/// a late registration memory-safe, they do not make it meaningful: managers that
/// were already built will not see it.
pub struct Registry {
    unit: &'static str,
    passes: RwLock<SaHashMap<String, PassEntrypoint>>,
    analyses: RwLock<SaHashMap<AnalysisId, AnalysisEntrypoint>>,
}

impl Registry {
    /// Creates an empty registry. `unit` only shows up in diagnostics.
    pub fn new(unit: &'static str) -> Self {
        Self {
            unit,
            passes: RwLock::default(),
            analyses: RwLock::default(),
        }
    }

    /// The kind of IR this registry is for.
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// Makes `entrypoint` available under `name` in textual pipelines.
    ///
    /// # Safety
    /// `entrypoint` must satisfy the contract of [`Pass::new`] for the kind of IR
    /// this registry belongs to.
    pub unsafe fn register_pass(
        &self,
        name: &str,
        entrypoint: PassEntrypoint,
    ) -> Result<(), BridgeError> {
        if name.is_empty() {
            return Err(BridgeError::InvalidPassName);
        }

        match self.passes.write().entry(name.to_owned()) {
            Entry::Occupied(_) => Err(BridgeError::DuplicatePass {
                unit: self.unit,
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                debug!("registered {} pass `{name}`", self.unit);
                slot.insert(entrypoint);

                Ok(())
            }
        }
    }

    /// Associates the identity `key` with `entrypoint` for good.
    ///
    /// # Safety
    /// `entrypoint` must satisfy the contract of [`crate::bridge::Analysis::new`] for
    /// the kind of IR this registry belongs to.
    pub unsafe fn register_analysis(
        &self,
        key: AnalysisId,
        entrypoint: AnalysisEntrypoint,
    ) -> Result<(), BridgeError> {
        match self.analyses.write().entry(key) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateAnalysis {
                unit: self.unit,
                key,
            }),
            Entry::Vacant(slot) => {
                debug!("registered {} analysis {key}", self.unit);
                slot.insert(entrypoint);

                Ok(())
            }
        }
    }

    /// Finds the pass registered under `name`.
    pub fn lookup_pass(&self, name: &str) -> Option<PassEntrypoint> {
        self.passes.read().get(name).copied()
    }

    /// Calls `f` with every registered analysis, in no particular order.
    ///
    /// `f` runs without any lock held.
    pub fn for_each_analysis<F>(&self, mut f: F)
    where
        F: FnMut(AnalysisId, AnalysisEntrypoint),
    {
        let snapshot: Vec<_> = self
            .analyses
            .read()
            .iter()
            .map(|(&key, &entrypoint)| (key, entrypoint))
            .collect();

        for (key, entrypoint) in snapshot {
            f(key, entrypoint)
        }
    }

    /// Every registered pass name, sorted.
    pub fn pass_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.passes.read().keys().cloned().collect();
        names.sort_unstable();

        names
    }

    /// The number of registered analyses.
    pub fn analysis_count(&self) -> usize {
        self.analyses.read().len()
    }
}

/// Appends the foreign pass named `name` to `manager`, if there is one.
///
/// Returns whether a pass was appended. An unknown name is not an error, the host
/// simply moves on to its other parsing callbacks.
pub fn resolve_pass<IR: IrUnit>(name: &str, manager: &mut PassManagerOf<IR>) -> bool {
    match IR::registry().lookup_pass(name) {
        Some(entrypoint) => {
            trace!("resolved {} pass `{name}`", IR::NAME);

            // SAFETY: entrypoints are vouched for when they enter the registry
            let pass = unsafe { Pass::<IR>::new(name, entrypoint, OpaqueValue::null()) };
            manager.add_pass(pass);

            true
        }
        None => false,
    }
}
