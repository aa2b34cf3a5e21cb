//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::bridge::{AnalysisManagerOf, IrUnit, OpaqueValue};
use crate::host::{PreservedAnalyses, TransformPass};
use log::trace;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::marker::PhantomData;

/// What a foreign pass reports about the analyses of the unit it ran over.
///
/// There is no finer-grained preservation across the boundary, a pass either
/// changed nothing or is assumed to have changed everything.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum PreservationStatus {
    /// Nothing was changed, every cached result stays valid.
    AllPreserved,
    /// Something may have changed, every cached result for the unit is dropped.
    NonePreserved,
}

impl From<PreservationStatus> for PreservedAnalyses {
    fn from(status: PreservationStatus) -> Self {
        match status {
            PreservationStatus::AllPreserved => PreservedAnalyses::all(),
            PreservationStatus::NonePreserved => PreservedAnalyses::none(),
        }
    }
}

/// A foreign transformation.
///
/// Receives the context bound to the pass (null if there is none), the unit it
/// may modify and the analysis manager for the unit.
pub type PassEntrypoint = unsafe extern "C" fn(
    context: *mut c_void,
    unit: *mut c_void,
    manager: *mut c_void,
) -> PreservationStatus;

/// A foreign pass, presented to the host as a native transform over `IR`.
pub struct Pass<IR: IrUnit> {
    name: String,
    entrypoint: PassEntrypoint,
    context: OpaqueValue,
    _unit: PhantomData<IR>,
}

impl<IR: IrUnit> Pass<IR> {
    /// Binds an entrypoint and its context.
    ///
    /// # Safety
    /// `entrypoint` must be sound to call with the pointer owned by `context`, a
    /// pointer to an `IR::Unit` and a pointer to the analysis manager for it.
    pub unsafe fn new(
        name: impl Into<String>,
        entrypoint: PassEntrypoint,
        context: OpaqueValue,
    ) -> Self {
        Self {
            name: name.into(),
            entrypoint,
            context,
            _unit: PhantomData,
        }
    }

    /// Calls the foreign transformation.
    pub fn invoke(
        &mut self,
        unit: &mut IR::Unit,
        am: &mut AnalysisManagerOf<IR>,
    ) -> PreservationStatus {
        let unit = unit as *mut IR::Unit as *mut c_void;
        let am = am as *mut AnalysisManagerOf<IR> as *mut c_void;

        // SAFETY: the contract of `Self::new`
        unsafe { (self.entrypoint)(self.context.as_ptr(), unit, am) }
    }
}

impl<IR: IrUnit> TransformPass<IR::Unit> for Pass<IR> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, unit: &mut IR::Unit, am: &mut AnalysisManagerOf<IR>) -> PreservedAnalyses {
        let status = self.invoke(unit, am);

        trace!("{} pass `{}` finished: {status:?}", IR::NAME, self.name);

        status.into()
    }
}
