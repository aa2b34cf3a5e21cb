//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Extension-point relay.
//!
//! Every subscription function here takes a context pointer, the deleter for it
//! and a foreign callback. The context is shared between every invocation of the
//! callback, and is released when the [`PassBuilder`] that holds the callback is
//! dropped.

use crate::bridge::{Deleter, FunctionIr, IrUnit, ModuleIr, OpaqueValue, RawOpaque};
use crate::host::{self, FunctionPassManager, ModulePassManager, PassBuilder};
use log::debug;
use paste::paste;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::rc::Rc;
use std::slice;

/// The optimization level handed to foreign extension-point callbacks.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum OptimizationLevel {
    /// No optimization.
    O0,
    /// Light optimization.
    O1,
    /// Default optimization.
    O2,
    /// Aggressive optimization.
    O3,
    /// Default optimization, favoring size.
    Os,
    /// Size at all costs.
    Oz,
}

impl OptimizationLevel {
    /// Maps the host's `(speedup, size)` pair onto a named level.
    ///
    /// Pairs that have no name map to [`Self::Oz`], so levels added to the host
    /// later still reach foreign callbacks as something meaningful.
    pub fn from_host(level: host::OptimizationLevel) -> Self {
        match (level.speedup_level(), level.size_level()) {
            (0, 0) => Self::O0,
            (1, 0) => Self::O1,
            (2, 0) => Self::O2,
            (3, 0) => Self::O3,
            (2, 1) => Self::Os,
            (2, 2) => Self::Oz,
            _ => Self::Oz,
        }
    }
}

impl From<host::OptimizationLevel> for OptimizationLevel {
    fn from(level: host::OptimizationLevel) -> Self {
        Self::from_host(level)
    }
}

/// A foreign callback for an extension point. `manager` is the pass manager the
/// callback may add passes to.
pub type ExtensionPointCallback =
    unsafe extern "C" fn(context: *mut c_void, manager: *mut c_void, level: OptimizationLevel);

/// A foreign callback that registers analyses into a fresh analysis manager.
pub type AnalysisRegistrationCallback =
    unsafe extern "C" fn(context: *mut c_void, manager: *mut c_void);

/// A foreign callback that may recognize the pass name `name[..name_len]` (UTF-8,
/// not NUL-terminated) and append it to `manager`. Returns whether it did.
pub type PipelineParsingCallback = unsafe extern "C" fn(
    context: *mut c_void,
    name: *const u8,
    name_len: usize,
    manager: *mut c_void,
) -> bool;

/// A foreign callback together with its shared context.
pub struct CallbackSubscription<C> {
    context: Rc<OpaqueValue>,
    callback: C,
}

impl<C: Copy> CallbackSubscription<C> {
    /// Takes ownership of `context`.
    ///
    /// # Safety
    /// `context` and `deleter` must satisfy [`OpaqueValue::from_raw`], and `callback`
    /// must be sound to call with `context` and the arguments of its signature for
    /// as long as the subscription lives.
    pub unsafe fn new(context: *mut c_void, deleter: Option<Deleter>, callback: C) -> Self {
        let context = OpaqueValue::from_raw(RawOpaque {
            ptr: context,
            deleter,
        });

        Self {
            context: Rc::new(context),
            callback,
        }
    }

    /// The context pointer passed to every invocation.
    pub fn context(&self) -> *mut c_void {
        self.context.as_ptr()
    }
}

impl<C: Copy> Clone for CallbackSubscription<C> {
    fn clone(&self) -> Self {
        Self {
            context: Rc::clone(&self.context),
            callback: self.callback,
        }
    }
}

impl CallbackSubscription<ExtensionPointCallback> {
    /// Relays an extension point to the foreign callback.
    pub fn invoke<M>(&self, manager: &mut M, level: host::OptimizationLevel) {
        let manager = manager as *mut M as *mut c_void;

        // SAFETY: the contract of `Self::new`
        unsafe { (self.callback)(self.context(), manager, level.into()) }
    }
}

impl CallbackSubscription<AnalysisRegistrationCallback> {
    /// Relays analysis registration to the foreign callback.
    pub fn invoke<M>(&self, manager: &mut M) {
        // SAFETY: the contract of `Self::new`
        unsafe { (self.callback)(self.context(), manager as *mut M as *mut c_void) }
    }
}

impl CallbackSubscription<PipelineParsingCallback> {
    /// Asks the foreign callback whether it knows `name`.
    pub fn parse<M>(&self, name: &str, manager: &mut M) -> bool {
        let manager = manager as *mut M as *mut c_void;

        // SAFETY: the contract of `Self::new`
        unsafe { (self.callback)(self.context(), name.as_ptr(), name.len(), manager) }
    }
}

macro_rules! extension_point_relays {
    ($( $slot:ident($manager:ty); )*) => {
        paste! {
            $(
                #[doc = concat!(
                    "Subscribes `callback` to the `",
                    stringify!($slot),
                    "` extension point."
                )]
                ///
                /// # Safety
                /// `builder` must point at a live [`PassBuilder`], and the rest of the
                /// arguments must satisfy [`CallbackSubscription::new`]. The manager handed
                #[doc = concat!("to `callback` is a [`", stringify!($manager), "`].")]
                #[no_mangle]
                pub unsafe extern "C" fn [<pass_builder_add_ $slot _ep_callback>](
                    builder: *mut c_void,
                    context: *mut c_void,
                    deleter: Option<Deleter>,
                    callback: ExtensionPointCallback,
                ) {
                    let builder = &mut *(builder as *mut PassBuilder);
                    let subscription = CallbackSubscription::new(context, deleter, callback);

                    debug!("subscribed to the {} extension point", stringify!($slot));

                    builder.[<register_ $slot _ep_callback>](move |manager: &mut $manager, level| {
                        subscription.invoke(manager, level)
                    });
                }
            )*
        }
    };
}

extension_point_relays! {
    pipeline_start(ModulePassManager);
    pipeline_early_simplification(ModulePassManager);
    optimizer_early(ModulePassManager);
    optimizer_last(ModulePassManager);
    full_lto_early(ModulePassManager);
    full_lto_last(ModulePassManager);
    peephole(FunctionPassManager);
    scalar_optimizer_late(FunctionPassManager);
    vectorizer_start(FunctionPassManager);
}

/// Subscribes a foreign analysis registration callback for `IR`.
///
/// # Safety
/// Same as [`CallbackSubscription::new`]. The manager handed to `callback` is the
/// analysis manager for `IR`.
pub unsafe fn subscribe_analysis_registration<IR: IrUnit>(
    builder: &mut PassBuilder,
    context: *mut c_void,
    deleter: Option<Deleter>,
    callback: AnalysisRegistrationCallback,
) {
    let subscription = CallbackSubscription::new(context, deleter, callback);

    debug!("subscribed to {} analysis registration", IR::NAME);

    IR::add_analysis_registration_callback(builder, move |manager| subscription.invoke(manager));
}

/// Subscribes a foreign pipeline parsing callback for `IR`.
///
/// # Safety
/// Same as [`CallbackSubscription::new`]. The manager handed to `callback` is the
/// pass manager for `IR`.
pub unsafe fn subscribe_pipeline_parsing<IR: IrUnit>(
    builder: &mut PassBuilder,
    context: *mut c_void,
    deleter: Option<Deleter>,
    callback: PipelineParsingCallback,
) {
    let subscription = CallbackSubscription::new(context, deleter, callback);

    debug!("subscribed to {} pipeline parsing", IR::NAME);

    IR::add_pipeline_parsing_callback(builder, move |name, manager, _| {
        subscription.parse(name, manager)
    });
}

/// Subscribes `callback` to module analysis registration.
///
/// # Safety
/// `builder` must point at a live [`PassBuilder`], see [`subscribe_analysis_registration`].
#[no_mangle]
pub unsafe extern "C" fn pass_builder_add_module_analysis_registration_callback(
    builder: *mut c_void,
    context: *mut c_void,
    deleter: Option<Deleter>,
    callback: AnalysisRegistrationCallback,
) {
    subscribe_analysis_registration::<ModuleIr>(
        &mut *(builder as *mut PassBuilder),
        context,
        deleter,
        callback,
    )
}

/// Subscribes `callback` to function analysis registration.
///
/// # Safety
/// `builder` must point at a live [`PassBuilder`], see [`subscribe_analysis_registration`].
#[no_mangle]
pub unsafe extern "C" fn pass_builder_add_function_analysis_registration_callback(
    builder: *mut c_void,
    context: *mut c_void,
    deleter: Option<Deleter>,
    callback: AnalysisRegistrationCallback,
) {
    subscribe_analysis_registration::<FunctionIr>(
        &mut *(builder as *mut PassBuilder),
        context,
        deleter,
        callback,
    )
}

/// Subscribes `callback` to module pipeline parsing.
///
/// # Safety
/// `builder` must point at a live [`PassBuilder`], see [`subscribe_pipeline_parsing`].
#[no_mangle]
pub unsafe extern "C" fn pass_builder_add_module_pipeline_parsing_callback(
    builder: *mut c_void,
    context: *mut c_void,
    deleter: Option<Deleter>,
    callback: PipelineParsingCallback,
) {
    subscribe_pipeline_parsing::<ModuleIr>(
        &mut *(builder as *mut PassBuilder),
        context,
        deleter,
        callback,
    )
}

/// Subscribes `callback` to function pipeline parsing.
///
/// # Safety
/// `builder` must point at a live [`PassBuilder`], see [`subscribe_pipeline_parsing`].
#[no_mangle]
pub unsafe extern "C" fn pass_builder_add_function_pipeline_parsing_callback(
    builder: *mut c_void,
    context: *mut c_void,
    deleter: Option<Deleter>,
    callback: PipelineParsingCallback,
) {
    subscribe_pipeline_parsing::<FunctionIr>(
        &mut *(builder as *mut PassBuilder),
        context,
        deleter,
        callback,
    )
}

/// Reads a pass name handed to a [`PipelineParsingCallback`].
///
/// Returns `None` if the bytes are not UTF-8.
///
/// # Safety
/// `name` must point at `len` readable bytes for the duration of `'a`.
pub unsafe fn pass_name<'a>(name: *const u8, len: usize) -> Option<&'a str> {
    if len == 0 {
        return Some("");
    }

    std::str::from_utf8(slice::from_raw_parts(name, len)).ok()
}
