//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The C ABI of the bridge.
//!
//! Registration mistakes (a duplicate name or key, an unusable name, a null key)
//! are bugs in the foreign caller's setup code. They are logged and the process is
//! aborted right away. Absence (an unknown pass name, a result that isn't cached
//! yet) is reported as `false` or null.

use crate::bridge::{
    pass_name, register_plugin, Analysis, AnalysisEntrypoint, AnalysisManagerOf, Deleter,
    FunctionIr, IrUnit, ModuleIr, OpaqueValue, Pass, PassEntrypoint, RawOpaque,
};
use crate::error::BridgeError;
use crate::host::{
    AnalysisId, AnalysisKey, AnalysisPass, FunctionAnalysisManagerModuleProxy, Module,
    ModuleAnalysisManager, PassPluginLibraryInfo, PluginRegistrar, PLUGIN_API_VERSION,
};
use log::error;
use paste::paste;
use std::ffi::{c_char, c_void};
use std::process;

fn fatal(err: BridgeError) -> ! {
    error!("fatal plugin error: {err}");

    process::abort()
}

unsafe fn checked_name<'a>(name: *const u8, len: usize) -> Result<&'a str, BridgeError> {
    match pass_name(name, len) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(BridgeError::InvalidPassName),
    }
}

fn checked_key(key: *const AnalysisKey) -> Result<AnalysisId, BridgeError> {
    AnalysisId::from_raw(key).ok_or(BridgeError::NullAnalysisKey)
}

fn checked_registered<IR: IrUnit>(
    manager: &AnalysisManagerOf<IR>,
    key: AnalysisId,
) -> Result<AnalysisId, BridgeError> {
    if manager.is_registered(key) {
        Ok(key)
    } else {
        Err(BridgeError::UnregisteredAnalysis {
            unit: IR::NAME,
            key,
        })
    }
}

unsafe fn register_pass<IR: IrUnit>(
    name: *const u8,
    len: usize,
    entrypoint: PassEntrypoint,
) -> Result<(), BridgeError> {
    IR::registry().register_pass(checked_name(name, len)?, entrypoint)
}

unsafe fn register_analysis<IR: IrUnit>(
    key: *const AnalysisKey,
    entrypoint: AnalysisEntrypoint,
) -> Result<(), BridgeError> {
    IR::registry().register_analysis(checked_key(key)?, entrypoint)
}

macro_rules! unit_surface {
    ($( $unit:ident => $ir:ty; )*) => {
        paste! {
            $(
                #[doc = concat!(
                    "Registers a ",
                    stringify!($unit),
                    " pass under the UTF-8 name `name[..name_len]`."
                )]
                ///
                /// Aborts the process if the name is already taken or is not valid UTF-8.
                ///
                /// # Safety
                /// `name` must point at `name_len` readable bytes. `entrypoint` must be sound
                #[doc = concat!(
                    "to call with a context, a `",
                    stringify!($unit),
                    "` and its analysis manager."
                )]
                #[no_mangle]
                pub unsafe extern "C" fn [<register_ $unit _pass>](
                    name: *const u8,
                    name_len: usize,
                    entrypoint: PassEntrypoint,
                ) {
                    if let Err(err) = register_pass::<$ir>(name, name_len, entrypoint) {
                        fatal(err)
                    }
                }

                #[doc = concat!(
                    "Registers a ",
                    stringify!($unit),
                    " analysis under the identity `key`."
                )]
                ///
                /// Aborts the process if the key is null or already taken.
                ///
                /// # Safety
                /// `key` must point at a key that lives for the rest of the process. `entrypoint`
                /// must be sound to call with a context, a unit and its analysis manager, and
                /// must return a value with a deleter (or null).
                #[no_mangle]
                pub unsafe extern "C" fn [<register_ $unit _analysis>](
                    key: *const AnalysisKey,
                    entrypoint: AnalysisEntrypoint,
                ) {
                    if let Err(err) = register_analysis::<$ir>(key, entrypoint) {
                        fatal(err)
                    }
                }

                #[doc = concat!(
                    "Appends a context-bearing ",
                    stringify!($unit),
                    " pass to a pass manager."
                )]
                ///
                /// # Safety
                /// `manager` must point at a live pass manager of the right kind, `context` and
                /// `deleter` must satisfy [`OpaqueValue::from_raw`], and `entrypoint` must be
                /// sound to call with `context`.
                #[no_mangle]
                pub unsafe extern "C" fn [<$unit _pass_manager_add_pass>](
                    manager: *mut c_void,
                    context: *mut c_void,
                    deleter: Option<Deleter>,
                    entrypoint: PassEntrypoint,
                ) {
                    let manager = &mut *(manager as *mut crate::bridge::PassManagerOf<$ir>);
                    let context = OpaqueValue::from_raw(RawOpaque {
                        ptr: context,
                        deleter,
                    });

                    let name = concat!("foreign-", stringify!($unit), "-pass");

                    manager.add_pass(Pass::<$ir>::new(name, entrypoint, context));
                }

                #[doc = concat!(
                    "Whether a ",
                    stringify!($unit),
                    " pass manager has no passes."
                )]
                ///
                /// # Safety
                /// `manager` must point at a live pass manager of the right kind.
                #[no_mangle]
                pub unsafe extern "C" fn [<$unit _pass_manager_is_empty>](
                    manager: *const c_void,
                ) -> bool {
                    (*(manager as *const crate::bridge::PassManagerOf<$ir>)).is_empty()
                }

                #[doc = concat!(
                    "Registers a context-bearing ",
                    stringify!($unit),
                    " analysis into one analysis manager."
                )]
                ///
                /// Returns `false` if an analysis with identity `key` is already registered there,
                /// in which case the context is released right away.
                ///
                /// # Safety
                /// Same as [`OpaqueValue::from_raw`] for `context` and `deleter`, and `manager`
                /// must point at a live analysis manager of the right kind. Aborts on a null
                /// `key`.
                #[no_mangle]
                pub unsafe extern "C" fn [<$unit _analysis_manager_register_pass>](
                    manager: *mut c_void,
                    context: *mut c_void,
                    deleter: Option<Deleter>,
                    entrypoint: AnalysisEntrypoint,
                    key: *const AnalysisKey,
                ) -> bool {
                    let manager = &mut *(manager as *mut AnalysisManagerOf<$ir>);
                    let context = OpaqueValue::from_raw(RawOpaque {
                        ptr: context,
                        deleter,
                    });
                    let key = checked_key(key).unwrap_or_else(|err| fatal(err));

                    Analysis::<$ir>::register(manager, key, entrypoint, context)
                }

                #[doc = concat!(
                    "Gets (computing if needed) the result of a ",
                    stringify!($unit),
                    " analysis."
                )]
                ///
                /// The pointer stays valid until the result is invalidated. Aborts the process
                /// if the key is null or the analysis is not registered in `manager`.
                ///
                /// # Safety
                /// `manager` and `unit` must point at a live analysis manager and unit of the right
                /// kind.
                #[no_mangle]
                pub unsafe extern "C" fn [<get_ $unit _analysis_result>](
                    manager: *const c_void,
                    key: *const AnalysisKey,
                    unit: *const c_void,
                ) -> *mut c_void {
                    let manager = &*(manager as *const AnalysisManagerOf<$ir>);
                    let unit = &*(unit as *const <$ir as IrUnit>::Unit);
                    let key = checked_key(key)
                        .and_then(|key| checked_registered::<$ir>(manager, key))
                        .unwrap_or_else(|err| fatal(err));

                    Analysis::<$ir>::result(manager, key, unit)
                }

                #[doc = concat!(
                    "Gets the result of a ",
                    stringify!($unit),
                    " analysis if it is cached, null otherwise."
                )]
                ///
                /// # Safety
                #[doc = concat!("Same as [`get_", stringify!($unit), "_analysis_result`].")]
                #[no_mangle]
                pub unsafe extern "C" fn [<get_ $unit _analysis_cached_result>](
                    manager: *const c_void,
                    key: *const AnalysisKey,
                    unit: *const c_void,
                ) -> *mut c_void {
                    let manager = &*(manager as *const AnalysisManagerOf<$ir>);
                    let unit = &*(unit as *const <$ir as IrUnit>::Unit);
                    let key = checked_key(key).unwrap_or_else(|err| fatal(err));

                    Analysis::<$ir>::cached_result(manager, key, unit)
                }
            )*
        }
    };
}

unit_surface! {
    module => ModuleIr;
    function => FunctionIr;
}

/// Gets the function analysis manager that belongs to a module analysis manager.
///
/// Aborts the process if the module analysis manager was never set up by
/// [`crate::host::PassBuilder::register_analyses`].
///
/// # Safety
/// `manager` and `module` must point at a live module analysis manager and module.
#[no_mangle]
pub unsafe extern "C" fn get_function_analysis_manager(
    manager: *const c_void,
    module: *const c_void,
) -> *mut c_void {
    let manager = &*(manager as *const ModuleAnalysisManager);
    let module = &*(module as *const Module);
    let proxy = <FunctionAnalysisManagerModuleProxy as AnalysisPass<Module>>::id();

    if let Err(err) = checked_registered::<ModuleIr>(manager, proxy) {
        fatal(err)
    }

    manager
        .get_result::<FunctionAnalysisManagerModuleProxy>(module)
        .as_ptr() as *mut c_void
}

/// The plugin interface version the bridge was built against.
#[no_mangle]
pub extern "C" fn plugin_api_version() -> u32 {
    PLUGIN_API_VERSION
}

/// The function the host calls to install the bridge into a builder.
#[no_mangle]
pub extern "C" fn plugin_registrar() -> PluginRegistrar {
    register_plugin
}

/// Describes the plugin to the host.
///
/// # Safety
/// `name` and `version` must be null or NUL-terminated strings that live for the
/// rest of the process.
#[no_mangle]
pub unsafe extern "C" fn plugin_library_info(
    name: *const c_char,
    version: *const c_char,
) -> PassPluginLibraryInfo {
    PassPluginLibraryInfo {
        api_version: PLUGIN_API_VERSION,
        plugin_name: name,
        plugin_version: version,
        registrar: register_plugin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::PreservationStatus;
    use crate::host::{
        Function, FunctionAnalysisManager, FunctionPassManager, PassBuilder, TransformPass,
    };
    use std::ptr;

    static LENGTH: AnalysisKey = AnalysisKey::new();

    unsafe extern "C" fn length(
        _: *mut c_void,
        unit: *const c_void,
        _: *const c_void,
    ) -> RawOpaque {
        RawOpaque::boxed((*(unit as *const Function)).body().len())
    }

    unsafe extern "C" fn push(
        context: *mut c_void,
        unit: *mut c_void,
        _: *mut c_void,
    ) -> PreservationStatus {
        let func = &mut *(unit as *mut Function);

        func.body_mut().push((*(context as *const String)).clone());

        PreservationStatus::NonePreserved
    }

    fn as_void<T>(value: &mut T) -> *mut c_void {
        value as *mut T as *mut c_void
    }

    #[test]
    fn context_bearing_passes_join_pass_managers() {
        let mut fpm = FunctionPassManager::new();
        let context = RawOpaque::boxed(String::from("nop"));

        unsafe {
            assert!(function_pass_manager_is_empty(as_void(&mut fpm)));
            function_pass_manager_add_pass(as_void(&mut fpm), context.ptr, context.deleter, push);
            assert!(!function_pass_manager_is_empty(as_void(&mut fpm)));
        }

        let mut func = Function::new("f");
        let mut fam = FunctionAnalysisManager::new();
        fpm.run(&mut func, &mut fam);

        assert_eq!(func.body(), ["nop"]);
    }

    #[test]
    fn analyses_register_once_per_manager() {
        let mut fam = FunctionAnalysisManager::new();
        let func = Function::with_body("f", ["a", "b"]);

        unsafe {
            assert!(function_analysis_manager_register_pass(
                as_void(&mut fam),
                ptr::null_mut(),
                None,
                length,
                &LENGTH
            ));
            assert!(!function_analysis_manager_register_pass(
                as_void(&mut fam),
                ptr::null_mut(),
                None,
                length,
                &LENGTH
            ));

            let unit = &func as *const Function as *const c_void;
            let manager = &fam as *const FunctionAnalysisManager as *const c_void;

            assert!(get_function_analysis_cached_result(manager, &LENGTH, unit).is_null());

            let result = get_function_analysis_result(manager, &LENGTH, unit);
            assert_eq!(*(result as *const usize), 2);
            assert_eq!(
                get_function_analysis_cached_result(manager, &LENGTH, unit),
                result
            );
        }
    }

    #[test]
    fn module_passes_can_reach_function_analyses() {
        let mut fam = FunctionAnalysisManager::new();
        let registered = unsafe {
            function_analysis_manager_register_pass(
                as_void(&mut fam),
                ptr::null_mut(),
                None,
                length,
                &LENGTH,
            )
        };
        assert!(registered);

        let mut mam = ModuleAnalysisManager::new();
        PassBuilder::new().register_analyses(&mut mam, fam);

        let mut module = Module::new("m");
        module.add_function(Function::with_body("f", ["a"]));

        unsafe {
            let fam = get_function_analysis_manager(
                &mam as *const ModuleAnalysisManager as *const c_void,
                &module as *const Module as *const c_void,
            );
            let func = &module.functions()[0] as *const Function as *const c_void;
            let result = get_function_analysis_result(fam, &LENGTH, func);

            assert_eq!(*(result as *const usize), 1);
        }
    }

    #[test]
    fn registration_through_the_c_surface() {
        let name = "ffi-test-push";

        unsafe {
            register_function_pass(name.as_ptr(), name.len(), push);
        }

        assert!(FunctionIr::registry().lookup_pass(name).is_some());
        assert!(FunctionIr::registry().lookup_pass("ffi-test").is_none());
    }

    #[test]
    fn bad_names_and_keys_are_errors() {
        let bytes = [0xc3u8];
        let invalid = Err(BridgeError::InvalidPassName);

        unsafe {
            assert_eq!(checked_name(bytes.as_ptr(), 1), invalid);
            assert_eq!(checked_name(ptr::null(), 0), invalid);
        }

        assert_eq!(checked_key(ptr::null()), Err(BridgeError::NullAnalysisKey));
        assert_eq!(checked_key(&LENGTH), Ok(AnalysisId::of(&LENGTH)));
    }

    #[test]
    fn results_require_a_registered_analysis() {
        let mut fam = FunctionAnalysisManager::new();
        let key = AnalysisId::of(&LENGTH);
        let missing = BridgeError::UnregisteredAnalysis {
            unit: "function",
            key,
        };

        assert_eq!(checked_registered::<FunctionIr>(&fam, key), Err(missing));

        unsafe {
            function_analysis_manager_register_pass(
                as_void(&mut fam),
                ptr::null_mut(),
                None,
                length,
                &LENGTH,
            );
        }

        assert_eq!(checked_registered::<FunctionIr>(&fam, key), Ok(key));
    }

    #[test]
    fn function_analysis_manager_requires_the_proxy() {
        let proxy = <FunctionAnalysisManagerModuleProxy as AnalysisPass<Module>>::id();
        let mut mam = ModuleAnalysisManager::new();

        assert!(checked_registered::<ModuleIr>(&mam, proxy).is_err());

        PassBuilder::new().register_analyses(&mut mam, FunctionAnalysisManager::new());
        assert_eq!(checked_registered::<ModuleIr>(&mam, proxy), Ok(proxy));
    }

    #[test]
    fn plugin_surface() {
        let info = unsafe { plugin_library_info(c"ffi".as_ptr(), ptr::null()) };

        assert_eq!(plugin_api_version(), PLUGIN_API_VERSION);
        assert_eq!(info.api_version, plugin_api_version());
        assert_eq!(plugin_registrar() as usize, register_plugin as usize);
    }
}
