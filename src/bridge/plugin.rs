//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::bridge::{resolve_pass, Analysis, FunctionIr, IrUnit, ModuleIr};
use crate::host::{PassBuilder, PassPluginLibraryInfo, PLUGIN_API_VERSION};
use log::debug;
use std::ffi::{c_void, CStr};

/// The plugin interface version the bridge was built against.
pub fn api_version() -> u32 {
    PLUGIN_API_VERSION
}

/// Wires the registry for `IR` into `builder`: registered passes become available
/// by name in textual pipelines, and registered analyses are added to every
/// analysis manager the builder sets up.
pub fn install<IR: IrUnit>(builder: &mut PassBuilder) {
    let registry = IR::registry();

    debug!(
        "installing {} passes {:?} and {} analyses",
        IR::NAME,
        registry.pass_names(),
        registry.analysis_count()
    );

    IR::add_pipeline_parsing_callback(builder, |name, manager, _| {
        resolve_pass::<IR>(name, manager)
    });
    IR::add_analysis_registration_callback(builder, Analysis::<IR>::register_known);
}

/// The registrar the host calls when it loads the plugin.
///
/// # Safety
/// `builder` must point at a live [`PassBuilder`].
pub unsafe extern "C" fn register_plugin(builder: *mut c_void) {
    let builder = &mut *(builder as *mut PassBuilder);

    install::<ModuleIr>(builder);
    install::<FunctionIr>(builder);
}

/// Describes this plugin to the host.
pub fn library_info(name: &'static CStr, version: &'static CStr) -> PassPluginLibraryInfo {
    PassPluginLibraryInfo {
        api_version: api_version(),
        plugin_name: name.as_ptr(),
        plugin_version: version.as_ptr(),
        registrar: register_plugin,
    }
}
