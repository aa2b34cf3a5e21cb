//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::error::PluginError;
use crate::host::PassBuilder;
use log::debug;
use std::ffi::{c_char, c_void, CStr};

/// The plugin interface version this host understands. Plugins built against
/// any other version are refused.
pub const PLUGIN_API_VERSION: u32 = 1;

/// The entry point a plugin exposes. It receives the [`PassBuilder`] that is
/// being configured, as an opaque pointer.
pub type PluginRegistrar = unsafe extern "C" fn(builder: *mut c_void);

/// Describes a plugin library to the host.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PassPluginLibraryInfo {
    /// The interface version the plugin was built against.
    pub api_version: u32,
    /// A NUL-terminated plugin name, only used for diagnostics.
    pub plugin_name: *const c_char,
    /// A NUL-terminated plugin version, only used for diagnostics.
    pub plugin_version: *const c_char,
    /// Called once with the builder when the plugin is loaded.
    pub registrar: PluginRegistrar,
}

impl PassPluginLibraryInfo {
    /// The plugin's name, or `"<unnamed>"` if it didn't provide one.
    ///
    /// # Safety
    /// `plugin_name` must be null or point at a NUL-terminated string that
    /// outlives `self`.
    pub unsafe fn name(&self) -> &str {
        describe(self.plugin_name)
    }

    /// The plugin's version, or `"<unnamed>"` if it didn't provide one.
    ///
    /// # Safety
    /// Same as [`Self::name`], but for `plugin_version`.
    pub unsafe fn version(&self) -> &str {
        describe(self.plugin_version)
    }
}

unsafe fn describe<'a>(s: *const c_char) -> &'a str {
    if s.is_null() {
        return "<unnamed>";
    }

    CStr::from_ptr(s).to_str().unwrap_or("<invalid utf-8>")
}

impl PassBuilder {
    /// Loads a plugin described by `info`, letting it register callbacks on `self`.
    ///
    /// # Safety
    /// The strings in `info` must be valid (see [`PassPluginLibraryInfo::name`]), and
    /// `info.registrar` must be sound to call with a pointer to a live `PassBuilder`.
    pub unsafe fn load_plugin(&mut self, info: &PassPluginLibraryInfo) -> Result<(), PluginError> {
        if info.api_version != PLUGIN_API_VERSION {
            return Err(PluginError::IncompatibleApiVersion {
                expected: PLUGIN_API_VERSION,
                found: info.api_version,
            });
        }

        debug!(
            "loading plugin `{}` version `{}`",
            info.name(),
            info.version()
        );

        (info.registrar)(self as *mut PassBuilder as *mut c_void);

        Ok(())
    }
}
