//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

#![deny(
    unreachable_pub,
    missing_docs,
    missing_abi,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]

//! # passlink
//!
//! Lets code that lives outside of the host compiler register passes and
//! analyses with the host's pass manager, and hook the extension points the host
//! fires while it assembles optimization pipelines.
//!
//! - [`host`] models the host framework the plugin is loaded into.
//! - [`bridge`] adapts foreign entrypoints and contexts to the host's contracts.
//! - [`ffi`] is the C ABI foreign code calls into.

pub mod bridge;
pub mod error;
pub mod ffi;
pub mod host;
pub mod utility;

#[cfg(feature = "dev-tools")]
pub mod cli;

pub use bridge::{
    Analysis, FunctionIr, IrUnit, ModuleIr, OpaqueValue, OptimizationLevel, Pass,
    PreservationStatus, RawOpaque,
};
pub use error::{BridgeError, PipelineError, PluginError};
