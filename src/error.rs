//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Error types shared by the host model and the bridge.

use crate::host::AnalysisId;
use thiserror::Error;

/// Failures when registering foreign passes and analyses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A pass with the same name was already registered for the same kind of IR.
    #[error("{unit} pass `{name}` is already registered")]
    DuplicatePass {
        /// `"module"` or `"function"`.
        unit: &'static str,
        /// The name that was registered twice.
        name: String,
    },
    /// An analysis with the same key was already registered for the same kind of IR.
    #[error("{unit} analysis with key {key} is already registered")]
    DuplicateAnalysis {
        /// `"module"` or `"function"`.
        unit: &'static str,
        /// The key that was registered twice.
        key: AnalysisId,
    },
    /// A pass name that is empty or not valid UTF-8.
    #[error("pass names must be non-empty UTF-8 strings")]
    InvalidPassName,
    /// An analysis key pointer that was null.
    #[error("analysis keys must not be null")]
    NullAnalysisKey,
    /// A result was requested for an analysis the manager never had registered.
    #[error("{unit} analysis with key {key} is not registered")]
    UnregisteredAnalysis {
        /// `"module"` or `"function"`.
        unit: &'static str,
        /// The key that was looked up.
        key: AnalysisId,
    },
}

/// Failures when parsing a textual pass pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A pipeline element without a name, at the given byte offset.
    #[error("expected a pass name at offset {0}")]
    EmptyName(usize),
    /// A missing or stray parenthesis, at the given byte offset.
    #[error("unbalanced parentheses at offset {0}")]
    UnbalancedParens(usize),
    /// A name that no registered parsing callback recognized.
    #[error("unknown pass name `{0}`")]
    UnknownPass(String),
}

/// Failures when loading a plugin into a [`crate::host::PassBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The plugin was built against a different plugin interface.
    #[error("plugin api version mismatch: expected {expected}, found {found}")]
    IncompatibleApiVersion {
        /// The version the host understands.
        expected: u32,
        /// The version the plugin declared.
        found: u32,
    },
}
