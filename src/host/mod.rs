//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The host pass-management framework that plugins are loaded into.
//!
//! This models the pieces of a compiler's new-style pass manager that a plugin
//! can observe: units of IR ([`Module`] and [`Function`]), lazily cached
//! analyses keyed by the address of a static [`AnalysisKey`], transform passes
//! that report what they preserved, and a [`PassBuilder`] with extension points
//! and textual pipeline parsing.

mod analysis;
mod builder;
mod ir;
mod plugin;
mod transform;

pub use analysis::*;
pub use builder::*;
pub use ir::*;
pub use plugin::*;
pub use transform::*;
