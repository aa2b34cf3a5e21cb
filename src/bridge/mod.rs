//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The bridge between foreign passes and analyses and the host framework.
//!
//! The host keys analyses by the identity of a Rust *type*, while foreign code
//! can register any number of analyses at runtime. Every foreign analysis of one
//! kind of IR therefore shares a single adapter type, [`Analysis<IR>`], and the
//! identity the host observes is whatever the per-kind [`KeySlot`] holds. Every
//! operation that makes the host resolve an identity opens a [`KeyScope`] first
//! and keeps it open until the host call returns.

mod analysis;
mod opaque;
mod pass;
mod plugin;
mod registry;
mod relay;
mod unit;

pub use analysis::*;
pub use opaque::*;
pub use pass::*;
pub use plugin::*;
pub use registry::*;
pub use relay::*;
pub use unit::*;
