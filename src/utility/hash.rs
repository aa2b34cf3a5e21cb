//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::collections::HashMap;

/// Alias for `std::collections::HashMap<K, V, ahash::RandomState>`.
///
/// Every table in the crate is keyed by small values (analysis identities, unit
/// identities, pass names), which is exactly where `ahash` beats SipHash.
pub type SaHashMap<K, V> = HashMap<K, V, ahash::RandomState>;
