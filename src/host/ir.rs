//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identifies a single unit of IR for the lifetime of the process.
///
/// Analysis results are cached per `(UnitId, AnalysisId)` pair, so two units
/// never share cached results even if they happen to have the same name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

impl UnitId {
    fn fresh() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);

        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Something that passes and analyses can be run over.
pub trait Unit: 'static {
    /// The identity of this unit, stable for as long as the unit lives.
    fn unit_id(&self) -> UnitId;

    /// A human-readable name, only used for diagnostics.
    fn name(&self) -> &str;
}

/// A single procedure. The body is a flat list of instruction mnemonics,
/// which is all the structure the pass framework needs to observe.
#[derive(Debug)]
pub struct Function {
    id: UnitId,
    name: String,
    body: Vec<String>,
}

impl Function {
    /// Creates a function with an empty body.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UnitId::fresh(),
            name: name.into(),
            body: Vec::new(),
        }
    }

    /// Creates a function with the given instructions.
    pub fn with_body<I, S>(name: impl Into<String>, body: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut func = Self::new(name);
        func.body.extend(body.into_iter().map(Into::into));

        func
    }

    /// The instructions of the function, in order.
    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// Mutable access to the instructions of the function.
    pub fn body_mut(&mut self) -> &mut Vec<String> {
        &mut self.body
    }
}

impl Unit for Function {
    fn unit_id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A whole compilation unit, made up of functions.
#[derive(Debug)]
pub struct Module {
    id: UnitId,
    name: String,
    functions: Vec<Function>,
}

impl Module {
    /// Creates an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UnitId::fresh(),
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Appends a function to the module.
    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    /// Every function in the module, in definition order.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Mutable access to every function in the module.
    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    /// Finds a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }
}

impl Unit for Module {
    fn unit_id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;

        for func in self.functions.iter() {
            writeln!(f, "\nfn {} {{", func.name)?;

            for inst in func.body.iter() {
                writeln!(f, "  {inst}")?;
            }

            writeln!(f, "}}")?;
        }

        Ok(())
    }
}
