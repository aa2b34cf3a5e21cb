//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Loads a small demo plugin through the C surface of the bridge, and runs a
//! textual or default pipeline over a sample module.

use bpaf::{construct, Parser};
use passlink::bridge::{self, OptimizationLevel as FfiLevel, PreservationStatus, RawOpaque};
use passlink::cli;
use passlink::ffi;
use passlink::host::{
    AnalysisKey, Function, FunctionAnalysisManager, Module, ModuleAnalysisManager,
    ModulePassManager, OptimizationLevel, PassBuilder, TransformPass, Unit,
};
use std::ffi::c_void;
use std::process;
use std::ptr;

static INSTRUCTION_COUNT: AnalysisKey = AnalysisKey::new();
static LENGTH: AnalysisKey = AnalysisKey::new();

struct Options {
    passes: Option<String>,
    level: OptimizationLevel,
    lto: bool,
}

fn options() -> impl Parser<Options> {
    let passes = cli::passes();
    let level = cli::opt_level();
    let lto = cli::lto();

    construct!(Options { passes, level, lto })
}

unsafe extern "C" fn instruction_count(
    _: *mut c_void,
    unit: *const c_void,
    _: *const c_void,
) -> RawOpaque {
    let module = &*(unit as *const Module);
    let count: usize = module.functions().iter().map(|f| f.body().len()).sum();

    RawOpaque::boxed(count)
}

unsafe extern "C" fn length(
    _: *mut c_void,
    unit: *const c_void,
    _: *const c_void,
) -> RawOpaque {
    RawOpaque::boxed((*(unit as *const Function)).body().len())
}

unsafe extern "C" fn strip_nops(
    _: *mut c_void,
    unit: *mut c_void,
    _: *mut c_void,
) -> PreservationStatus {
    let func = &mut *(unit as *mut Function);
    let before = func.body().len();

    func.body_mut().retain(|inst| inst != "nop");

    if func.body().len() == before {
        PreservationStatus::AllPreserved
    } else {
        PreservationStatus::NonePreserved
    }
}

unsafe extern "C" fn print_stats(
    _: *mut c_void,
    unit: *mut c_void,
    am: *mut c_void,
) -> PreservationStatus {
    let module = unit as *const c_void;
    let total = ffi::get_module_analysis_result(am, &INSTRUCTION_COUNT, module);
    let fam = ffi::get_function_analysis_manager(am, module);

    println!("; {} instructions", *(total as *const usize));

    for func in (*(unit as *const Module)).functions() {
        let unit = func as *const Function as *const c_void;
        let len = ffi::get_function_analysis_result(fam, &LENGTH, unit);

        println!(";   {}: {}", func.name(), *(len as *const usize));
    }

    PreservationStatus::AllPreserved
}

unsafe extern "C" fn hello(
    context: *mut c_void,
    unit: *mut c_void,
    _: *mut c_void,
) -> PreservationStatus {
    let greeting = &*(context as *const String);
    let module = &*(unit as *const Module);

    println!("; {greeting} from `{}`", module.name());

    PreservationStatus::AllPreserved
}

unsafe extern "C" fn add_hello(_: *mut c_void, manager: *mut c_void, level: FfiLevel) {
    let greeting = RawOpaque::boxed(format!("hello at {level:?}"));

    ffi::module_pass_manager_add_pass(manager, greeting.ptr, greeting.deleter, hello);
}

unsafe extern "C" fn add_strip_nops(_: *mut c_void, manager: *mut c_void, level: FfiLevel) {
    if level != FfiLevel::O0 {
        ffi::function_pass_manager_add_pass(manager, ptr::null_mut(), None, strip_nops);
    }
}

fn register_demo_plugin() {
    let strip = "strip-nops";
    let stats = "print-stats";

    unsafe {
        ffi::register_module_analysis(&INSTRUCTION_COUNT, instruction_count);
        ffi::register_function_analysis(&LENGTH, length);
        ffi::register_function_pass(strip.as_ptr(), strip.len(), strip_nops);
        ffi::register_module_pass(stats.as_ptr(), stats.len(), print_stats);
    }
}

fn sample_module() -> Module {
    let mut module = Module::new("sample");

    module.add_function(Function::with_body("main", ["nop", "call helper", "nop", "ret"]));
    module.add_function(Function::with_body("helper", ["load", "nop", "store", "ret"]));

    module
}

fn main() {
    let (opts, base) = cli::tool_with(
        "runs demo foreign passes through the bridge",
        "Usage: playground [-p PIPELINE] [-O LEVEL] [--lto] [-v]",
        options(),
    )
    .run();

    cli::init_logging(base.verbose);
    register_demo_plugin();

    let mut builder = PassBuilder::new();
    let raw = &mut builder as *mut PassBuilder as *mut c_void;

    unsafe {
        bridge::pass_builder_add_pipeline_start_ep_callback(raw, ptr::null_mut(), None, add_hello);
        bridge::pass_builder_add_peephole_ep_callback(raw, ptr::null_mut(), None, add_strip_nops);
        bridge::pass_builder_add_full_lto_early_ep_callback(raw, ptr::null_mut(), None, add_hello);

        if let Err(e) = builder.load_plugin(&bridge::library_info(c"playground", c"0.1.0")) {
            eprintln!("playground: {e}");
            process::exit(1);
        }
    }

    let mut mam = ModuleAnalysisManager::new();
    builder.register_analyses(&mut mam, FunctionAnalysisManager::new());

    let mut mpm = match opts.passes {
        Some(text) => {
            let mut mpm = ModulePassManager::new();

            if let Err(e) = builder.parse_pass_pipeline(&mut mpm, &text) {
                eprintln!("playground: {e}");
                process::exit(1);
            }

            mpm
        }
        None if opts.lto => builder.build_lto_default_pipeline(opts.level),
        None => builder.build_per_module_default_pipeline(opts.level),
    };

    let mut module = sample_module();
    mpm.run(&mut module, &mut mam);

    print!("{module}");
}
