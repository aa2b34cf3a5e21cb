//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Contains utility code for the driver tools located in the `tools/`
//! subdirectory, so that they all take their options the same way.

use crate::host::OptimizationLevel;
use bpaf::{construct, OptionParser, Parser};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Basic options that every tool takes in.
pub struct BaseOptions {
    /// Whether or not to run the logging in verbose mode.
    pub verbose: bool,
}

/// Returns a [`OptionParser`] preconfigured with the standard options and
/// additional tool-specific options.
pub fn tool_with<T>(
    description: &'static str,
    usage: &'static str,
    additional: impl Parser<T> + 'static,
) -> OptionParser<(T, BaseOptions)> {
    let res = construct!(additional, default());

    res.to_options()
        .descr(description)
        .version(VERSION)
        .usage(usage)
}

/// Gets the baseline default options that every tool needs.
pub fn default() -> impl Parser<BaseOptions> {
    let verbose = verbose();

    construct!(BaseOptions { verbose })
}

/// Checks for the presence of `-v` or `--verbose`
pub fn verbose() -> impl Parser<bool> {
    bpaf::long("verbose")
        .short('v')
        .help("enable verbose output")
        .flag(true, false)
}

/// Gets a textual pipeline to run, e.g. `hello,function(strip-nops)`.
pub fn passes() -> impl Parser<Option<String>> {
    bpaf::long("passes")
        .short('p')
        .help("a textual pass pipeline to run over the input")
        .argument::<String>("PIPELINE")
        .optional()
}

/// Gets the optimization level for default pipelines, `-O2` if none was given.
pub fn opt_level() -> impl Parser<OptimizationLevel> {
    bpaf::short('O')
        .help("the optimization level, one of '0', '1', '2', '3', 's', 'z'")
        .argument::<String>("LEVEL")
        .guard(
            |level| matches!(level.as_str(), "0" | "1" | "2" | "3" | "s" | "z"),
            "level must be one of '0', '1', '2', '3', 's', 'z'",
        )
        .map(|level| match level.as_str() {
            "0" => OptimizationLevel::O0,
            "1" => OptimizationLevel::O1,
            "2" => OptimizationLevel::O2,
            "3" => OptimizationLevel::O3,
            "s" => OptimizationLevel::Os,
            "z" => OptimizationLevel::Oz,
            _ => unreachable!(),
        })
        .optional()
        .map(|opt| opt.unwrap_or(OptimizationLevel::O2))
}

/// Whether to build the link-time pipeline instead of the per-module one.
pub fn lto() -> impl Parser<bool> {
    bpaf::long("lto")
        .help("build the full link-time optimization pipeline")
        .flag(true, false)
}

/// Installs the logger. `RUST_LOG` wins over `verbose` if it is set.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "trace" } else { "warn" };

    let env = env_logger::Env::default().default_filter_or(default);

    env_logger::Builder::from_env(env).init();
}
