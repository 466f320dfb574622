// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The `clap::Parser` CLI surface (§6 "CLI surface"), grounded on
//! `dataplane/src/args.rs`'s `CmdArgs`: one long flag per configurable,
//! `--app` repeatable for registering process-pipeline applications.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::ConfigError;

/// One `name=path` pair registering a process-pipeline application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    pub name: String,
    pub path: PathBuf,
}

impl FromStr for AppSpec {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, path) = input
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidAppSpec(input.to_string()))?;
        if name.is_empty() || path.is_empty() {
            return Err(ConfigError::InvalidAppSpec(input.to_string()));
        }
        Ok(AppSpec {
            name: name.to_string(),
            path: PathBuf::from(path),
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "factory")]
#[command(version)]
#[command(about = "A distributed actor-kernel runtime", long_about = None)]
pub struct CliArgs {
    /// Interface name (e.g. `eth0`) or a literal `ADDR/PREFIX` (e.g.
    /// `10.0.0.1/24`) to bind the socket pipeline to.
    #[arg(long, value_name = "interface-or-addr-prefix")]
    pub interface: String,

    /// TCP port the socket pipeline's server listener binds.
    #[arg(long, default_value_t = 9001)]
    pub port: u16,

    /// Number of CPU-pipeline worker threads.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Register a process-pipeline application as `name=path`; repeatable.
    #[arg(long, value_parser = AppSpec::from_str)]
    pub app: Vec<AppSpec>,

    /// Fall back to local execution when the round-robin has no peer to
    /// send an upstream-bound kernel to, instead of bouncing it.
    #[arg(long, default_value_t = false)]
    pub use_localhost: bool,
}
