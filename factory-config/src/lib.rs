// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration (C13): resolves a [`NodeConfig`] from CLI flags
//! (`clap::Parser`, grounded on `dataplane/src/args.rs`'s `CmdArgs`) merged
//! with the environment variables of §6, CLI taking precedence over env
//! var over built-in default. Resolution validates the result — an
//! unresolvable interface or malformed `--app` spec is reported as
//! [`ConfigError`] before any pipeline starts.

mod cli;
mod error;
mod interface;

pub use cli::{AppSpec, CliArgs};
pub use error::ConfigError;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

/// Default hierarchy-convergence wait, overridden by `WAIT_TIME`.
const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(5);

/// The fully resolved, validated configuration a factory node starts
/// with.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub port: u16,
    pub workers: usize,
    pub apps: Vec<AppSpec>,
    pub use_localhost: bool,
    /// Seed for the kernel-id counter; `None` means derive it from the
    /// interface's `interface_range` the usual way.
    pub start_id: Option<u64>,
    /// Expected peer count, consulted by synthetic tests that need to know
    /// when a hierarchy has fully converged.
    pub num_peers: Option<u32>,
    /// Non-zero when this process should act as a child application
    /// rather than a factory node (`APP_ID`).
    pub app_id: Option<u64>,
    pub wait_time: Duration,
}

impl NodeConfig {
    /// Parse `std::env::args()` and the process environment and produce a
    /// validated [`NodeConfig`], or the [`ConfigError`] that made
    /// resolution fail.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse(), &EnvReader)
    }

    /// Merge `cli` with the environment variables read through `env`
    /// (indirected so tests can supply a fake without mutating the real
    /// process environment). CLI flags win; env vars are consulted when
    /// no CLI flag applies, which today is every one of §6's four
    /// variables (none of them has a CLI equivalent).
    pub fn resolve(cli: CliArgs, env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let (address, netmask) = interface::resolve(&cli.interface)?;

        let start_id = parse_opt_env(env, "START_ID")?;
        let num_peers = parse_opt_env(env, "NUM_PEERS")?;
        let app_id = parse_opt_env(env, "APP_ID")?;
        let wait_time = env
            .get("WAIT_TIME")
            .map(|raw| parse_u64(&raw).map(Duration::from_millis))
            .transpose()
            .map_err(|_| ConfigError::InvalidEnvVar {
                name: "WAIT_TIME",
                value: env.get("WAIT_TIME").unwrap_or_default(),
                expected: "milliseconds as u64",
            })?
            .unwrap_or(DEFAULT_WAIT_TIME);

        let config = NodeConfig {
            address,
            netmask,
            port: cli.port,
            workers: cli.workers,
            apps: cli.app,
            use_localhost: cli.use_localhost,
            start_id,
            num_peers,
            app_id: app_id.filter(|&id| id != 0),
            wait_time,
        };
        info!(
            address = %config.address,
            netmask = %config.netmask,
            port = config.port,
            workers = config.workers,
            apps = config.apps.len(),
            "resolved node configuration"
        );
        Ok(config)
    }

    /// Application-registration entries as `(name, path)` pairs, the shape
    /// `factory_ipc::ProcessPipeline::start` expects.
    #[must_use]
    pub fn app_paths(&self) -> Vec<(String, PathBuf)> {
        self.apps.iter().map(|a| (a.name.clone(), a.path.clone())).collect()
    }
}

/// Indirection over "read an environment variable", so configuration
/// resolution is unit-testable without mutating the real process
/// environment (which is process-global and not safe to mutate from
/// parallel tests).
pub trait EnvSource {
    fn get(&self, name: &str) -> Option<String>;
}

/// The real environment, used by [`NodeConfig::from_env`].
struct EnvReader;

impl EnvSource for EnvReader {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

fn parse_u64(raw: &str) -> Result<u64, ()> {
    raw.parse().map_err(|_| ())
}

fn parse_opt_env(env: &dyn EnvSource, name: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = env.get(name) else {
        return Ok(None);
    };
    parse_u64(&raw).map(Some).map_err(|()| ConfigError::InvalidEnvVar {
        name,
        value: raw,
        expected: "u64",
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    struct FakeEnv(HashMap<&'static str, &'static str>);
    impl EnvSource for FakeEnv {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).map(|s| s.to_string())
        }
    }

    fn cli(interface: &str) -> CliArgs {
        CliArgs {
            interface: interface.to_string(),
            port: 9001,
            workers: 4,
            app: Vec::new(),
            use_localhost: false,
        }
    }

    #[test]
    fn resolves_literal_interface_with_no_env_vars_set() {
        let config = NodeConfig::resolve(cli("10.0.0.1/24"), &FakeEnv(HashMap::new())).unwrap();
        assert_eq!(config.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(config.start_id, None);
        assert_eq!(config.wait_time, DEFAULT_WAIT_TIME);
    }

    #[test]
    fn env_vars_are_merged_in() {
        let env = FakeEnv(HashMap::from([
            ("START_ID", "100"),
            ("NUM_PEERS", "3"),
            ("APP_ID", "0"),
            ("WAIT_TIME", "250"),
        ]));
        let config = NodeConfig::resolve(cli("10.0.0.1/24"), &env).unwrap();
        assert_eq!(config.start_id, Some(100));
        assert_eq!(config.num_peers, Some(3));
        // APP_ID of literal "0" means "not a child application".
        assert_eq!(config.app_id, None);
        assert_eq!(config.wait_time, Duration::from_millis(250));
    }

    #[test]
    fn nonzero_app_id_marks_this_process_as_a_child_application() {
        let env = FakeEnv(HashMap::from([("APP_ID", "777")]));
        let config = NodeConfig::resolve(cli("10.0.0.1/24"), &env).unwrap();
        assert_eq!(config.app_id, Some(777));
    }

    #[test]
    fn malformed_env_var_is_a_config_error() {
        let env = FakeEnv(HashMap::from([("START_ID", "not-a-number")]));
        let err = NodeConfig::resolve(cli("10.0.0.1/24"), &env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { name: "START_ID", .. }));
    }

    #[test]
    fn invalid_interface_literal_is_rejected() {
        let err = NodeConfig::resolve(cli("not-an-interface"), &FakeEnv(HashMap::new())).unwrap_err();
        assert!(matches!(err, ConfigError::NoIpv4Address(_)));
    }
}
