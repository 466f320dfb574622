// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [`ConfigError`]: every way resolving a [`crate::NodeConfig`] can fail.
//! Per §4.13, any of these is a startup error — logged and causing a
//! non-zero exit before any pipeline starts, never reaching the terminate
//! handler.

/// Errors resolving the factory's configuration from CLI flags and
/// environment variables.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed --app spec {0:?}, expected name=path")]
    InvalidAppSpec(String),
    #[error("{0:?} is neither a known interface name nor an ADDR/PREFIX literal")]
    UnresolvableInterface(String),
    #[error("interface {0:?} has no IPv4 address")]
    NoIpv4Address(String),
    #[error("prefix length {0} is not a valid IPv4 prefix (0-32)")]
    InvalidPrefixLength(u8),
    #[error("environment variable {name} could not be parsed as {expected}: {value:?}")]
    InvalidEnvVar {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Nix(#[from] nix::Error),
}
