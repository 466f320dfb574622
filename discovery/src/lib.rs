// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! The discovery engine (C10): hierarchical-distance peer ranking
//! ([`address`]), the negotiator and secret-agent kernel types that
//! implement the try-next-peer protocol (§4.10), and [`engine::DiscoveryEngine`],
//! the object the binary crate drives at startup and on principal loss.

pub mod address;
pub mod engine;
pub mod negotiator;
pub mod secret_agent;

pub use engine::DiscoveryEngine;
