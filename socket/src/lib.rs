// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! The socket pipeline (C7): TCP connections to other nodes, framed with
//! [`wire::frame`], routed per §4.7's weighted round-robin / broadcast /
//! explicit-`to` rules, with the recovery algorithm that turns a dropped
//! connection into synthesized `endpoint_not_connected` replies.

mod connection;
mod reactor;
mod round_robin;

pub use connection::{Connection, UpstreamSaved};
pub use reactor::{SocketError, SocketPipeline};
pub use round_robin::RoundRobin;
