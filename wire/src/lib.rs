// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Wire framing for kernel traffic: the [`Endpoint`] address type and the
//! length-prefixed [`FrameDecoder`]/frame-writing primitives used by the
//! socket and process pipelines to exchange kernels with peers.
//!
//! Every multi-byte integer on the wire is big-endian; see [`be`] for the
//! primitive read/write helpers every kernel payload codec builds on.

pub mod be;
pub mod endpoint;
pub mod frame;

pub use endpoint::{Endpoint, EndpointError};
pub use frame::{FRAME_HEADER_LEN, FrameDecoder, FrameError, write_frame};
