// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The process pipeline (C8): shared-memory IPC between the factory and
//! its child applications.
//!
//! [`ring`] is the raw byte-moving primitive — a named, 32-byte-headered
//! circular buffer mapped into two address spaces — and [`pipeline`] is
//! the supervisor that spawns applications, frames kernels onto their
//! rings with [`wire::frame`], and recovers saved kernels if a child dies
//! before answering them.

pub mod pipeline;
pub mod ring;

pub use pipeline::{IpcError, ProcessPipeline, app_key};
pub use ring::{RingError, SharedRing};
