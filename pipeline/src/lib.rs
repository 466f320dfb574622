// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # Local scheduling pipelines
//!
//! This crate provides the two pipelines that schedule kernels on the local
//! machine — [`CpuPipeline`] (a fixed worker-thread pool) and
//! [`TimerPipeline`] (a single deadline-ordered thread) — plus [`Router`],
//! the pure classifier that decides which pipeline (local or otherwise) a
//! given kernel belongs on next.
//!
//! Neither pipeline reaches into the others directly. Each is constructed
//! with an `Arc<dyn kernel::Dispatch>`; when a kernel's `act`/`react`
//! produces output that doesn't stay on the pipeline that ran it, the
//! pipeline hands it to that dispatcher, which is expected to consult
//! [`Router::classify`] and forward it on to the right pipeline (CPU,
//! Timer, Socket, or Process). This keeps `factory-pipeline` from needing
//! to depend on the socket or process-pipeline crates.

pub mod cpu;
pub mod router;
pub mod timer;

pub use cpu::{CpuPipeline, PipelineError};
pub use router::{Destination, RouteContext, Router};
pub use timer::TimerPipeline;
