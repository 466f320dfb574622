// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The cross-pipeline handoff seam.
//!
//! Every pipeline (CPU, Timer, Socket, Process) produces kernels it cannot
//! itself finish serving — a freshly spawned subordinate that belongs on a
//! different pipeline, a reply that needs to travel back across a
//! connection, a kernel whose deadline just fired. Rather than one
//! pipeline crate depending on all the others, each pipeline is handed a
//! `Arc<dyn Dispatch>` at construction time; the [`crate::Kernel::act`]/
//! `react` contract never needs to know which concrete pipeline it landed
//! on.
//!
//! The root `Factory` (the binary crate's C12) is the one concrete
//! `Dispatch` implementation: it owns every pipeline and applies the
//! router's classification (§4.9) to decide which pipeline's `submit`
//! receives a given kernel.

use crate::action::KernelBox;

/// Hand `kernel` to whichever pipeline the router decides it belongs on.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, kernel: KernelBox);
}

/// A [`Dispatch`] that drops everything handed to it. Useful for unit
/// tests of a single pipeline in isolation.
#[derive(Debug, Default)]
pub struct NullDispatch;

impl Dispatch for NullDispatch {
    fn dispatch(&self, _kernel: KernelBox) {}
}
