// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! What a kernel's `act`/`react` asks the runtime to do next.

use crate::ExitCode;
use crate::Kernel;

/// A boxed, type-erased kernel, the form in which kernels travel between
/// pipelines, the instance registry, and the type registry's decoder.
pub type KernelBox = Box<dyn Kernel>;

/// The effect of one `act()`/`react()` invocation.
///
/// A single invocation may return any number of [`Action::Upstream`]
/// entries (spawn that many subordinates) followed by at most one
/// terminal action ([`Action::Commit`] or [`Action::Continue`]).
#[derive(Debug)]
pub enum Action {
    /// Spawn `child` as a subordinate of the acting kernel and enqueue it
    /// via the router. The child's `parent` field is set by the runtime,
    /// not by the kernel itself, so a kernel can never misattribute a
    /// child to the wrong parent.
    Upstream(KernelBox),
    /// This kernel is finished: report `result` to its principal (if any)
    /// and remove it from the instance registry.
    Commit(ExitCode),
    /// This kernel is not finished (e.g. still awaiting more subordinate
    /// replies); leave it in the instance registry without committing.
    Continue,
}
