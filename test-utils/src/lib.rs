// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Shared test fixtures for the factory workspace: synthetic kernels and
//! loopback socket helpers, used across crate-local `#[cfg(test)]` modules
//! and the binary crate's integration tests.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use kernel::{ExitCode, Flags, KernelId, TypeId};
use wire::Endpoint;

/// Bind an ephemeral TCP listener on loopback and return it along with the
/// endpoint other nodes should dial to reach it.
pub fn loopback_listener() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .expect("binding an ephemeral loopback port never fails in test");
    let port = listener
        .local_addr()
        .expect("a just-bound socket always has a local address")
        .port();
    (listener, Endpoint::new_ipv4(Ipv4Addr::LOCALHOST, port))
}

/// A minimal kernel envelope used by tests that only care about routing and
/// framing, not any particular payload semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeKernel {
    pub id: KernelId,
    pub parent: Option<KernelId>,
    pub flags: Flags,
    pub result: ExitCode,
    pub payload: Vec<u8>,
}

impl ProbeKernel {
    pub const TYPE_ID: TypeId = TypeId::new(1);

    pub fn new(id: KernelId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            parent: None,
            flags: Flags::empty(),
            result: ExitCode::Undefined,
            payload: payload.into(),
        }
    }

    pub fn with_parent(mut self, parent: KernelId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_result(mut self, result: ExitCode) -> Self {
        self.result = result;
        self
    }
}
