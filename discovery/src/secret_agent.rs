// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The secret agent kernel (§4.10): a silent sentinel sent to a node's
//! chosen principal purely so the connection's recovery machinery has
//! something to bounce back with `endpoint_not_connected` the moment that
//! link is lost. It never acts, never replies on its own, and is recognised
//! only by [`crate::engine::PrincipalMonitor`] reacting to it.

use kernel::{Action, Flags, Kernel, KernelHeader, TypeId, TypeRegistry, TypeRegistryError};
use wire::Endpoint;

/// The wire type-id secret agents travel under.
pub const TYPE_ID: TypeId = TypeId::new(101);

#[derive(Debug)]
pub struct SecretAgent {
    header: KernelHeader,
}

impl SecretAgent {
    #[must_use]
    pub fn new(principal: Endpoint) -> Self {
        let mut header = KernelHeader::new(TYPE_ID);
        header.flags = Flags::MOVES_UPSTREAM | Flags::CARRIES_PARENT | Flags::SAVE_UPSTREAM_KERNELS;
        header.to = Some(principal);
        Self { header }
    }
}

impl Kernel for SecretAgent {
    fn header(&self) -> &KernelHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut KernelHeader {
        &mut self.header
    }

    fn act(&mut self) -> Vec<Action> {
        // Sits resident on the principal forever; its only purpose is to
        // occupy a connection's upstream-saved slot.
        vec![Action::Continue]
    }

    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

/// Register the (trivial, stateless) decoder so a secret agent received
/// from a subordinate can be reconstructed on the principal side.
pub fn register(types: &mut TypeRegistry) -> Result<(), TypeRegistryError> {
    types.register(TYPE_ID, |_r| {
        Some(Box::new(SecretAgent {
            header: KernelHeader::new(TYPE_ID),
        }) as kernel::KernelBox)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn act_never_commits() {
        let mut agent = SecretAgent::new(Endpoint::new_ipv4(Ipv4Addr::new(10, 0, 0, 1), 9001));
        let actions = agent.act();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Continue));
    }
}
