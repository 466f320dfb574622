// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The negotiator kernel (§4.10): the only kernel type permitted to mutate
//! [`Hierarchy`] state, travelling to the candidate it proposes adopting
//! and carrying enough state in its payload to be acted on there without
//! any side channel.

use std::sync::Arc;

use hierarchy::Hierarchy;
use kernel::{Action, ExitCode, Kernel, KernelHeader, TypeId, TypeRegistry, TypeRegistryError};
use wire::Endpoint;
use wire::be::{Reader, write_u8};

/// The wire type-id negotiators travel under. Fixed so peers running
/// different builds of this crate still agree on it.
pub const TYPE_ID: TypeId = TypeId::new(100);

/// A proposal: "treat `new_principal` as my principal" (when `new_principal`
/// names the node this kernel lands on), or "I am no longer your
/// subordinate" (when `old_principal` names the node this kernel lands on).
/// A node seeking a principal only ever constructs the former; the latter
/// exists for an explicit graceful-leave notification and is accepted by
/// this type but not emitted by [`crate::engine::DiscoveryEngine`]'s
/// try-next-peer loop.
#[derive(Debug)]
pub struct Negotiator {
    header: KernelHeader,
    old_principal: Option<Endpoint>,
    new_principal: Endpoint,
}

impl Negotiator {
    #[must_use]
    pub fn propose(new_principal: Endpoint, old_principal: Option<Endpoint>) -> Self {
        let mut header = KernelHeader::new(TYPE_ID);
        header.flags = kernel::Flags::MOVES_UPSTREAM
            | kernel::Flags::CARRIES_PARENT
            | kernel::Flags::SAVE_UPSTREAM_KERNELS;
        header.to = Some(new_principal.clone());
        Self {
            header,
            old_principal,
            new_principal,
        }
    }

    fn write_body(&self, buf: &mut Vec<u8>) {
        match &self.old_principal {
            Some(ep) => {
                write_u8(buf, 1);
                ep.write(buf);
            }
            None => write_u8(buf, 0),
        }
        self.new_principal.write(buf);
    }

    fn read_body(r: &mut Reader<'_>) -> Result<(Option<Endpoint>, Endpoint), wire::EndpointError> {
        let old_principal = if r.read_u8()? == 1 {
            Some(Endpoint::read(r)?)
        } else {
            None
        };
        let new_principal = Endpoint::read(r)?;
        Ok((old_principal, new_principal))
    }
}

impl Kernel for Negotiator {
    fn header(&self) -> &KernelHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut KernelHeader {
        &mut self.header
    }

    // Uses the trait default (`Commit(Success)`): this struct is the
    // requester's outbound form and is dispatched straight at the router,
    // never scheduled for local `act()`. The accept/reject logic that
    // matters lives on `BoundNegotiator`, built by the decoder installed
    // in `register`, which does have node-local state to act against.

    fn write_payload(&self, buf: &mut Vec<u8>) {
        self.write_body(buf);
    }
}

/// Runs a decoded negotiator's accept/reject logic against this node's own
/// `hierarchy` and `self_endpoint`. Kept free-standing (rather than on
/// `Negotiator::act`) because `act()` has no way to reach node-local state
/// that was not already on the struct when it travelled over the wire.
fn accept(
    hierarchy: &Hierarchy,
    self_endpoint: &Endpoint,
    sender: Option<&Endpoint>,
    old_principal: &Option<Endpoint>,
    new_principal: &Endpoint,
) -> ExitCode {
    if new_principal == self_endpoint {
        // Sender wants us as its principal. Reject only the degenerate
        // case where the sender is already our own principal and it
        // discloses no prior principal of its own — accepting would form
        // a 2-cycle (it adopts us while we are already adopting it).
        if let (Some(sender), Some(our_principal)) = (sender, hierarchy.principal()) {
            if *sender == our_principal && old_principal.is_none() {
                return ExitCode::Error;
            }
        }
        if let Some(sender) = sender {
            hierarchy.add_subordinate(sender.clone());
        }
        ExitCode::Success
    } else if old_principal.as_ref() == Some(self_endpoint) {
        // Sender is telling its former principal (us) that it has left.
        if let Some(sender) = sender {
            hierarchy.remove_subordinate(sender);
        }
        ExitCode::Success
    } else {
        // Addressed elsewhere; nothing for this node to do.
        ExitCode::Success
    }
}

/// Register the negotiator's decoder, binding this node's `hierarchy` and
/// `self_endpoint` so every negotiator decoded off the wire runs its
/// accept/reject logic against local state.
pub fn register(
    types: &mut TypeRegistry,
    hierarchy: Arc<Hierarchy>,
    self_endpoint: Endpoint,
) -> Result<(), TypeRegistryError> {
    types.register(TYPE_ID, move |r| {
        let (old_principal, new_principal) = Negotiator::read_body(r).ok()?;
        let hierarchy = Arc::clone(&hierarchy);
        let self_endpoint = self_endpoint.clone();
        Some(Box::new(BoundNegotiator {
            header: KernelHeader::new(TYPE_ID),
            old_principal,
            new_principal,
            hierarchy,
            self_endpoint,
        }) as kernel::KernelBox)
    })
}

/// The decoded form of a negotiator, carrying the node-local state its
/// `act()` needs. Never constructed by the requesting side — only
/// [`register`]'s closure produces one.
#[derive(Debug)]
struct BoundNegotiator {
    header: KernelHeader,
    old_principal: Option<Endpoint>,
    new_principal: Endpoint,
    hierarchy: Arc<Hierarchy>,
    self_endpoint: Endpoint,
}

impl Kernel for BoundNegotiator {
    fn header(&self) -> &KernelHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut KernelHeader {
        &mut self.header
    }

    fn act(&mut self) -> Vec<Action> {
        let sender = self.header.from.clone();
        let result = accept(
            &self.hierarchy,
            &self.self_endpoint,
            sender.as_ref(),
            &self.old_principal,
            &self.new_principal,
        );
        vec![Action::Commit(result)]
    }

    fn write_payload(&self, buf: &mut Vec<u8>) {
        let mut old_new = Negotiator {
            header: KernelHeader::new(TYPE_ID),
            old_principal: self.old_principal.clone(),
            new_principal: self.new_principal.clone(),
        };
        old_new.write_body(buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(last: u8) -> Endpoint {
        Endpoint::new_ipv4(Ipv4Addr::new(10, 0, 0, last), 9001)
    }

    #[test]
    fn accepts_a_fresh_subordinate() {
        let h = Hierarchy::new();
        let result = accept(&h, &ep(1), Some(&ep(2)), &None, &ep(1));
        assert_eq!(result, ExitCode::Success);
        assert!(h.has_subordinate(&ep(2)));
    }

    #[test]
    fn rejects_a_two_cycle() {
        let h = Hierarchy::new();
        h.set_principal(ep(2));
        let result = accept(&h, &ep(1), Some(&ep(2)), &None, &ep(1));
        assert_eq!(result, ExitCode::Error);
        assert!(!h.has_subordinate(&ep(2)));
    }

    #[test]
    fn accepts_a_cycle_when_sender_discloses_an_old_principal() {
        let h = Hierarchy::new();
        h.set_principal(ep(2));
        let result = accept(&h, &ep(1), Some(&ep(2)), &Some(ep(3)), &ep(1));
        assert_eq!(result, ExitCode::Success);
        assert!(h.has_subordinate(&ep(2)));
    }

    #[test]
    fn departure_notice_drops_the_subordinate() {
        let h = Hierarchy::new();
        h.add_subordinate(ep(2));
        let result = accept(&h, &ep(1), Some(&ep(2)), &Some(ep(1)), &ep(9));
        assert_eq!(result, ExitCode::Success);
        assert!(!h.has_subordinate(&ep(2)));
    }

    #[test]
    fn body_round_trips() {
        let n = Negotiator::propose(ep(1), Some(ep(2)));
        let mut buf = Vec::new();
        n.write_body(&mut buf);
        let mut r = Reader::new(&buf);
        let (old, new) = Negotiator::read_body(&mut r).unwrap();
        assert_eq!(old, Some(ep(2)));
        assert_eq!(new, ep(1));
    }
}
