// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! Hierarchy state (C11): the per-node view of the discovery overlay —
//! at most one `principal` endpoint and a set of `subordinates`.
//!
//! The union of `principal` links across every node in a subnet forms a
//! rooted tree (see `factory-discovery`, which is the only writer of this
//! state). Reads are allowed from any thread — an operator status query, a
//! metrics scrape, the socket pipeline's broadcast fan-out — under a
//! `RwLock`, matching §4.11's "mutated by the negotiator only; read from
//! any thread" rule.

use std::sync::RwLock;

use wire::Endpoint;
use wire::be::{Reader, write_u8};

/// A point-in-time snapshot of one node's place in the hierarchy, cheap to
/// clone and safe to serialize for an operator-visible status query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyView {
    pub principal: Option<Endpoint>,
    pub subordinates: Vec<Endpoint>,
}

impl HierarchyView {
    pub fn write(&self, buf: &mut Vec<u8>) {
        match &self.principal {
            Some(ep) => {
                write_u8(buf, 1);
                ep.write(buf);
            }
            None => write_u8(buf, 0),
        }
        wire::be::write_u32(buf, self.subordinates.len() as u32);
        for ep in &self.subordinates {
            ep.write(buf);
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, wire::EndpointError> {
        let principal = if r.read_u8()? == 1 {
            Some(Endpoint::read(r)?)
        } else {
            None
        };
        let count = r.read_u32()?;
        let mut subordinates = Vec::with_capacity(count as usize);
        for _ in 0..count {
            subordinates.push(Endpoint::read(r)?);
        }
        Ok(Self {
            principal,
            subordinates,
        })
    }
}

/// Thread-safe hierarchy state for one node. Every mutator here is expected
/// to be called only from the discovery engine's single negotiator thread;
/// nothing in this crate enforces that beyond documentation, since the
/// `RwLock` is correct regardless of how many writers there end up being.
#[derive(Debug, Default)]
pub struct Hierarchy {
    view: RwLock<HierarchyView>,
}

impl Hierarchy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt `principal` as this node's upstream peer, replacing whatever
    /// was there before (if any).
    pub fn set_principal(&self, principal: Endpoint) {
        self.write_locked().principal = Some(principal);
    }

    /// Drop this node's principal, e.g. after the secret agent reports
    /// `endpoint_not_connected`.
    pub fn unset_principal(&self) {
        self.write_locked().principal = None;
    }

    #[must_use]
    pub fn principal(&self) -> Option<Endpoint> {
        self.read_locked().principal.clone()
    }

    /// Add `endpoint` as a subordinate, if not already present.
    ///
    /// Returns `false` if `endpoint` was already a subordinate (the
    /// negotiator treats this as "nothing to do", not an error).
    pub fn add_subordinate(&self, endpoint: Endpoint) -> bool {
        let mut guard = self.write_locked();
        if guard.subordinates.contains(&endpoint) {
            return false;
        }
        guard.subordinates.push(endpoint);
        true
    }

    /// Remove `endpoint` from the subordinate set, if present.
    pub fn remove_subordinate(&self, endpoint: &Endpoint) -> bool {
        let mut guard = self.write_locked();
        let before = guard.subordinates.len();
        guard.subordinates.retain(|e| e != endpoint);
        guard.subordinates.len() != before
    }

    #[must_use]
    pub fn has_subordinate(&self, endpoint: &Endpoint) -> bool {
        self.read_locked().subordinates.contains(endpoint)
    }

    #[must_use]
    pub fn subordinate_count(&self) -> usize {
        self.read_locked().subordinates.len()
    }

    /// A consistent, independent snapshot of principal + subordinates, for
    /// status queries or the weighted-round-robin weight calculation.
    #[must_use]
    pub fn snapshot(&self) -> HierarchyView {
        self.read_locked().clone()
    }

    fn read_locked(&self) -> std::sync::RwLockReadGuard<'_, HierarchyView> {
        self.view
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_locked(&self) -> std::sync::RwLockWriteGuard<'_, HierarchyView> {
        self.view
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
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
    fn starts_rootless_and_childless() {
        let h = Hierarchy::new();
        assert_eq!(h.principal(), None);
        assert_eq!(h.subordinate_count(), 0);
    }

    #[test]
    fn set_then_unset_principal() {
        let h = Hierarchy::new();
        h.set_principal(ep(1));
        assert_eq!(h.principal(), Some(ep(1)));
        h.unset_principal();
        assert_eq!(h.principal(), None);
    }

    #[test]
    fn subordinates_are_a_set_not_a_multiset() {
        let h = Hierarchy::new();
        assert!(h.add_subordinate(ep(2)));
        assert!(!h.add_subordinate(ep(2)));
        assert_eq!(h.subordinate_count(), 1);
        assert!(h.remove_subordinate(&ep(2)));
        assert!(!h.remove_subordinate(&ep(2)));
        assert_eq!(h.subordinate_count(), 0);
    }

    #[test]
    fn view_round_trips() {
        let h = Hierarchy::new();
        h.set_principal(ep(1));
        h.add_subordinate(ep(2));
        h.add_subordinate(ep(3));

        let mut buf = Vec::new();
        h.snapshot().write(&mut buf);
        let mut r = Reader::new(&buf);
        let back = HierarchyView::read(&mut r).unwrap();
        assert_eq!(back, h.snapshot());
    }
}
