// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The weighted round-robin iterator (§4.7) a `moves_upstream` kernel with
//! no explicit `to` is handed to: advance through each known peer `weight`
//! times before moving to the next, wrapping back to the first peer once
//! the last is exhausted.

use wire::Endpoint;

struct Target {
    endpoint: Endpoint,
    weight: u32,
}

/// Iterator state over a set of weighted peers, stable across additions and
/// removals: adding a peer never disturbs the current position, and
/// removing the peer the cursor currently points at simply advances the
/// cursor past it rather than panicking or resetting to the start.
#[derive(Default)]
pub struct RoundRobin {
    targets: Vec<Target>,
    /// Index into `targets` of the peer currently being served.
    cursor: usize,
    /// How many more times the peer at `cursor` will be handed out before
    /// advancing.
    remaining: u32,
}

impl RoundRobin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `endpoint` with `weight` (at least 1). If already present, its
    /// weight is updated in place.
    pub fn upsert(&mut self, endpoint: Endpoint, weight: u32) {
        let weight = weight.max(1);
        if let Some(t) = self.targets.iter_mut().find(|t| t.endpoint == endpoint) {
            t.weight = weight;
            return;
        }
        self.targets.push(Target { endpoint, weight });
    }

    /// Remove `endpoint`, if present. If the cursor pointed at it, the
    /// cursor advances to the next target (wrapping if needed) rather than
    /// being left dangling on a now-invalid index.
    pub fn remove(&mut self, endpoint: &Endpoint) {
        let Some(pos) = self.targets.iter().position(|t| &t.endpoint == endpoint) else {
            return;
        };
        self.targets.remove(pos);
        if self.targets.is_empty() {
            self.cursor = 0;
            self.remaining = 0;
            return;
        }
        if pos < self.cursor {
            // A target before the cursor shifted everything after it down
            // by one; follow along so the cursor still names the same peer.
            self.cursor -= 1;
        } else if pos == self.cursor {
            // The peer under the cursor is gone; land on whichever peer
            // shifted into its slot (or wrap to the first).
            self.cursor %= self.targets.len();
            self.remaining = 0;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Yield the next peer, advancing through each target `weight` times
    /// before moving on. Returns `None` when there are no targets at all —
    /// the caller (the socket pipeline) treats this as "past the end",
    /// falling back to local execution when `use_localhost` is set.
    pub fn next(&mut self) -> Option<Endpoint> {
        if self.targets.is_empty() {
            return None;
        }
        if self.cursor >= self.targets.len() {
            self.cursor = 0;
        }
        if self.remaining == 0 {
            self.remaining = self.targets[self.cursor].weight;
        }
        let endpoint = self.targets[self.cursor].endpoint.clone();
        self.remaining -= 1;
        if self.remaining == 0 {
            self.cursor = (self.cursor + 1) % self.targets.len();
        }
        Some(endpoint)
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
    fn empty_yields_none() {
        let mut rr = RoundRobin::new();
        assert_eq!(rr.next(), None);
    }

    #[test]
    fn single_target_repeats() {
        let mut rr = RoundRobin::new();
        rr.upsert(ep(1), 1);
        assert_eq!(rr.next(), Some(ep(1)));
        assert_eq!(rr.next(), Some(ep(1)));
    }

    #[test]
    fn weight_controls_how_many_turns_before_advancing() {
        let mut rr = RoundRobin::new();
        rr.upsert(ep(1), 2);
        rr.upsert(ep(2), 1);
        let got: Vec<_> = (0..6).map(|_| rr.next().unwrap()).collect();
        assert_eq!(got, vec![ep(1), ep(1), ep(2), ep(1), ep(1), ep(2)]);
    }

    #[test]
    fn adding_a_peer_does_not_disturb_the_current_position() {
        let mut rr = RoundRobin::new();
        rr.upsert(ep(1), 1);
        assert_eq!(rr.next(), Some(ep(1)));
        rr.upsert(ep(2), 1);
        assert_eq!(rr.next(), Some(ep(2)));
    }

    #[test]
    fn removing_the_current_target_advances_past_it() {
        let mut rr = RoundRobin::new();
        rr.upsert(ep(1), 1);
        rr.upsert(ep(2), 1);
        rr.upsert(ep(3), 1);
        let _ = rr.next(); // ep(1), cursor now at ep(2)
        rr.remove(&ep(2));
        assert_eq!(rr.next(), Some(ep(3)));
    }

    #[test]
    fn removing_all_targets_makes_it_empty_again() {
        let mut rr = RoundRobin::new();
        rr.upsert(ep(1), 1);
        rr.remove(&ep(1));
        assert!(rr.is_empty());
        assert_eq!(rr.next(), None);
    }
}
