// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Hierarchical-distance ranking over a flat subnet (§4.10): turns a list of
//! candidate addresses into the order a node should try them in when
//! looking for a principal.
//!
//! The fanout is fixed at 2, matching the predecessor runtime: address
//! `p = addr & !netmask` places a node at `level = floor(log2(p))` with
//! `index = p - 2^level` siblings at that level. A node prefers candidates
//! at or above its own level, breaking ties by how close their index is to
//! its own index's parent slot.

use std::net::Ipv4Addr;

const FANOUT: u32 = 2;

/// `addr`'s position within its subnet: the host bits only.
#[must_use]
pub fn position(addr: Ipv4Addr, netmask: Ipv4Addr) -> u32 {
    u32::from(addr) & !u32::from(netmask)
}

/// `floor(log2(position))`, with position 0 (the node sitting at the network
/// address itself) pinned to level 0 rather than left undefined — position 0
/// is the tree's root by convention, not a missing value.
#[must_use]
pub fn level(position: u32) -> u32 {
    if position == 0 {
        0
    } else {
        31 - position.leading_zeros()
    }
}

/// A node's offset among its siblings at its own level.
#[must_use]
pub fn index(position: u32, level: u32) -> u32 {
    position - (1 << level)
}

/// `None` encodes the predecessor runtime's "infinite" distance: a
/// candidate strictly closer to the root than `self` can never become
/// `self`'s principal (that would invert the tree), so it sorts last.
/// Candidates at exactly `self`'s level count as distance 1 rather than 0,
/// since a same-level peer is never truly "free" to adopt.
fn level_difference(self_level: u32, candidate_level: u32) -> Option<u32> {
    if self_level > candidate_level {
        None
    } else if candidate_level == self_level {
        Some(1)
    } else {
        Some(candidate_level - self_level)
    }
}

fn index_difference(candidate_index: u32, self_index: u32) -> u32 {
    candidate_index.abs_diff(self_index / FANOUT)
}

/// Rank `candidates` by ascending hierarchical distance from `self_addr`,
/// nearest first. `self_addr` is dropped from the output if present.
#[must_use]
pub fn rank_candidates(
    self_addr: Ipv4Addr,
    netmask: Ipv4Addr,
    candidates: impl IntoIterator<Item = Ipv4Addr>,
) -> Vec<Ipv4Addr> {
    let self_position = position(self_addr, netmask);
    let self_level = level(self_position);
    let self_index = index(self_position, self_level);

    let mut ranked: Vec<Ipv4Addr> = candidates.into_iter().filter(|&a| a != self_addr).collect();
    ranked.sort_by_key(|&addr| {
        let p = position(addr, netmask);
        let l = level(p);
        let n = index(p, l);
        let level_diff = level_difference(self_level, l);
        (level_diff.is_none(), level_diff.unwrap_or(u32::MAX), index_difference(n, self_index))
    });
    ranked
}

/// The `[pos0, pos1)` sub-range of the 64-bit id space assigned to `addr`
/// within its `netmask` (§3 "Id space partitioning", GLOSSARY "Interface
/// range"). The space is split evenly across every address the subnet can
/// hold, indexed by [`position`]; `pos0` is shifted by one so it never
/// includes the reserved nil id. Callers hand the result to
/// `factory_id::IdRange::new`.
#[must_use]
pub fn interface_range(addr: Ipv4Addr, netmask: Ipv4Addr) -> (u64, u64) {
    let host_bits = u32::from(netmask).trailing_zeros();
    let num_positions: u64 = 1u64 << host_bits;
    let span = u64::MAX / num_positions;
    let pos = u64::from(position(addr, netmask));
    let pos0 = pos.saturating_mul(span).saturating_add(1);
    let pos1 = pos0.saturating_add(span);
    (pos0, pos1)
}

#[cfg(test)]
mod test {
    use super::*;

    const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(127, 0, 0, last)
    }

    #[test]
    fn level_zero_is_the_root() {
        assert_eq!(level(0), 0);
        assert_eq!(level(1), 0);
        assert_eq!(level(2), 1);
        assert_eq!(level(3), 1);
        assert_eq!(level(4), 2);
    }

    #[test]
    fn index_is_offset_within_level() {
        assert_eq!(index(1, 0), 0);
        assert_eq!(index(2, 1), 0);
        assert_eq!(index(3, 1), 1);
    }

    #[test]
    fn self_is_excluded_from_its_own_ranking() {
        let ranked = rank_candidates(addr(1), MASK, [addr(1), addr(2)]);
        assert_eq!(ranked, vec![addr(2)]);
    }

    #[test]
    fn roots_never_rank_a_strictly_lower_level_candidate_first() {
        // node at position 1 (level 0, the root) vs a level-1 candidate at
        // position 2: finite distance, should be preferred over nothing.
        let ranked = rank_candidates(addr(1), MASK, [addr(2), addr(3)]);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn a_higher_level_node_ranks_lower_level_candidates_as_unreachable_last() {
        // position 3 is level 1; position 1 is level 0, strictly above it,
        // so by convention it can never become position 3's principal.
        let ranked = rank_candidates(addr(3), MASK, [addr(1), addr(2)]);
        assert_eq!(ranked, vec![addr(2), addr(1)]);
    }

    #[test]
    fn interface_ranges_never_include_nil() {
        for last in 0..=255u8 {
            let (pos0, _) = interface_range(addr(last), MASK);
            assert_ne!(pos0, 0);
        }
    }

    #[test]
    fn interface_ranges_are_disjoint_across_the_subnet() {
        let ranges: Vec<_> = (0..=255u8).map(|last| interface_range(addr(last), MASK)).collect();
        for (i, &(a0, a1)) in ranges.iter().enumerate() {
            assert!(a0 < a1);
            for &(b0, b1) in &ranges[i + 1..] {
                assert!(a1 <= b0 || b1 <= a0, "ranges overlap: [{a0},{a1}) vs [{b0},{b1})");
            }
        }
    }

    #[test]
    fn slash_32_gets_the_entire_space() {
        let host_only = Ipv4Addr::new(255, 255, 255, 255);
        let (pos0, pos1) = interface_range(addr(5), host_only);
        assert_eq!(pos0, 1);
        assert_eq!(pos1, u64::MAX);
    }
}
