// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Kernel routing flags.

use wire::be::{Reader, Underrun};

bitflags::bitflags! {
    /// Direction and delivery flags a kernel carries, consulted by the
    /// router ([`factory_pipeline::router`]) and the socket pipeline's
    /// recovery logic.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        /// Travelling away from its parent, towards a principal elsewhere.
        const MOVES_UPSTREAM          = 1 << 0;
        /// Travelling back towards its parent.
        const MOVES_DOWNSTREAM        = 1 << 1;
        /// May be satisfied by any reachable node, not a specific one.
        const MOVES_SOMEWHERE         = 1 << 2;
        /// Must be delivered to every known peer (broadcast).
        const MOVES_EVERYWHERE        = 1 << 3;
        /// Serialised together with a transient copy of its parent.
        const CARRIES_PARENT          = 1 << 4;
        /// The application-layer framing byte should be prepended on write.
        const PREPEND_APPLICATION     = 1 << 5;
        /// The connection keeps this kernel in its upstream-saved list
        /// until a reply arrives, so it can be recovered on link loss.
        const SAVE_UPSTREAM_KERNELS   = 1 << 6;
        /// As above, but for kernels received from a peer awaiting a local
        /// result.
        const SAVE_DOWNSTREAM_KERNELS = 1 << 7;
        /// Arrived over the wire from another node (as opposed to having
        /// been constructed locally).
        const IS_FOREIGN              = 1 << 8;
    }
}

impl Flags {
    pub fn write(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.bits().to_be_bytes());
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, Underrun> {
        Ok(Flags::from_bits_retain(r.read_u32()?))
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::Flags;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for Flags {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Flags::from_bits_truncate(driver.produce::<u32>()?))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_back() {
        bolero::check!().with_type().for_each(|f: &Flags| {
            let mut buf = Vec::new();
            f.write(&mut buf);
            let mut r = Reader::new(&buf);
            assert_eq!(Flags::read(&mut r).unwrap(), *f);
        });
    }

    #[test]
    fn empty_has_no_direction() {
        let f = Flags::empty();
        assert!(!f.contains(Flags::MOVES_UPSTREAM));
        assert!(!f.contains(Flags::MOVES_DOWNSTREAM));
    }
}
