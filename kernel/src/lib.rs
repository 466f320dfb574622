// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The kernel execution core: kernel identity and lineage ([`KernelId`],
//! [`KernelHeader`]), the [`Kernel`] trait every unit of work implements,
//! the bitset of routing [`Flags`], the [`ExitCode`] a kernel finishes
//! with, and the two process-wide registries ([`TypeRegistry`],
//! [`InstanceRegistry`]) that let a received kernel be reconstructed and
//! reunited with its principal.

pub mod action;
pub mod dispatch;
pub mod exit_code;
pub mod flags;
pub mod registry;

pub use action::{Action, KernelBox};
pub use dispatch::{Dispatch, NullDispatch};
pub use exit_code::ExitCode;
pub use flags::Flags;
pub use registry::{InstanceRegistry, TypeId, TypeRegistry, TypeRegistryError};

use wire::Endpoint;

/// Marker type tagging [`id::Id`] values as kernel identifiers, distinct at
/// compile time from any other id space in the workspace.
#[derive(Debug)]
pub struct KernelTag;

/// A kernel's process-unique identifier. `KernelId::default()` (raw value
/// 0) means "no kernel" / "root", matching the wire protocol's reserved
/// nil id.
pub type KernelId = id::Id<KernelTag>;

/// The fields every kernel carries regardless of payload: identity,
/// lineage, routing addresses, flags and the result it finished with.
///
/// This is the base-class state of the original object model, rendered
/// here as plain data alongside a trait (see [`Kernel`]) rather than as
/// inherited fields, since kernels are dispatched through a type-id table
/// rather than a virtual-method table.
#[derive(Debug, Clone)]
pub struct KernelHeader {
    pub id: KernelId,
    pub type_id: TypeId,
    pub parent: Option<KernelId>,
    pub from: Option<Endpoint>,
    pub to: Option<Endpoint>,
    pub flags: Flags,
    pub result: ExitCode,
}

impl KernelHeader {
    #[must_use]
    pub fn new(type_id: TypeId) -> Self {
        Self {
            id: KernelId::NIL,
            type_id,
            parent: None,
            from: None,
            to: None,
            flags: Flags::empty(),
            result: ExitCode::Undefined,
        }
    }

    /// Serialize id, flags, result, the parent id (only when
    /// `CARRIES_PARENT` is set) and the from/to endpoints. The type-id
    /// itself travels in the frame header, not here, per the wire format.
    pub fn write(&self, buf: &mut Vec<u8>) {
        use wire::be::{write_u64, write_u8};

        write_u64(buf, self.id.into_raw());
        self.flags.write(buf);
        write_u8(buf, self.result.to_wire());
        if self.flags.contains(Flags::CARRIES_PARENT) {
            write_u64(buf, self.parent.map_or(0, KernelId::into_raw));
        }
        write_endpoint_opt(buf, self.from.as_ref());
        write_endpoint_opt(buf, self.to.as_ref());
    }

    /// Inverse of [`KernelHeader::write`]; `type_id` comes from the frame
    /// header since it was already consulted to pick the decoder.
    pub fn read(type_id: TypeId, r: &mut wire::be::Reader<'_>) -> Result<Self, HeaderError> {
        let id = KernelId::from_raw(r.read_u64()?);
        let flags = Flags::read(r)?;
        let result = ExitCode::from_wire(r.read_u8()?).ok_or(HeaderError::BadExitCode)?;
        let parent = if flags.contains(Flags::CARRIES_PARENT) {
            let raw = r.read_u64()?;
            (raw != 0).then(|| KernelId::from_raw(raw))
        } else {
            None
        };
        let from = read_endpoint_opt(r)?;
        let to = read_endpoint_opt(r)?;
        Ok(Self {
            id,
            type_id,
            parent,
            from,
            to,
            flags,
            result,
        })
    }
}

fn write_endpoint_opt(buf: &mut Vec<u8>, ep: Option<&Endpoint>) {
    use wire::be::write_u8;
    match ep {
        Some(e) => {
            write_u8(buf, 1);
            e.write(buf);
        }
        None => write_u8(buf, 0),
    }
}

fn read_endpoint_opt(r: &mut wire::be::Reader<'_>) -> Result<Option<Endpoint>, HeaderError> {
    Ok(if r.read_u8()? == 1 {
        Some(Endpoint::read(r)?)
    } else {
        None
    })
}

/// Errors decoding a [`KernelHeader`] off the wire.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error(transparent)]
    Underrun(#[from] wire::be::Underrun),
    #[error(transparent)]
    Endpoint(#[from] wire::EndpointError),
    #[error("unrecognised exit code tag")]
    BadExitCode,
}

/// The contract every unit of work implements.
///
/// `act()` is called exactly once when the kernel is first dispatched by a
/// pipeline; `react()` is called once per subordinate kernel that returns.
/// Both report what should happen next via the returned [`Action`]s — the
/// kernel itself never reaches into a pipeline or registry, keeping the
/// trait object-safe and the runtime free to execute `act`/`react` behind a
/// panic-catching boundary (a user kernel panic becomes `ExitCode::Error`
/// on that kernel, never a crash of the worker thread).
pub trait Kernel: std::fmt::Debug + Send {
    fn header(&self) -> &KernelHeader;
    fn header_mut(&mut self) -> &mut KernelHeader;

    /// Called once when this kernel is first scheduled.
    fn act(&mut self) -> Vec<Action> {
        vec![Action::Commit(ExitCode::Success)]
    }

    /// Called once per subordinate that has finished, identified by its id
    /// and the result it committed. The default implementation commits
    /// successfully the moment any child returns, matching a plain
    /// fire-and-forget fan-out.
    #[allow(unused_variables)]
    fn react(&mut self, child: KernelId, result: ExitCode) -> Vec<Action> {
        vec![Action::Commit(ExitCode::Success)]
    }

    /// Optional wall-clock deadline (§4.3 `timed()`/`at()`). `Some(instant)`
    /// in the future routes this kernel onto the timer pipeline instead of
    /// wherever the router would otherwise send it; the default `None`
    /// means "no deadline", the common case for every kernel that isn't
    /// itself a scheduled wakeup.
    fn at(&self) -> Option<std::time::Instant> {
        None
    }

    /// Serialize the payload only; the header is written by the transport
    /// using [`KernelHeader`] and the type registry's type-id.
    fn write_payload(&self, buf: &mut Vec<u8>);
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn header_round_trip_without_parent() {
        let mut h = KernelHeader::new(TypeId::new(9));
        h.id = KernelId::from_raw(123);
        h.result = ExitCode::EndpointNotConnected;
        h.from = Some(Endpoint::new_ipv4(Ipv4Addr::new(10, 0, 0, 1), 9001));

        let mut buf = Vec::new();
        h.write(&mut buf);
        let mut r = wire::be::Reader::new(&buf);
        let back = KernelHeader::read(TypeId::new(9), &mut r).unwrap();

        assert_eq!(back.id, h.id);
        assert_eq!(back.result, h.result);
        assert_eq!(back.from, h.from);
        assert_eq!(back.parent, None);
    }

    #[test]
    fn header_round_trip_with_parent() {
        let mut h = KernelHeader::new(TypeId::new(2));
        h.id = KernelId::from_raw(5);
        h.parent = Some(KernelId::from_raw(1));
        h.flags = Flags::CARRIES_PARENT | Flags::MOVES_UPSTREAM;
        h.result = ExitCode::Success;

        let mut buf = Vec::new();
        h.write(&mut buf);
        let mut r = wire::be::Reader::new(&buf);
        let back = KernelHeader::read(TypeId::new(2), &mut r).unwrap();

        assert_eq!(back.parent, h.parent);
        assert_eq!(back.flags, h.flags);
        assert_eq!(back.result, h.result);
    }

    #[test]
    fn result_is_always_preserved_across_round_trip() {
        // `result` must never be zeroed on a round trip.
        bolero::check!()
            .with_type()
            .for_each(|(raw_id, code): &(u64, ExitCode)| {
                let mut h = KernelHeader::new(TypeId::new(1));
                h.id = KernelId::from_raw(*raw_id);
                h.result = *code;
                let mut buf = Vec::new();
                h.write(&mut buf);
                let mut r = wire::be::Reader::new(&buf);
                let back = KernelHeader::read(TypeId::new(1), &mut r).unwrap();
                assert_eq!(back.result, *code);
            });
    }
}
