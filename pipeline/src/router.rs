// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The router (C9): a pure function from a kernel's header plus a small
//! amount of local context to the pipeline it belongs on next. Kept
//! side-effect free and stateless so every pipeline and the `Factory` root
//! can call it without coordination.

use kernel::{Flags, KernelHeader};
use wire::Endpoint;

/// The pipeline a kernel should be dispatched to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Destination {
    Cpu,
    Timer,
    Socket,
    Process,
}

/// Local facts the router needs that aren't on the kernel itself.
#[derive(Debug, Default, Clone)]
pub struct RouteContext {
    /// Endpoints this node itself is reachable at (server sockets bound
    /// locally); a kernel whose `to` names one of these is already home.
    pub local_endpoints: Vec<Endpoint>,
    /// `true` if this kernel has a scheduled wake time that has not yet
    /// elapsed. The timer pipeline sets this to `false` once it hands the
    /// kernel onward at its deadline.
    pub has_future_deadline: bool,
    /// `true` if `to` names one of the applications registered with the
    /// process pipeline rather than a network peer.
    pub is_process_target: bool,
}

/// Stateless classifier implementing the routing table of the
/// specification's Router component (C9).
#[derive(Debug, Default)]
pub struct Router;

impl Router {
    #[must_use]
    pub fn classify(header: &KernelHeader, ctx: &RouteContext) -> Destination {
        let is_local = match &header.to {
            Some(to) => ctx.local_endpoints.contains(to),
            None => header.flags.contains(Flags::MOVES_DOWNSTREAM),
        };
        if is_local && !ctx.is_process_target {
            return Destination::Cpu;
        }
        if ctx.has_future_deadline {
            return Destination::Timer;
        }
        if ctx.is_process_target {
            return Destination::Process;
        }
        if header.flags.contains(Flags::MOVES_EVERYWHERE) || header.to.is_some() {
            return Destination::Socket;
        }
        // No destination, no deadline, no process target, not broadcast:
        // falls back to local execution (e.g. `moves_somewhere` with no
        // peers configured yet).
        Destination::Cpu
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel::{ExitCode, TypeId};
    use std::net::Ipv4Addr;

    fn header() -> KernelHeader {
        KernelHeader::new(TypeId::new(1))
    }

    #[test]
    fn unset_to_with_downstream_flag_is_local() {
        let mut h = header();
        h.flags = Flags::MOVES_DOWNSTREAM;
        assert_eq!(
            Router::classify(&h, &RouteContext::default()),
            Destination::Cpu
        );
    }

    #[test]
    fn to_matching_local_endpoint_is_local() {
        let ep = Endpoint::new_ipv4(Ipv4Addr::LOCALHOST, 9000);
        let mut h = header();
        h.to = Some(ep.clone());
        h.result = ExitCode::Undefined;
        let ctx = RouteContext {
            local_endpoints: vec![ep],
            ..Default::default()
        };
        assert_eq!(Router::classify(&h, &ctx), Destination::Cpu);
    }

    #[test]
    fn future_deadline_goes_to_timer() {
        let h = header();
        let ctx = RouteContext {
            has_future_deadline: true,
            ..Default::default()
        };
        assert_eq!(Router::classify(&h, &ctx), Destination::Timer);
    }

    #[test]
    fn broadcast_goes_to_socket() {
        let mut h = header();
        h.flags = Flags::MOVES_EVERYWHERE;
        assert_eq!(
            Router::classify(&h, &RouteContext::default()),
            Destination::Socket
        );
    }

    #[test]
    fn remote_to_goes_to_socket() {
        let mut h = header();
        h.to = Some(Endpoint::new_ipv4(Ipv4Addr::new(10, 0, 0, 5), 9001));
        assert_eq!(
            Router::classify(&h, &RouteContext::default()),
            Destination::Socket
        );
    }

    #[test]
    fn process_target_wins_over_socket() {
        let mut h = header();
        h.to = Some(Endpoint::new_ipv4(Ipv4Addr::new(10, 0, 0, 5), 9001));
        let ctx = RouteContext {
            is_process_target: true,
            ..Default::default()
        };
        assert_eq!(Router::classify(&h, &ctx), Destination::Process);
    }

    #[test]
    fn no_destination_no_peers_stays_local() {
        let h = header();
        assert_eq!(
            Router::classify(&h, &RouteContext::default()),
            Destination::Cpu
        );
    }
}
