// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The try-next-peer loop (§4.10): [`Seeker`] walks a ranked candidate list
//! proposing itself to each in turn until one accepts, then hands off to a
//! [`PrincipalMonitor`] that keeps a [`crate::secret_agent::SecretAgent`]
//! resident on the chosen principal for as long as the connection holds.
//! [`DiscoveryEngine`] is the entry point the binary crate calls once at
//! startup and again whenever the monitor detects principal loss.

use std::net::Ipv4Addr;
use std::sync::Arc;

use hierarchy::Hierarchy;
use kernel::{Action, Dispatch, ExitCode, Kernel, KernelHeader, KernelId, TypeId, TypeRegistry, TypeRegistryError};
use tracing::info;
use wire::Endpoint;

use crate::address::rank_candidates;
use crate::negotiator::Negotiator;
use crate::secret_agent::SecretAgent;

const SEEKER_TYPE_ID: TypeId = TypeId::new(102);
const MONITOR_TYPE_ID: TypeId = TypeId::new(103);

/// Node-local configuration the discovery engine needs: its own address and
/// a way to list the other addresses presently worth trying. Enumerating
/// "neighbours" (e.g. by ARP table, or a static peer list from
/// `factory-config`) is left to the caller.
pub struct DiscoveryEngine {
    self_addr: Ipv4Addr,
    netmask: Ipv4Addr,
    port: u16,
    hierarchy: Arc<Hierarchy>,
    dispatch: Arc<dyn Dispatch>,
    neighbours: Box<dyn Fn() -> Vec<Ipv4Addr> + Send + Sync>,
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("self_addr", &self.self_addr)
            .field("netmask", &self.netmask)
            .field("port", &self.port)
            .finish()
    }
}

impl DiscoveryEngine {
    pub fn new(
        self_addr: Ipv4Addr,
        netmask: Ipv4Addr,
        port: u16,
        hierarchy: Arc<Hierarchy>,
        dispatch: Arc<dyn Dispatch>,
        neighbours: impl Fn() -> Vec<Ipv4Addr> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_addr,
            netmask,
            port,
            hierarchy,
            dispatch,
            neighbours: Box::new(neighbours),
        })
    }

    #[must_use]
    pub fn self_endpoint(&self) -> Endpoint {
        Endpoint::new_ipv4(self.self_addr, self.port)
    }

    /// Register the negotiator and secret-agent wire types against `types`,
    /// capturing this engine's own hierarchy/address so inbound negotiators
    /// decoded off the wire can run their accept/reject logic locally.
    pub fn register_types(self: &Arc<Self>, types: &mut TypeRegistry) -> Result<(), TypeRegistryError> {
        crate::negotiator::register(types, Arc::clone(&self.hierarchy), self.self_endpoint())?;
        crate::secret_agent::register(types)?;
        Ok(())
    }

    /// Rank currently known neighbours and dispatch a fresh [`Seeker`] to
    /// walk them. Called once at startup, and again by [`PrincipalMonitor`]
    /// whenever the secret agent reports the principal connection lost.
    pub fn start(self: &Arc<Self>) {
        let candidates = rank_candidates(self.self_addr, self.netmask, (self.neighbours)());
        info!(candidates = candidates.len(), "starting principal search");
        let seeker = Seeker::new(Arc::clone(self), candidates);
        self.dispatch.dispatch(Box::new(seeker));
    }
}

/// Walks a ranked candidate list, proposing itself to each in turn via a
/// [`Negotiator`] child, until one accepts or the list is exhausted.
#[derive(Debug)]
struct Seeker {
    header: KernelHeader,
    engine: Arc<DiscoveryEngine>,
    candidates: Vec<Ipv4Addr>,
    cursor: usize,
    last_tried: Option<Endpoint>,
}

impl Seeker {
    fn new(engine: Arc<DiscoveryEngine>, candidates: Vec<Ipv4Addr>) -> Self {
        Self {
            header: KernelHeader::new(SEEKER_TYPE_ID),
            engine,
            candidates,
            cursor: 0,
            last_tried: None,
        }
    }

    fn try_next(&mut self) -> Vec<Action> {
        let Some(&addr) = self.candidates.get(self.cursor) else {
            return vec![Action::Commit(ExitCode::NoUpstreamServersAvailable)];
        };
        self.cursor += 1;
        let candidate = Endpoint::new_ipv4(addr, self.engine.port);
        self.last_tried = Some(candidate.clone());
        let old_principal = self.engine.hierarchy.principal();
        let negotiator = Negotiator::propose(candidate, old_principal);
        vec![Action::Upstream(Box::new(negotiator)), Action::Continue]
    }
}

impl Kernel for Seeker {
    fn header(&self) -> &KernelHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut KernelHeader {
        &mut self.header
    }

    fn act(&mut self) -> Vec<Action> {
        self.try_next()
    }

    fn react(&mut self, _child: KernelId, result: ExitCode) -> Vec<Action> {
        if result.is_success() {
            let Some(principal) = self.last_tried.clone() else {
                return vec![Action::Commit(ExitCode::Error)];
            };
            info!(%principal, "adopted principal");
            self.engine.hierarchy.set_principal(principal.clone());
            let monitor = PrincipalMonitor::new(Arc::clone(&self.engine), principal);
            vec![Action::Upstream(Box::new(monitor)), Action::Commit(ExitCode::Success)]
        } else {
            self.try_next()
        }
    }

    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

/// Keeps a [`SecretAgent`] resident on `principal` and restarts the search
/// (via [`DiscoveryEngine::start`]) the moment the agent reports the
/// connection gone.
#[derive(Debug)]
struct PrincipalMonitor {
    header: KernelHeader,
    engine: Arc<DiscoveryEngine>,
    principal: Endpoint,
}

impl PrincipalMonitor {
    fn new(engine: Arc<DiscoveryEngine>, principal: Endpoint) -> Self {
        Self {
            header: KernelHeader::new(MONITOR_TYPE_ID),
            engine,
            principal,
        }
    }
}

impl Kernel for PrincipalMonitor {
    fn header(&self) -> &KernelHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut KernelHeader {
        &mut self.header
    }

    fn act(&mut self) -> Vec<Action> {
        let agent = SecretAgent::new(self.principal.clone());
        vec![Action::Upstream(Box::new(agent)), Action::Continue]
    }

    fn react(&mut self, _child: KernelId, result: ExitCode) -> Vec<Action> {
        if result == ExitCode::EndpointNotConnected {
            info!(principal = %self.principal, "lost principal, restarting search");
            self.engine.hierarchy.unset_principal();
            self.engine.start();
            vec![Action::Commit(ExitCode::Success)]
        } else {
            vec![Action::Continue]
        }
    }

    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel::NullDispatch;
    use std::net::Ipv4Addr;

    fn engine(neighbours: Vec<Ipv4Addr>) -> Arc<DiscoveryEngine> {
        DiscoveryEngine::new(
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(255, 255, 255, 0),
            9001,
            Arc::new(Hierarchy::new()),
            Arc::new(NullDispatch),
            move || neighbours.clone(),
        )
    }

    #[test]
    fn seeker_commits_no_upstream_servers_when_candidates_exhausted() {
        let e = engine(vec![]);
        let mut seeker = Seeker::new(e, vec![]);
        let actions = seeker.act();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            Action::Commit(ExitCode::NoUpstreamServersAvailable)
        ));
    }

    #[test]
    fn seeker_tries_next_candidate_on_rejection() {
        let e = engine(vec![Ipv4Addr::new(127, 0, 0, 2), Ipv4Addr::new(127, 0, 0, 3)]);
        let mut seeker = Seeker::new(e, vec![Ipv4Addr::new(127, 0, 0, 2), Ipv4Addr::new(127, 0, 0, 3)]);
        let _ = seeker.act();
        assert_eq!(seeker.cursor, 1);
        let actions = seeker.react(KernelId::from_raw(1), ExitCode::Error);
        assert_eq!(seeker.cursor, 2);
        assert!(matches!(actions[0], Action::Upstream(_)));
    }

    #[test]
    fn seeker_adopts_principal_on_acceptance() {
        let e = engine(vec![Ipv4Addr::new(127, 0, 0, 2)]);
        let hierarchy = Arc::clone(&e.hierarchy);
        let mut seeker = Seeker::new(e, vec![Ipv4Addr::new(127, 0, 0, 2)]);
        let _ = seeker.act();
        let actions = seeker.react(KernelId::from_raw(1), ExitCode::Success);
        assert_eq!(actions.len(), 2);
        assert!(hierarchy.principal().is_some());
    }

    #[test]
    fn monitor_restarts_search_on_connection_loss() {
        let e = engine(vec![Ipv4Addr::new(127, 0, 0, 2)]);
        e.hierarchy.set_principal(Endpoint::new_ipv4(Ipv4Addr::new(127, 0, 0, 2), 9001));
        let mut monitor = PrincipalMonitor::new(Arc::clone(&e), Endpoint::new_ipv4(Ipv4Addr::new(127, 0, 0, 2), 9001));
        let actions = monitor.react(KernelId::from_raw(1), ExitCode::EndpointNotConnected);
        assert!(matches!(actions[0], Action::Commit(ExitCode::Success)));
        assert!(e.hierarchy.principal().is_none());
    }
}
