// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The socket pipeline (C7): a single poll thread multiplexing every server
//! listener and peer connection, driven by a `crossbeam-channel` command
//! queue woken via a [`mio::Waker`] — the same shape as the router IO loop
//! this crate is grounded on, with `mio::net` sources registered directly
//! instead of through `SourceFd`, since every socket here is one this crate
//! owns outright.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use metrics::{counter, gauge};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use id::IdRange;
use kernel::{
    Dispatch, ExitCode, Flags, Kernel, KernelBox, KernelHeader, KernelTag, TypeId, TypeRegistry,
};
use wire::Endpoint;

use crate::connection::{Connection, UpstreamSaved};
use crate::round_robin::RoundRobin;

/// Errors starting or driving a [`SocketPipeline`].
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket pipeline queue has shut down")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const WAKE_TOKEN: Token = Token(0);
const FIRST_DYNAMIC_TOKEN: usize = 1;

enum Cmd {
    Submit(KernelBox),
    SetWeight(Endpoint, u32),
}

/// Handle to the running socket pipeline thread.
pub struct SocketPipeline {
    tx: Sender<Cmd>,
    waker: Arc<Waker>,
    thread: Option<JoinHandle<()>>,
}

impl SocketPipeline {
    /// Bind `listen_on` and start the poll thread. `ids` is the node's
    /// shared id allocator (the same range the CPU and timer pipelines
    /// use); `use_localhost` mirrors `NodeConfig`'s flag of the same name.
    pub fn start(
        listen_on: Vec<SocketAddr>,
        ids: Arc<IdRange<KernelTag>>,
        types: Arc<TypeRegistry>,
        dispatch: Arc<dyn Dispatch>,
        use_localhost: bool,
    ) -> Result<Self, SocketError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        let mut listeners = HashMap::new();
        let mut next_token = FIRST_DYNAMIC_TOKEN;
        for addr in listen_on {
            let mut listener = TcpListener::bind(addr)?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut listener, token, Interest::READABLE)?;
            listeners.insert(token, listener);
            info!(%addr, "socket pipeline listening");
        }

        let (tx, rx) = unbounded();
        let reactor = Reactor {
            poll,
            listeners,
            connections: HashMap::new(),
            addr_to_token: HashMap::new(),
            next_token,
            rr: RoundRobin::new(),
            ids,
            types,
            dispatch,
            use_localhost,
        };

        let thread = std::thread::Builder::new()
            .name("factory-socket".to_string())
            .spawn(move || reactor.run(rx))?;

        Ok(Self {
            tx,
            waker,
            thread: Some(thread),
        })
    }

    /// Hand a kernel to the socket pipeline for outbound routing (§4.7
    /// item 4): explicit `to`, broadcast, round-robin, or local fallback.
    pub fn submit(&self, kernel: KernelBox) -> Result<(), SocketError> {
        self.tx
            .send(Cmd::Submit(kernel))
            .map_err(|_| SocketError::Closed)?;
        self.waker.wake().map_err(SocketError::Io)
    }

    /// Update the weighted round-robin weight for `peer` (the number of
    /// downstream nodes behind it), e.g. after a hierarchy snapshot shows
    /// its subordinate count changed.
    pub fn set_weight(&self, peer: Endpoint, weight: u32) {
        let _ = self.tx.send(Cmd::SetWeight(peer, weight));
        let _ = self.waker.wake();
    }

    pub fn stop(mut self) {
        drop(self.tx);
        let _ = self.waker.wake();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("socket pipeline thread panicked during shutdown");
            }
        }
    }
}

struct Reactor {
    poll: Poll,
    listeners: HashMap<Token, TcpListener>,
    connections: HashMap<Token, Connection>,
    addr_to_token: HashMap<Endpoint, Token>,
    next_token: usize,
    rr: RoundRobin,
    ids: Arc<IdRange<KernelTag>>,
    types: Arc<TypeRegistry>,
    dispatch: Arc<dyn Dispatch>,
    use_localhost: bool,
}

impl Reactor {
    fn run(mut self, rx: Receiver<Cmd>) {
        let mut events = Events::with_capacity(256);
        loop {
            if let Err(e) = self.poll.poll(&mut events, Some(Duration::from_millis(500))) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "socket poll failed");
                continue;
            }

            for event in &events {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }
                if self.listeners.contains_key(&token) {
                    self.accept_all(token);
                } else {
                    self.service_connection(token, event.is_readable(), event.is_writable());
                }
            }

            loop {
                match rx.try_recv() {
                    Ok(Cmd::Submit(kernel)) => self.handle_outbound(kernel),
                    Ok(Cmd::SetWeight(ep, weight)) => self.rr.upsert(ep, weight),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
        }
    }

    fn accept_all(&mut self, listener_token: Token) {
        loop {
            let Some(listener) = self.listeners.get(&listener_token) else {
                return;
            };
            match listener.accept() {
                Ok((stream, addr)) => self.adopt_connection(stream, Endpoint::from(addr)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn adopt_connection(&mut self, mut stream: TcpStream, peer: Endpoint) {
        let token = Token(self.next_token);
        self.next_token += 1;
        if let Err(e) = self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            warn!(error = %e, %peer, "failed to register new connection");
            return;
        }
        gauge!("factory_connections_active").increment(1.0);
        self.addr_to_token.insert(peer.clone(), token);
        self.connections.insert(token, Connection::new(stream, peer));
    }

    fn connection_for(&mut self, peer: &Endpoint) -> Option<Token> {
        if let Some(&token) = self.addr_to_token.get(peer) {
            return Some(token);
        }
        let addr = peer.to_socket_addr()?;
        match TcpStream::connect(addr) {
            Ok(stream) => {
                self.adopt_connection(stream, peer.clone());
                self.addr_to_token.get(peer).copied()
            }
            Err(e) => {
                warn!(error = %e, %peer, "connect failed");
                None
            }
        }
    }

    fn handle_outbound(&mut self, mut kernel: KernelBox) {
        let flags = kernel.header().flags;
        if flags.contains(Flags::MOVES_EVERYWHERE) {
            self.broadcast(kernel);
            return;
        }

        let target = match kernel.header().to.clone() {
            Some(to) => Some(to),
            None if flags.contains(Flags::MOVES_DOWNSTREAM) => {
                warn!("moves_downstream kernel carries no `to`, dropping");
                return;
            }
            None => self.rr.next(),
        };

        let Some(target) = target else {
            if self.use_localhost {
                debug!("round robin exhausted, falling back to local execution");
                self.dispatch.dispatch(kernel);
            } else {
                self.bounce_no_upstream(kernel);
            }
            return;
        };

        assign_identity(&self.ids, &mut kernel);
        self.send_to(&target, kernel);
    }

    fn broadcast(&mut self, kernel: KernelBox) {
        let (type_id, body) = encode(kernel.as_ref());
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.enqueue_frame(type_id, &body);
                self.reregister_for_writes(token);
            }
        }
    }

    fn send_to(&mut self, target: &Endpoint, mut kernel: KernelBox) {
        let Some(token) = self.connection_for(target) else {
            self.bounce_no_upstream(kernel);
            return;
        };
        let save_upstream = kernel.header().flags.contains(Flags::SAVE_UPSTREAM_KERNELS);
        let saved = save_upstream.then(|| {
            (
                kernel.header().id,
                UpstreamSaved {
                    parent: kernel.header().parent,
                },
            )
        });
        kernel.header_mut().to = Some(target.clone());
        let (type_id, body) = encode(kernel.as_ref());
        counter!("factory_bytes_sent_total").increment(body.len() as u64);
        if let Some(conn) = self.connections.get_mut(&token) {
            if let Some((id, entry)) = saved {
                conn.upstream_saved.insert(id, entry);
            }
            conn.enqueue_frame(type_id, &body);
        }
        self.reregister_for_writes(token);
    }

    fn reregister_for_writes(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let interest = if conn.has_pending_writes() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let _ = self.poll.registry().reregister(&mut conn.stream, token, interest);
    }

    /// A just-submitted kernel could not be sent anywhere (no connection,
    /// connect failed, or the round robin was exhausted with
    /// `use_localhost` disabled). Its parent is local, so the general
    /// `to = None, moves_downstream` turnaround routes this straight back
    /// to a `react()` call instead of vanishing silently.
    fn bounce_no_upstream(&self, mut kernel: KernelBox) {
        kernel.header_mut().result = ExitCode::NoUpstreamServersAvailable;
        kernel.header_mut().to = None;
        kernel.header_mut().flags.insert(Flags::MOVES_DOWNSTREAM);
        kernel.header_mut().flags.remove(Flags::MOVES_UPSTREAM);
        self.dispatch.dispatch(kernel);
    }

    fn service_connection(&mut self, token: Token, readable: bool, writable: bool) {
        if writable {
            let flushed = self
                .connections
                .get_mut(&token)
                .map(Connection::flush)
                .transpose();
            match flushed {
                Ok(_) => self.reregister_for_writes(token),
                Err(e) => {
                    warn!(error = %e, "write failed, recovering connection");
                    self.recover(token);
                    return;
                }
            }
        }
        if readable {
            self.service_readable(token);
        }
    }

    fn service_readable(&mut self, token: Token) {
        let fill_result = self.connections.get_mut(&token).map(Connection::fill);
        match fill_result {
            Some(Ok(true)) => {}
            Some(Ok(false)) => {
                self.recover(token);
                return;
            }
            Some(Err(e)) => {
                warn!(error = %e, "read failed, recovering connection");
                self.recover(token);
                return;
            }
            None => return,
        }

        let frames = match self.connections.get_mut(&token).map(Connection::take_frames) {
            Some(Ok(frames)) => frames,
            Some(Err(e)) => {
                warn!(error = %e, "frame decode error, treating as protocol violation");
                self.recover(token);
                return;
            }
            None => return,
        };

        let peer = self.connections.get(&token).map(|c| c.peer.clone());
        let Some(peer) = peer else { return };

        for (type_id, body) in frames {
            self.dispatch_inbound(token, &peer, type_id, &body);
        }
    }

    fn dispatch_inbound(&mut self, token: Token, peer: &Endpoint, type_id: TypeId, body: &[u8]) {
        counter!("factory_bytes_received_total").increment(body.len() as u64);
        let mut r = wire::be::Reader::new(body);
        let header = match KernelHeader::read(type_id, &mut r) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "malformed kernel header, closing connection");
                self.recover(token);
                return;
            }
        };
        let Some(mut kernel) = self.types.decode(type_id, &mut r) else {
            warn!(%type_id, "unregistered type id, closing connection");
            self.recover(token);
            return;
        };
        *kernel.header_mut() = header;
        kernel.header_mut().from = Some(peer.clone());
        kernel.header_mut().flags.insert(Flags::IS_FOREIGN);

        if let Some(conn) = self.connections.get_mut(&token) {
            if kernel.header().flags.contains(Flags::MOVES_DOWNSTREAM) {
                conn.upstream_saved.remove(&kernel.header().id);
            }
            if kernel.header().flags.contains(Flags::SAVE_DOWNSTREAM_KERNELS) {
                conn.downstream_pending.insert(kernel.header().id);
            }
        }

        counter!("factory_kernels_dispatched_total", "pipeline" => "socket").increment(1);
        self.dispatch.dispatch(kernel);
    }

    /// The recovery algorithm (§4.7): every upstream-saved kernel on this
    /// connection is turned into a synthetic `endpoint_not_connected`
    /// reply and handed to the dispatcher so its parent's `react()` runs
    /// locally instead of waiting forever. Downstream-pending kernels need
    /// no special handling here — once they commit, `CpuPipeline::commit`'s
    /// own `to = from` turnaround finds a fresh connection the normal way.
    fn recover(&mut self, token: Token) {
        self.poll_deregister(token);
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        self.addr_to_token.remove(&conn.peer);
        self.rr.remove(&conn.peer);
        gauge!("factory_connections_active").decrement(1.0);

        for (id, saved) in conn.upstream_saved.drain() {
            counter!("factory_kernels_recovered_total", "exit_code" => "endpoint_not_connected")
                .increment(1);
            let mut header = KernelHeader::new(TypeId::new(0));
            header.id = id;
            header.parent = saved.parent;
            header.flags = Flags::MOVES_DOWNSTREAM | Flags::CARRIES_PARENT;
            header.result = ExitCode::EndpointNotConnected;
            header.from = Some(conn.peer.clone());
            self.dispatch.dispatch(Box::new(RecoveryNotice(header)));
        }
        if !conn.downstream_pending.is_empty() {
            debug!(
                peer = %conn.peer,
                pending = conn.downstream_pending.len(),
                "connection lost with downstream work still executing locally"
            );
        }
    }

    fn poll_deregister(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
    }
}

fn assign_identity(ids: &IdRange<KernelTag>, kernel: &mut KernelBox) {
    if kernel.header().id.is_nil() {
        kernel.header_mut().id = ids.generate();
    }
}

fn encode(kernel: &dyn Kernel) -> (TypeId, Vec<u8>) {
    let mut buf = Vec::new();
    kernel.header().write(&mut buf);
    kernel.write_payload(&mut buf);
    (kernel.header().type_id, buf)
}

/// A synthetic, payload-less kernel carrying only the header fields the
/// recovery path needs. Never has `act`/`react` invoked on it: the CPU
/// pipeline's `submit` reads only `header()` before routing a
/// `moves_downstream` arrival straight to `react()`.
#[derive(Debug)]
struct RecoveryNotice(KernelHeader);

impl Kernel for RecoveryNotice {
    fn header(&self) -> &KernelHeader {
        &self.0
    }
    fn header_mut(&mut self) -> &mut KernelHeader {
        &mut self.0
    }
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}
