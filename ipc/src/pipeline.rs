// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The process pipeline (C8): one child per registered application,
//! reached over a pair of [`SharedRing`]s rather than a socket. Shaped
//! after `factory_socket::SocketPipeline` — a single supervisor thread, a
//! `crossbeam-channel` command queue, per-child saved-kernel bookkeeping —
//! but polling the rings on a timer instead of blocking in `mio::Poll`,
//! since a shared-memory segment has no file descriptor to register for
//! readiness.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use metrics::counter;
use tracing::{debug, error, info, warn};

use id::IdRange;
use kernel::{
    Dispatch, ExitCode, Flags, Kernel, KernelBox, KernelHeader, KernelTag, TypeId, TypeRegistry,
};
use wire::frame::write_frame;
use wire::{Endpoint, FrameDecoder};

use crate::ring::{RingError, SharedRing};

/// Default payload capacity of each direction's ring, excluding the
/// 32-byte header.
pub const DEFAULT_RING_CAPACITY: usize = 1024 * 1024;

/// Environment variable the child reads its inbound ring path from (the
/// ring the parent writes to and the child reads).
pub const ENV_RING_FROM_PARENT: &str = "FACTORY_IPC_FROM_PARENT";
/// Environment variable the child reads its outbound ring path from (the
/// ring the child writes to and the parent reads).
pub const ENV_RING_TO_PARENT: &str = "FACTORY_IPC_TO_PARENT";
/// Environment variable carrying the process's PID-derived application
/// key, non-zero exactly when this process is a child application (§6).
pub const ENV_APP_ID: &str = "APP_ID";

/// Errors starting or driving a [`ProcessPipeline`].
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("ipc pipeline has shut down")]
    Closed,
}

/// Derive the 64-bit application key from a child's PID, per §6
/// ("process-id-derived 64-bit key"). The PID alone is reused across time
/// on most systems, but within the lifetime of one factory process a PID
/// names exactly one live child, which is all identity this key needs to
/// carry.
#[must_use]
pub fn app_key(pid: u32) -> u64 {
    u64::from(pid)
}

enum Cmd {
    Submit(KernelBox),
    Shutdown,
}

struct AppHandle {
    endpoint: Endpoint,
    child: Child,
    to_app: SharedRing,
    from_app: SharedRing,
    decoder: FrameDecoder,
    /// Kernels sent to this application with `SAVE_UPSTREAM_KERNELS` set,
    /// not yet answered — recovered into synthetic `endpoint_not_connected`
    /// replies if the child exits first, mirroring
    /// `factory_socket::Connection::upstream_saved`.
    upstream_saved: HashMap<kernel::KernelId, Option<kernel::KernelId>>,
}

/// Handle to the running process-pipeline supervisor thread.
pub struct ProcessPipeline {
    tx: Sender<Cmd>,
    thread: Option<JoinHandle<()>>,
}

impl ProcessPipeline {
    /// Spawn one child per `(name, executable)` pair, each wired to a
    /// fresh pair of shared-memory rings under `ring_dir`. `ids` is the
    /// node's shared id allocator, consulted when assigning an id to a
    /// kernel travelling to an app for the first time.
    pub fn start(
        apps: Vec<(String, PathBuf)>,
        ring_dir: &std::path::Path,
        ring_capacity: usize,
        ids: Arc<IdRange<KernelTag>>,
        types: Arc<TypeRegistry>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Result<Self, IpcError> {
        let mut handles = Vec::with_capacity(apps.len());
        for (name, exe) in apps {
            handles.push(spawn_app(&name, &exe, ring_dir, ring_capacity)?);
        }

        let (tx, rx) = unbounded();
        let supervisor = Supervisor {
            apps: handles,
            ids,
            types,
            dispatch,
        };
        let thread = std::thread::Builder::new()
            .name("factory-process".to_string())
            .spawn(move || supervisor.run(rx))?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Hand a kernel to the process pipeline; its `to` must name a
    /// registered application's endpoint.
    pub fn submit(&self, kernel: KernelBox) -> Result<(), IpcError> {
        self.tx.send(Cmd::Submit(kernel)).map_err(|_| IpcError::Closed)
    }

    pub fn stop(mut self) {
        let _ = self.tx.send(Cmd::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("process pipeline supervisor thread panicked during shutdown");
            }
        }
    }
}

fn spawn_app(
    name: &str,
    exe: &std::path::Path,
    ring_dir: &std::path::Path,
    ring_capacity: usize,
) -> Result<AppHandle, IpcError> {
    let placeholder_key = std::process::id(); // overwritten with the real PID below
    let to_app_path = ring_dir.join(format!("factory-ipc-{name}-{placeholder_key}-to-app"));
    let from_app_path = ring_dir.join(format!("factory-ipc-{name}-{placeholder_key}-from-app"));

    let to_app = SharedRing::create(&to_app_path, ring_capacity)?;
    let from_app = SharedRing::create(&from_app_path, ring_capacity)?;

    let child = Command::new(exe)
        .env(ENV_RING_FROM_PARENT, &to_app_path)
        .env(ENV_RING_TO_PARENT, &from_app_path)
        .spawn()?;
    let key = app_key(child.id());
    info!(%name, pid = child.id(), key, "spawned process-pipeline application");

    Ok(AppHandle {
        endpoint: Endpoint::unix(name),
        child,
        to_app,
        from_app,
        decoder: FrameDecoder::new(),
        upstream_saved: HashMap::new(),
    })
}

struct Supervisor {
    apps: Vec<AppHandle>,
    ids: Arc<IdRange<KernelTag>>,
    types: Arc<TypeRegistry>,
    dispatch: Arc<dyn Dispatch>,
}

impl Supervisor {
    fn run(mut self, rx: Receiver<Cmd>) {
        loop {
            match rx.recv_timeout(Duration::from_millis(5)) {
                Ok(Cmd::Submit(kernel)) => self.handle_outbound(kernel),
                Ok(Cmd::Shutdown) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
            loop {
                match rx.try_recv() {
                    Ok(Cmd::Submit(kernel)) => self.handle_outbound(kernel),
                    Ok(Cmd::Shutdown) => return,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            self.poll_children();
        }
        self.reap_all();
    }

    fn handle_outbound(&mut self, mut kernel: KernelBox) {
        let Some(to) = kernel.header().to.clone() else {
            warn!("process-pipeline kernel submitted with no `to`, dropping");
            return;
        };
        let Some(app) = self.apps.iter_mut().find(|a| a.endpoint == to) else {
            warn!(%to, "no application registered under this endpoint, dropping");
            return;
        };
        if kernel.header().id.is_nil() {
            kernel.header_mut().id = self.ids.generate();
        }
        let save_upstream = kernel.header().flags.contains(Flags::SAVE_UPSTREAM_KERNELS);
        let saved = save_upstream.then(|| (kernel.header().id, kernel.header().parent));
        let mut buf = Vec::new();
        kernel.header().write(&mut buf);
        kernel.write_payload(&mut buf);
        let frame = write_frame(kernel.header().type_id.into_raw(), &buf);
        counter!("factory_ipc_bytes_sent_total").increment(frame.len() as u64);
        match app.to_app.push(&frame) {
            Ok(()) => {
                if let Some((id, parent)) = saved {
                    app.upstream_saved.insert(id, parent);
                }
            }
            Err(e) => warn!(error = %e, %to, "process ring full, dropping kernel"),
        }
    }

    fn poll_children(&mut self) {
        let mut dead = Vec::new();
        for (idx, app) in self.apps.iter_mut().enumerate() {
            let bytes = app.from_app.pop_all();
            if !bytes.is_empty() {
                app.decoder.fill(&bytes);
                loop {
                    match app.decoder.try_take_frame() {
                        Ok(Some((type_id, body))) => {
                            let mut r = wire::be::Reader::new(&body);
                            if let Ok(header) = KernelHeader::read(TypeId::new(type_id), &mut r) {
                                app.upstream_saved.remove(&header.id);
                            }
                            dispatch_inbound(
                                &app.endpoint,
                                TypeId::new(type_id),
                                &body,
                                &self.types,
                                self.dispatch.as_ref(),
                            );
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, endpoint = %app.endpoint, "malformed frame from application, dropping rest of buffer");
                            break;
                        }
                    }
                }
                app.decoder.compact();
            }
            match app.child.try_wait() {
                Ok(Some(status)) => {
                    warn!(endpoint = %app.endpoint, %status, "application process exited, recovering saved kernels");
                    dead.push(idx);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, endpoint = %app.endpoint, "failed to poll application process status"),
            }
        }
        for idx in dead.into_iter().rev() {
            let mut app = self.apps.remove(idx);
            for (id, parent) in app.upstream_saved.drain() {
                counter!("factory_kernels_recovered_total", "exit_code" => "endpoint_not_connected")
                    .increment(1);
                self.dispatch
                    .dispatch(Box::new(AppNotConnected::new(id, parent, app.endpoint.clone())));
            }
            let _ = std::fs::remove_file(app.to_app.path());
            let _ = std::fs::remove_file(app.from_app.path());
        }
    }

    fn reap_all(&mut self) {
        for app in &mut self.apps {
            // `kill` on an already-exited child returns an error; that is
            // the common and expected case on a clean shutdown, not worth
            // logging.
            let _ = app.child.kill();
            let _ = app.child.wait();
            let _ = std::fs::remove_file(app.to_app.path());
            let _ = std::fs::remove_file(app.from_app.path());
        }
    }
}

fn dispatch_inbound(
    from: &Endpoint,
    type_id: TypeId,
    body: &[u8],
    types: &TypeRegistry,
    dispatch: &dyn Dispatch,
) {
    counter!("factory_ipc_bytes_received_total").increment(body.len() as u64);
    let mut r = wire::be::Reader::new(body);
    let header = match KernelHeader::read(type_id, &mut r) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, %from, "malformed kernel header from application");
            return;
        }
    };
    let Some(mut kernel) = types.decode(type_id, &mut r) else {
        warn!(%type_id, %from, "unregistered type id from application");
        return;
    };
    *kernel.header_mut() = header;
    kernel.header_mut().from = Some(from.clone());
    kernel.header_mut().flags.insert(Flags::IS_FOREIGN);
    counter!("factory_kernels_dispatched_total", "pipeline" => "process").increment(1);
    dispatch.dispatch(kernel);
}

/// A synthetic reply used when an application's process exits without
/// answering a kernel still awaiting its `react()` — mirrors
/// `factory_socket`'s `RecoveryNotice` for the same situation on a TCP
/// connection.
#[derive(Debug)]
pub struct AppNotConnected(KernelHeader);

impl AppNotConnected {
    #[must_use]
    pub fn new(id: kernel::KernelId, parent: Option<kernel::KernelId>, from: Endpoint) -> Self {
        let mut header = KernelHeader::new(TypeId::new(0));
        header.id = id;
        header.parent = parent;
        header.flags = Flags::MOVES_DOWNSTREAM | Flags::CARRIES_PARENT;
        header.result = ExitCode::EndpointNotConnected;
        header.from = Some(from);
        Self(header)
    }
}

impl Kernel for AppNotConnected {
    fn header(&self) -> &KernelHeader {
        &self.0
    }
    fn header_mut(&mut self) -> &mut KernelHeader {
        &mut self.0
    }
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel::NullDispatch;
    use std::net::Ipv4Addr;

    #[test]
    fn app_key_is_derived_from_pid() {
        assert_eq!(app_key(4242), 4242);
    }

    #[test]
    fn dispatch_inbound_rejects_unregistered_type() {
        let types = TypeRegistry::new();
        let dispatch = NullDispatch;
        // Should not panic; a warning is logged and nothing is dispatched.
        dispatch_inbound(&Endpoint::new_ipv4(Ipv4Addr::LOCALHOST, 0), TypeId::new(9), &[], &types, &dispatch);
    }
}
