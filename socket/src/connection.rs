// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-peer connection state (§4.7): a framed read/write buffer pair over a
//! `mio::net::TcpStream`, plus the upstream-saved bookkeeping the recovery
//! algorithm needs when the connection is lost.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};

use mio::net::TcpStream;
use wire::frame::{FrameError, write_frame};
use wire::{Endpoint, FrameDecoder};

use kernel::{KernelId, TypeId};

/// One kernel this connection has forwarded upstream, not yet replied to.
/// Recovery needs only enough to call [`kernel::InstanceRegistry`]-backed
/// `react()` locally: the parent (if any) that should be told the reply
/// will never come.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamSaved {
    pub parent: Option<KernelId>,
}

/// A connection to one peer: socket, framed buffers, and the upstream-saved
/// map consulted by [`crate::reactor::recover`] on link loss.
pub struct Connection {
    pub(crate) stream: TcpStream,
    pub(crate) peer: Endpoint,
    decoder: FrameDecoder,
    write_buf: Vec<u8>,
    write_pos: usize,
    pub(crate) upstream_saved: HashMap<KernelId, UpstreamSaved>,
    /// Kernels received on this connection and currently executing
    /// locally; recovered implicitly through the ordinary `to = from`
    /// completion path (see `factory-pipeline`'s `CpuPipeline::commit`),
    /// tracked here only so `factory_connections_active`-style metrics can
    /// report how much work a dropped peer had in flight.
    pub(crate) downstream_pending: std::collections::HashSet<KernelId>,
}

impl Connection {
    #[must_use]
    pub fn new(stream: TcpStream, peer: Endpoint) -> Self {
        Self {
            stream,
            peer,
            decoder: FrameDecoder::new(),
            write_buf: Vec::new(),
            write_pos: 0,
            upstream_saved: HashMap::new(),
            downstream_pending: std::collections::HashSet::new(),
        }
    }

    /// Queue a frame for transmission; actual bytes go out on the next
    /// writable poll event via [`Connection::flush`].
    pub fn enqueue_frame(&mut self, type_id: TypeId, body: &[u8]) {
        self.write_buf.extend(write_frame(type_id.into_raw(), body));
    }

    /// `true` once something is buffered waiting to go out, so the reactor
    /// knows to register interest in writability.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        self.write_pos < self.write_buf.len()
    }

    /// Drain as much of the write buffer as the socket accepts without
    /// blocking. `Ok(true)` means everything queued so far has been sent.
    pub fn flush(&mut self) -> io::Result<bool> {
        while self.write_pos < self.write_buf.len() {
            match self.stream.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => self.write_pos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.write_buf.clear();
        self.write_pos = 0;
        Ok(true)
    }

    /// Read whatever is available into the frame decoder without blocking.
    /// Returns `Ok(false)` on a clean peer shutdown (0-byte read).
    pub fn fill(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => self.decoder.fill(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pop every complete frame currently buffered.
    pub fn take_frames(&mut self) -> Result<Vec<(TypeId, Vec<u8>)>, FrameError> {
        let mut out = Vec::new();
        while let Some((type_id, body)) = self.decoder.try_take_frame()? {
            out.push((TypeId::new(type_id), body));
        }
        self.decoder.compact();
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpStream as StdTcpStream;
    use std::time::Duration;

    fn connected_pair() -> (Connection, Connection) {
        let (listener, endpoint) = test_utils::loopback_listener();
        let addr = endpoint.to_socket_addr().expect("loopback endpoint is always ipv4");
        let client_std = StdTcpStream::connect(addr).unwrap();
        let (server_std, peer_addr) = listener.accept().unwrap();
        client_std.set_nonblocking(true).unwrap();
        server_std.set_nonblocking(true).unwrap();
        let client = Connection::new(TcpStream::from_std(client_std), endpoint);
        let server = Connection::new(TcpStream::from_std(server_std), Endpoint::from(peer_addr));
        (client, server)
    }

    #[test]
    fn enqueue_flush_fill_take_frames_roundtrip() {
        let (mut client, mut server) = connected_pair();
        client.enqueue_frame(TypeId::new(7), b"hello");
        assert!(client.flush().unwrap());

        // give the kernel a moment to deliver the bytes to the peer socket
        std::thread::sleep(Duration::from_millis(20));
        assert!(server.fill().unwrap());
        let frames = server.take_frames().unwrap();
        assert_eq!(frames, vec![(TypeId::new(7), b"hello".to_vec())]);
    }

    #[test]
    fn has_pending_writes_reflects_buffer_state() {
        let (mut client, _server) = connected_pair();
        assert!(!client.has_pending_writes());
        client.enqueue_frame(TypeId::new(1), b"x");
        assert!(client.has_pending_writes());
        client.flush().unwrap();
        assert!(!client.has_pending_writes());
    }

    #[test]
    fn fill_reports_clean_shutdown() {
        let (client, mut server) = connected_pair();
        drop(client);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!server.fill().unwrap());
    }
}
