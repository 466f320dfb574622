// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Generic child-application mode (`APP_ID` non-zero, §6): rather than
//! starting a node's full pipeline set, read the two shared-memory rings
//! the parent factory wired up via [`ipc::pipeline::ENV_RING_FROM_PARENT`]/
//! [`ipc::pipeline::ENV_RING_TO_PARENT`] and acknowledge every kernel sent
//! to us.
//!
//! A real application built on this runtime (the numeric kernels of the
//! autoregressive simulation this was built to host, for instance) would
//! register its own kernel types and do actual work in `act`/`react`
//! instead of immediately committing; that payload logic is out of scope
//! here. This loop exercises the wire mechanics of the process pipeline
//! end to end — ring framing, header round-trip, direction flip on
//! reply — with the simplest possible kernel body: none.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use ipc::pipeline::{ENV_RING_FROM_PARENT, ENV_RING_TO_PARENT};
use ipc::ring::SharedRing;
use kernel::{Flags, KernelHeader};
use wire::FrameDecoder;
use wire::frame::write_frame;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Run as a child application until `shutdown` is set. Exits early (and
/// logs) if the ring paths named in the environment can't be opened —
/// that means the parent never finished spawning us correctly.
pub fn run(shutdown: &Arc<AtomicBool>) {
    let Ok(from_parent_path) = std::env::var(ENV_RING_FROM_PARENT) else {
        error!(
            var = ENV_RING_FROM_PARENT,
            "child application started without its inbound ring path, exiting"
        );
        return;
    };
    let Ok(to_parent_path) = std::env::var(ENV_RING_TO_PARENT) else {
        error!(
            var = ENV_RING_TO_PARENT,
            "child application started without its outbound ring path, exiting"
        );
        return;
    };

    let from_parent = match SharedRing::open(&from_parent_path) {
        Ok(ring) => ring,
        Err(e) => {
            error!(error = %e, path = %from_parent_path, "failed to open inbound ring");
            return;
        }
    };
    let to_parent = match SharedRing::open(&to_parent_path) {
        Ok(ring) => ring,
        Err(e) => {
            error!(error = %e, path = %to_parent_path, "failed to open outbound ring");
            return;
        }
    };

    info!("child application ready, acknowledging every kernel it receives");
    let mut decoder = FrameDecoder::new();
    while !shutdown.load(Ordering::Relaxed) {
        decoder.fill(&from_parent.pop_all());
        loop {
            match decoder.try_take_frame() {
                Ok(Some((type_id, body))) => acknowledge(&to_parent, type_id, &body),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "malformed frame from parent, dropping rest of buffer");
                    break;
                }
            }
        }
        decoder.compact();
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Parse just the header out of `body`, turn it around (swap `from`/`to`,
/// clear the upstream flag, set the downstream one), mark it
/// `ExitCode::Success`, and send it back with no payload.
fn acknowledge(to_parent: &SharedRing, type_id: u16, body: &[u8]) {
    let mut reader = wire::be::Reader::new(body);
    let Ok(mut header) = KernelHeader::read(kernel::TypeId::new(type_id), &mut reader) else {
        warn!("failed to decode kernel header from parent, dropping");
        return;
    };

    header.to = header.from.take();
    header.flags.remove(Flags::MOVES_UPSTREAM);
    header.flags.insert(Flags::MOVES_DOWNSTREAM);
    header.result = kernel::ExitCode::Success;

    let mut out = Vec::new();
    header.write(&mut out);
    let frame = write_frame(type_id, &out);
    if let Err(e) = to_parent.push(&frame) {
        error!(error = %e, "failed to push acknowledgement onto outbound ring");
    }
}
