// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The timer pipeline (C6): a single thread holding kernels with a
//! scheduled wake time, ordered earliest-first, that hands each one to the
//! dispatcher the instant its deadline elapses. Deadlines are a purely
//! local scheduling concern — they are never serialized onto the wire, so
//! a kernel migrated to another node loses any pending timer registration
//! and must be rescheduled there if still needed.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use priority_queue::PriorityQueue;
use tracing::error;

use id::IdRange;
use kernel::{Dispatch, KernelBox, KernelId, KernelTag};

enum Cmd {
    Schedule(Instant, KernelBox),
    Cancel(KernelId),
}

/// Handle to the running timer thread.
pub struct TimerPipeline {
    tx: Sender<Cmd>,
    thread: Option<JoinHandle<()>>,
}

impl TimerPipeline {
    pub fn start(ids: Arc<IdRange<KernelTag>>, dispatch: Arc<dyn Dispatch>) -> Self {
        let (tx, rx) = unbounded();
        let thread = std::thread::Builder::new()
            .name("factory-timer".to_string())
            .spawn(move || run(rx, ids, dispatch))
            .expect("spawning the timer thread should not fail under normal operating conditions");
        Self {
            tx,
            thread: Some(thread),
        }
    }

    /// Schedule `kernel` to be handed to the dispatcher at `at`. If the
    /// kernel has no id yet, one is assigned from the shared range before
    /// it is ever made visible elsewhere.
    pub fn schedule(&self, at: Instant, kernel: KernelBox) {
        if self.tx.send(Cmd::Schedule(at, kernel)).is_err() {
            error!("timer pipeline is shut down, dropping scheduled kernel");
        }
    }

    /// Cancel a previously scheduled kernel by id, if it hasn't fired yet.
    pub fn cancel(&self, id: KernelId) {
        let _ = self.tx.send(Cmd::Cancel(id));
    }
}

impl Drop for TimerPipeline {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            // Dropping `tx` happens implicitly once `self` is dropped after
            // this, which closes the channel and lets `run` exit its loop.
            let _ = handle.join();
        }
    }
}

fn run(rx: Receiver<Cmd>, ids: Arc<IdRange<KernelTag>>, dispatch: Arc<dyn Dispatch>) {
    let mut queue: PriorityQueue<KernelId, Reverse<Instant>> = PriorityQueue::new();
    let mut payloads: HashMap<KernelId, KernelBox> = HashMap::new();

    loop {
        let timeout = queue
            .peek()
            .map(|(_, Reverse(at))| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        match rx.recv_timeout(timeout) {
            Ok(Cmd::Schedule(at, mut kernel)) => {
                let id = if kernel.header().id.is_nil() {
                    ids.generate()
                } else {
                    kernel.header().id
                };
                kernel.header_mut().id = id;
                payloads.insert(id, kernel);
                queue.push(id, Reverse(at));
            }
            Ok(Cmd::Cancel(id)) => {
                queue.remove(&id);
                payloads.remove(&id);
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                while let Some((_, Reverse(at))) = queue.peek() {
                    if *at > now {
                        break;
                    }
                    if let Some((id, _)) = queue.pop()
                        && let Some(kernel) = payloads.remove(&id)
                    {
                        metrics::counter!("factory_kernels_dispatched_total", "pipeline" => "timer")
                            .increment(1);
                        dispatch.dispatch(kernel);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel::{Action, ExitCode, Kernel, KernelHeader, TypeId};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Tick(KernelHeader);
    impl Kernel for Tick {
        fn header(&self) -> &KernelHeader {
            &self.0
        }
        fn header_mut(&mut self) -> &mut KernelHeader {
            &mut self.0
        }
        fn act(&mut self) -> Vec<Action> {
            vec![Action::Commit(ExitCode::Success)]
        }
        fn write_payload(&self, _buf: &mut Vec<u8>) {}
    }

    struct CollectDispatch(Arc<Mutex<Vec<KernelId>>>);
    impl Dispatch for CollectDispatch {
        fn dispatch(&self, kernel: KernelBox) {
            self.0.lock().unwrap().push(kernel.header().id);
        }
    }

    #[test]
    fn fires_in_deadline_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ids = Arc::new(IdRange::new(1, 1_000_000).unwrap());
        let timer = TimerPipeline::start(ids, Arc::new(CollectDispatch(Arc::clone(&seen))));

        let now = Instant::now();
        let mut late = KernelHeader::new(TypeId::new(1));
        late.id = KernelId::from_raw(2);
        let mut early = KernelHeader::new(TypeId::new(1));
        early.id = KernelId::from_raw(1);

        timer.schedule(now + Duration::from_millis(120), Box::new(Tick(late)));
        timer.schedule(now + Duration::from_millis(20), Box::new(Tick(early)));

        std::thread::sleep(Duration::from_millis(250));
        let got = seen.lock().unwrap().clone();
        assert_eq!(got, vec![KernelId::from_raw(1), KernelId::from_raw(2)]);
    }

    #[test]
    fn cancel_prevents_firing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ids = Arc::new(IdRange::new(1, 1_000_000).unwrap());
        let timer = TimerPipeline::start(ids, Arc::new(CollectDispatch(Arc::clone(&seen))));

        let mut header = KernelHeader::new(TypeId::new(1));
        header.id = KernelId::from_raw(9);
        timer.schedule(Instant::now() + Duration::from_millis(40), Box::new(Tick(header)));
        timer.cancel(KernelId::from_raw(9));

        std::thread::sleep(Duration::from_millis(150));
        assert!(seen.lock().unwrap().is_empty());
    }
}
