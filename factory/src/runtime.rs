// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The root `Dispatch` implementation (C12): the one object every pipeline
//! is handed an `Arc<dyn kernel::Dispatch>` pointing at, applying
//! [`Router::classify`] to decide which of the four pipelines a kernel
//! that a worker couldn't itself finish serving lands on next.
//!
//! Each pipeline's constructor wants that `Arc<dyn Dispatch>` before it can
//! itself start, so `Factory` is built empty — every pipeline slot starts
//! `None` — and filled in once each pipeline has actually started. A
//! kernel handed to `dispatch()` before its target pipeline is installed
//! (which should never happen in practice, since nothing submits a kernel
//! before `main` finishes wiring everything up) is logged and dropped
//! rather than panicking the caller's thread.

use std::sync::Mutex;
use std::time::Instant;

use tracing::{error, warn};

use ipc::{IpcError, ProcessPipeline};
use kernel::{Dispatch, KernelBox};
use pipeline::{CpuPipeline, Destination, PipelineError, RouteContext, Router, TimerPipeline};
use socket::{SocketError, SocketPipeline};
use wire::Endpoint;

pub struct Factory {
    cpu: Mutex<Option<CpuPipeline>>,
    timer: Mutex<Option<TimerPipeline>>,
    socket: Mutex<Option<SocketPipeline>>,
    process: Mutex<Option<ProcessPipeline>>,
    local_endpoints: Vec<Endpoint>,
    app_endpoints: Vec<Endpoint>,
}

impl Factory {
    #[must_use]
    pub fn new(local_endpoints: Vec<Endpoint>, app_endpoints: Vec<Endpoint>) -> Self {
        Self {
            cpu: Mutex::new(None),
            timer: Mutex::new(None),
            socket: Mutex::new(None),
            process: Mutex::new(None),
            local_endpoints,
            app_endpoints,
        }
    }

    pub fn install_cpu(&self, pipeline: CpuPipeline) {
        *lock(&self.cpu) = Some(pipeline);
    }

    pub fn install_timer(&self, pipeline: TimerPipeline) {
        *lock(&self.timer) = Some(pipeline);
    }

    pub fn install_socket(&self, pipeline: SocketPipeline) {
        *lock(&self.socket) = Some(pipeline);
    }

    pub fn install_process(&self, pipeline: ProcessPipeline) {
        *lock(&self.process) = Some(pipeline);
    }

    fn route_context(&self, kernel: &KernelBox, at: Option<Instant>) -> RouteContext {
        let to = kernel.header().to.as_ref();
        RouteContext {
            local_endpoints: self.local_endpoints.clone(),
            has_future_deadline: at.is_some_and(|when| when > Instant::now()),
            is_process_target: to.is_some_and(|to| self.app_endpoints.contains(to)),
        }
    }

    /// Stop every installed pipeline, trunk first (the pipelines that talk
    /// to the outside world) then leaves (the ones that only ever receive
    /// from `dispatch`), per §4.12. Socket and process shutdown is given a
    /// few iterations to let their in-flight saved-upstream kernels recover
    /// on their own before the thread is torn down out from under them.
    pub fn stop(&self) {
        const DRAIN_ITERATIONS: u32 = 20;
        const DRAIN_STEP: std::time::Duration = std::time::Duration::from_millis(50);
        for _ in 0..DRAIN_ITERATIONS {
            std::thread::sleep(DRAIN_STEP);
        }

        if let Some(socket) = lock(&self.socket).take() {
            socket.stop();
        }
        if let Some(process) = lock(&self.process).take() {
            process.stop();
        }
        // `TimerPipeline` has no explicit `stop`; dropping the handle closes
        // its command channel, which its thread treats as the signal to
        // exit, and `Drop` joins it.
        drop(lock(&self.timer).take());
        if let Some(cpu) = lock(&self.cpu).take() {
            cpu.stop();
        }
    }
}

impl Dispatch for Factory {
    fn dispatch(&self, kernel: KernelBox) {
        let at = kernel.at();
        let ctx = self.route_context(&kernel, at);
        match Router::classify(kernel.header(), &ctx) {
            Destination::Cpu => {
                let guard = lock(&self.cpu);
                match guard.as_ref() {
                    Some(cpu) => log_pipeline_err(cpu.submit(kernel), "cpu"),
                    None => warn!("cpu pipeline not yet started, dropping kernel"),
                }
            }
            Destination::Timer => {
                let guard = lock(&self.timer);
                match guard.as_ref() {
                    Some(timer) => timer.schedule(at.unwrap_or_else(Instant::now), kernel),
                    None => warn!("timer pipeline not yet started, dropping kernel"),
                }
            }
            Destination::Socket => {
                let guard = lock(&self.socket);
                match guard.as_ref() {
                    Some(socket) => log_socket_err(socket.submit(kernel)),
                    None => warn!("socket pipeline not yet started, dropping kernel"),
                }
            }
            Destination::Process => {
                let guard = lock(&self.process);
                match guard.as_ref() {
                    Some(process) => log_ipc_err(process.submit(kernel)),
                    None => warn!("process pipeline not yet started, dropping kernel"),
                }
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn log_pipeline_err(result: Result<(), PipelineError>, pipeline: &str) {
    if let Err(e) = result {
        error!(pipeline, error = %e, "failed to submit kernel");
    }
}

fn log_socket_err(result: Result<(), SocketError>) {
    if let Err(e) = result {
        error!(pipeline = "socket", error = %e, "failed to submit kernel");
    }
}

fn log_ipc_err(result: Result<(), IpcError>) {
    if let Err(e) = result {
        error!(pipeline = "process", error = %e, "failed to submit kernel");
    }
}
