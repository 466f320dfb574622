// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

//! The factory binary (C12): resolves configuration, wires the four
//! pipelines to a single `Factory` dispatcher, drives discovery, and
//! blocks until asked to stop.
//!
//! An `APP_ID`-tagged invocation skips all of that and runs as a child
//! application instead (see [`child_app`]).

mod child_app;
mod runtime;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use factory_config::NodeConfig;
use hierarchy::Hierarchy;
use id::IdRange;
use kernel::{InstanceRegistry, KernelTag, TypeRegistry};
use pipeline::{CpuPipeline, TimerPipeline};
use runtime::Factory;
use wire::Endpoint;

/// Worker-queue depth for the CPU pipeline. Generous enough that a burst
/// of discovery traffic on a freshly started node never backs up into
/// `submit` returning `PipelineError::QueueFull`.
const CPU_QUEUE_DEPTH: usize = 4096;

/// Trace targets the pipeline/socket/process/discovery crates log under,
/// registered here rather than self-registered by those crates, since
/// none of them depend on `tracectl` themselves.
const TRACE_TARGETS: [&str; 5] = [
    "factory::cpu",
    "factory::timer",
    "factory::socket",
    "factory::process",
    "factory::discovery",
];

/// Largest neighbourhood [`enumerate_subnet`] will enumerate, regardless
/// of how wide the configured netmask actually is. A `/8` network has
/// sixteen million host addresses; probing all of them on every
/// discovery round would be absurd, so we cap at a `/16`-sized slice and
/// warn once that the rest of the subnet is unreachable.
const MAX_NEIGHBOURHOOD_HOST_BITS: u32 = 16;

fn main() -> std::process::ExitCode {
    tracectl::TracingControl::init();
    register_trace_targets();

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration, aborting before any pipeline starts");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Some(app_id) = config.app_id {
        info!(app_id, "starting as a child application");
        let shutdown = Arc::new(AtomicBool::new(false));
        install_signal_handler(&shutdown);
        child_app::run(&shutdown);
        return std::process::ExitCode::SUCCESS;
    }

    if let Err(e) = install_metrics_exporter(config.port) {
        warn!(error = %e, "failed to start metrics exporter, continuing without one");
    }

    run_node(config)
}

fn run_node(config: NodeConfig) -> std::process::ExitCode {
    let hierarchy = Arc::new(Hierarchy::new());
    let local_endpoints = vec![Endpoint::new_ipv4(config.address, config.port)];
    let app_endpoints = config.apps.iter().map(|a| Endpoint::unix(a.name.clone())).collect();

    let factory = Arc::new(Factory::new(local_endpoints, app_endpoints));
    let dispatch: Arc<dyn kernel::Dispatch> = factory.clone();

    let self_addr = config.address;
    let netmask = config.netmask;
    let engine = discovery::DiscoveryEngine::new(
        self_addr,
        netmask,
        config.port,
        hierarchy,
        dispatch.clone(),
        move || enumerate_subnet(self_addr, netmask),
    );

    let mut types = TypeRegistry::new();
    if let Err(e) = engine.register_types(&mut types) {
        error!(error = %e, "failed to register discovery kernel types, aborting");
        return std::process::ExitCode::FAILURE;
    }
    let types = Arc::new(types);

    let (default_pos0, pos1) = discovery::address::interface_range(config.address, config.netmask);
    let pos0 = config.start_id.unwrap_or(default_pos0).max(1);
    let ids: Arc<IdRange<KernelTag>> = match IdRange::new(pos0, pos1) {
        Ok(range) => Arc::new(range),
        Err(e) => {
            error!(error = %e, pos0, pos1, "invalid kernel-id range for this interface, aborting");
            return std::process::ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(InstanceRegistry::new());

    // Leaves first: the CPU and timer pipelines never reach back out to
    // the network or a child process, so they can be up and ready before
    // anything that might hand them work arrives.
    let cpu = match CpuPipeline::start(config.workers, CPU_QUEUE_DEPTH, registry, ids.clone(), dispatch.clone()) {
        Ok(cpu) => cpu,
        Err(e) => {
            error!(error = %e, "failed to start cpu pipeline, aborting");
            return std::process::ExitCode::FAILURE;
        }
    };
    factory.install_cpu(cpu);
    factory.install_timer(TimerPipeline::start(ids.clone(), dispatch.clone()));

    let ring_dir = std::env::temp_dir().join(format!("factory-{}-{}", config.address, config.port));
    if let Err(e) = std::fs::create_dir_all(&ring_dir) {
        error!(error = %e, dir = %ring_dir.display(), "failed to create ipc ring directory, aborting");
        return std::process::ExitCode::FAILURE;
    }
    let process = match ipc::ProcessPipeline::start(
        config.app_paths(),
        &ring_dir,
        ipc::pipeline::DEFAULT_RING_CAPACITY,
        ids.clone(),
        types.clone(),
        dispatch.clone(),
    ) {
        Ok(process) => process,
        Err(e) => {
            error!(error = %e, "failed to start process pipeline, aborting");
            return std::process::ExitCode::FAILURE;
        }
    };
    factory.install_process(process);

    let listen_on = vec![SocketAddr::V4(SocketAddrV4::new(config.address, config.port))];
    let socket = match socket::SocketPipeline::start(listen_on, ids, types, dispatch, config.use_localhost) {
        Ok(socket) => socket,
        Err(e) => {
            error!(error = %e, "failed to start socket pipeline, aborting");
            return std::process::ExitCode::FAILURE;
        }
    };
    factory.install_socket(socket);

    info!(
        address = %config.address,
        port = config.port,
        workers = config.workers,
        "factory node started"
    );

    // Give peers already on the subnet a moment to finish their own
    // startup before the first principal search (§6's `WAIT_TIME`).
    std::thread::sleep(config.wait_time);
    engine.start();

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handler(&shutdown);
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, stopping pipelines");
    factory.stop();
    std::process::ExitCode::SUCCESS
}

fn register_trace_targets() {
    let ctl = tracectl::get_trace_ctl();
    for target in TRACE_TARGETS {
        ctl.register(target, tracectl::LevelFilter::INFO, &["factory"]);
    }
}

/// Start the Prometheus exporter on `base_port + 1000`, offset so that
/// several nodes started on the same host with distinct `--port` values
/// don't collide on a shared metrics port.
fn install_metrics_exporter(base_port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, base_port.wrapping_add(1000)));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "metrics exporter listening");
    Ok(())
}

/// List every host address in `addr`'s subnet worth asking about,
/// excluding `addr` itself. Capped at [`MAX_NEIGHBOURHOOD_HOST_BITS`] so
/// a wide netmask (e.g. a `/8` handed in by mistake) doesn't turn every
/// discovery round into a scan of sixteen million addresses.
fn enumerate_subnet(addr: Ipv4Addr, netmask: Ipv4Addr) -> Vec<Ipv4Addr> {
    let full_host_bits = (!u32::from(netmask)).count_ones();
    let host_bits = full_host_bits.min(MAX_NEIGHBOURHOOD_HOST_BITS);
    if host_bits < full_host_bits {
        warn!(
            full_host_bits,
            cap = MAX_NEIGHBOURHOOD_HOST_BITS,
            "subnet wider than the discovery neighbourhood cap, only scanning part of it"
        );
    }

    let network = u32::from(addr) & u32::from(netmask);
    (0u32..(1u32 << host_bits))
        .map(|host| Ipv4Addr::from(network | host))
        .filter(|&candidate| candidate != addr)
        .collect()
}

/// Catch SIGINT/SIGTERM and flip `shutdown`, mirroring the channel-based
/// stop signal `dataplane`'s binary uses, but with an `AtomicBool` in
/// place of an `mpsc` channel since nothing here needs to carry a payload.
fn install_signal_handler(shutdown: &Arc<AtomicBool>) {
    let shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed)) {
        warn!(error = %e, "failed to install signal handler, relying on the process being killed directly");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enumerate_subnet_excludes_self() {
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        let netmask = Ipv4Addr::new(255, 255, 255, 0);
        let neighbours = enumerate_subnet(addr, netmask);
        assert_eq!(neighbours.len(), 255);
        assert!(!neighbours.contains(&addr));
        assert!(neighbours.contains(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(neighbours.contains(&Ipv4Addr::new(10, 0, 0, 0)));
    }

    #[test]
    fn enumerate_subnet_caps_very_wide_networks() {
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        let netmask = Ipv4Addr::new(255, 0, 0, 0);
        let neighbours = enumerate_subnet(addr, netmask);
        assert_eq!(neighbours.len(), (1usize << MAX_NEIGHBOURHOOD_HOST_BITS) - 1);
    }

    #[test]
    fn enumerate_subnet_host_only_mask_is_empty() {
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        let netmask = Ipv4Addr::new(255, 255, 255, 255);
        assert!(enumerate_subnet(addr, netmask).is_empty());
    }
}
