// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

mod standalone;

use args::{CmdArgs, Parser};
use mobility::{
    DataPlane, DeviceSource, ExternalAddressMailbox, MobilityConfig, MobilityConfigBuilder,
    MobilityMonitor, MobilityState, NetdevSource, PollingEventSource,
};
use spinat::{
    ClientState, MobileRouter, MobileRouterState, RawSockets, RouterParamsBuilder, SpiAllocator,
    TransformSigner, UnixFeed,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::standalone::{LoggedSa, LoggedUpdates};
use tracectl::{get_trace_ctl, trace_target};

use tracing::{error, info, level_filters::LevelFilter, warn};

trace_target!("hipmr", LevelFilter::DEBUG, &["hipmr"]);
fn init_logging() {
    let tctl = get_trace_ctl();
    tctl.set_default_level(LevelFilter::INFO);
}

fn mobility_config(args: &CmdArgs) -> MobilityConfig {
    let mut builder = MobilityConfigBuilder::default();
    builder
        .mobile_router(args.mobile_router())
        .nat_detection(args.nat_detection())
        .poll_period(args.poll_period());
    if let Some(addr) = args.preferred_address() {
        builder.preferred_address(addr);
    }
    if let Some(iface) = args.preferred_iface() {
        builder.preferred_iface(iface);
    }
    if let Some(iface) = args.external_iface() {
        builder.outbound_iface(iface);
    }
    if let Some(server) = args.stun_server() {
        builder.stun_server(server);
    }
    let Ok(config) = builder.build() else {
        error!("Bad mobility configuration");
        panic!("Bad mobility configuration");
    };
    config
}

/// Scan the addresses, pick the preferred one and start following address events
fn start_mobility(
    config: MobilityConfig,
    mailbox: &Arc<ExternalAddressMailbox>,
    run: &Arc<AtomicBool>,
) -> (PollingEventSource, JoinHandle<()>) {
    info!("{config}");
    let devices: Arc<dyn DeviceSource> = Arc::new(NetdevSource);
    let dataplane = DataPlane {
        sa: Box::new(LoggedSa),
        updates: Box::new(LoggedUpdates),
    };
    let poll_period = config.poll_period;
    let mut state = MobilityState::new(config, devices.clone(), dataplane, mailbox.clone());
    if let Err(e) = state.get_my_addresses() {
        error!("Failed to read local addresses: {e}");
        panic!("Failed to read local addresses: {e}");
    }
    let selection = state.select_preferred_address();
    match (selection.preferred, selection.external_ifindex) {
        (Some(addr), Some(ext)) if state.registry().find(&addr) == Some(ext) => {
            mailbox.publish(addr);
        }
        (None, _) => warn!("No preferred address found"),
        _ => {}
    }

    let (mut events, rx) = PollingEventSource::new(devices);
    events.start(poll_period);
    let run = run.clone();
    let Ok(handle) = thread::Builder::new()
        .name("mobility".to_string())
        .spawn(move || MobilityMonitor::new(state, rx, poll_period).run(&run))
    else {
        error!("Failed to start mobility monitor");
        panic!("Failed to start mobility monitor");
    };
    (events, handle)
}

/// Start the mobile router thread, fed by the interception adapter through the feed
/// socket. Failing to start is logged: the rest of the process keeps running.
fn start_mobile_router(
    args: &CmdArgs,
    mailbox: &Arc<ExternalAddressMailbox>,
    run: &Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let mut builder = RouterParamsBuilder::default();
    builder
        .timeout(args.dispatch_timeout())
        .spi_retry_cap(args.spi_retry_cap())
        .locator_lifetime(args.locator_lifetime());
    if let Some(iface) = args.external_iface() {
        builder.external_iface(iface);
    }
    let Ok(params) = builder.build() else {
        error!("Bad mobile router configuration");
        return None;
    };
    info!("{params}");

    let mut state = MobileRouterState::new(SpiAllocator::new(params.spi_retry_cap));
    for client in args.clients() {
        state.add_client(client.hit, client.addr);
        if let Err(e) = state.set_client_state(&client.hit, ClientState::ResponseSent) {
            warn!("Client {} not registered: {e}", client.hit);
        }
    }

    let mut feed = match UnixFeed::bind(args.feed_socket()) {
        Ok(feed) => feed,
        Err(e) => {
            error!("Mobile router not started: {e}");
            return None;
        }
    };

    let sockets = match RawSockets::open() {
        Ok(sockets) => sockets,
        Err(e) => {
            error!("Mobile router not started: {e}");
            return None;
        }
    };
    let mut router = MobileRouter::new(params, state.shared(), mailbox.clone(), Box::new(sockets))
        .with_signer(Box::new(TransformSigner));
    info!("Mobile router feed at {}", feed.path().display());
    let run = run.clone();
    let spawned = thread::Builder::new()
        .name("mobile-router".to_string())
        .spawn(move || {
            if let Err(e) = router.run(&mut feed, &run) {
                error!("Mobile router stopped: {e}");
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to start mobile router: {e}");
            None
        }
    }
}

fn main() {
    /* parse cmd line args */
    let args = CmdArgs::parse();
    if let Some(tracing) = args.tracing()
        && let Err(e) = get_trace_ctl().setup_from_string(tracing)
    {
        error!("Invalid tracing configuration: {e}");
        panic!("Invalid tracing configuration: {e}");
    }
    if args.show_tracing_tags() {
        get_trace_ctl().dump_targets_by_tag();
        std::process::exit(0);
    }
    if args.show_tracing_targets() {
        get_trace_ctl().dump();
        std::process::exit(0);
    }

    /* initialize logging */
    init_logging();
    info!("Starting HIP mobility daemon...");

    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        error!("Failed to set SIGINT handler: {e}");
        panic!("Failed to set SIGINT handler: {e}");
    }

    let run = Arc::new(AtomicBool::new(true));
    let mailbox = Arc::new(ExternalAddressMailbox::new());
    let (mut events, monitor) = start_mobility(mobility_config(&args), &mailbox, &run);
    let router = if args.mobile_router() {
        start_mobile_router(&args, &mailbox, &run)
    } else {
        None
    };

    if stop_rx.recv().is_err() {
        warn!("Stop signal channel closed");
    }
    info!("Shutting down");
    run.store(false, Ordering::Relaxed);
    events.stop();
    for handle in std::iter::once(monitor).chain(router) {
        if handle.join().is_err() {
            error!("A worker thread panicked");
        }
    }
    std::process::exit(0);
}
