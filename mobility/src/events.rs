// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Address and link events, and a source producing them by polling the interfaces

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, warn};

use crate::address::IfIndex;
use crate::device::{DeviceInfo, DeviceSource};

trace_target!("mobility-events", LevelFilter::INFO, &["mobility"]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LinkUp,
    LinkDown,
    AddrAdd,
    AddrDel,
}

/// A change of the host's links or addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressEvent {
    pub kind: EventKind,
    pub addr: Option<IpAddr>,
    pub ifindex: IfIndex,
}

impl AddressEvent {
    #[must_use]
    pub fn link_up(ifindex: IfIndex) -> Self {
        Self {
            kind: EventKind::LinkUp,
            addr: None,
            ifindex,
        }
    }
    #[must_use]
    pub fn link_down(ifindex: IfIndex) -> Self {
        Self {
            kind: EventKind::LinkDown,
            addr: None,
            ifindex,
        }
    }
    #[must_use]
    pub fn addr_add(addr: IpAddr, ifindex: IfIndex) -> Self {
        Self {
            kind: EventKind::AddrAdd,
            addr: Some(addr),
            ifindex,
        }
    }
    #[must_use]
    pub fn addr_del(addr: IpAddr, ifindex: IfIndex) -> Self {
        Self {
            kind: EventKind::AddrDel,
            addr: Some(addr),
            ifindex,
        }
    }
}

impl Display for AddressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ifindex {}", self.kind, self.ifindex)?;
        if let Some(addr) = self.addr {
            write!(f, " {addr}")?;
        }
        Ok(())
    }
}

/// Addresses of the interfaces that are up, by index
pub type Snapshot = BTreeMap<IfIndex, BTreeSet<IpAddr>>;

#[must_use]
pub fn snapshot(devices: &[DeviceInfo]) -> Snapshot {
    devices
        .iter()
        .filter(|d| d.up)
        .map(|d| (d.index, d.addrs.iter().copied().collect()))
        .collect()
}

/// Events turning `old` into `new`. Removals come first so that a replaced address is
/// seen as deleted before its replacement is added.
#[must_use]
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<AddressEvent> {
    let mut removals = vec![];
    let mut additions = vec![];
    for (ifindex, addrs) in old {
        match new.get(ifindex) {
            None => removals.push(AddressEvent::link_down(*ifindex)),
            Some(now) => removals.extend(
                addrs
                    .difference(now)
                    .map(|a| AddressEvent::addr_del(*a, *ifindex)),
            ),
        }
    }
    for (ifindex, addrs) in new {
        let before = match old.get(ifindex) {
            None => {
                additions.push(AddressEvent::link_up(*ifindex));
                None
            }
            Some(before) => Some(before),
        };
        additions.extend(
            addrs
                .iter()
                .filter(|a| before.is_none_or(|b| !b.contains(*a)))
                .map(|a| AddressEvent::addr_add(*a, *ifindex)),
        );
    }
    removals.extend(additions);
    removals
}

/// Produces [`AddressEvent`]s by rescanning the interfaces periodically. The first scan
/// reports every address, which serves as the initial dump. The source can be started
/// and stopped; the last snapshot survives a restart.
pub struct PollingEventSource {
    run: Arc<AtomicBool>,
    handle: Option<JoinHandle<Snapshot>>,
    last: Option<Snapshot>,
    devices: Arc<dyn DeviceSource>,
    tx: Sender<AddressEvent>,
}

impl PollingEventSource {
    /// Create an event source. Returns it along with the receiving end of its events.
    #[must_use]
    pub fn new(devices: Arc<dyn DeviceSource>) -> (Self, Receiver<AddressEvent>) {
        let (tx, rx) = unbounded();
        let source = Self {
            run: Arc::new(AtomicBool::new(false)),
            handle: None,
            last: Some(Snapshot::new()),
            devices,
            tx,
        };
        (source, rx)
    }

    /// Scan once and send the events found. Returns false if nobody listens anymore.
    fn poll(devices: &dyn DeviceSource, last: &mut Snapshot, tx: &Sender<AddressEvent>) -> bool {
        let current = match devices.interfaces() {
            Ok(found) => snapshot(&found),
            Err(e) => {
                warn!("Interface scan failed: {e}");
                return true;
            }
        };
        for event in diff(last, &current) {
            debug!("Address event: {event}");
            if tx.send(event).is_err() {
                return false;
            }
        }
        *last = current;
        true
    }

    /// Start polling every `period`
    pub fn start(&mut self, period: Duration) {
        let Some(mut last) = self.last.take() else {
            debug!("Event source already running");
            return;
        };
        self.run.store(true, Ordering::Relaxed);
        let run = self.run.clone();
        let devices = self.devices.clone();
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name("addr-events".to_string())
            .spawn(move || {
                while run.load(Ordering::Relaxed) {
                    if !Self::poll(devices.as_ref(), &mut last, &tx) {
                        debug!("Address event receiver gone");
                        break;
                    }
                    thread::sleep(period);
                }
                last
            });
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => error!("Failed to start address event source: {e}"),
        }
    }

    /// Stop polling
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Stopping address event source...");
            self.run.store(false, Ordering::Relaxed);
            match handle.join() {
                Ok(last) => self.last = Some(last),
                Err(_) => self.last = Some(Snapshot::new()),
            }
        }
    }
}

impl Drop for PollingEventSource {
    fn drop(&mut self) {
        self.stop();
    }
}
