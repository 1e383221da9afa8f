// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Hand-over of the mobile router's new external address from the mobility context to
//! the dispatch loop.

use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single-slot mailbox. Publishing replaces any address not taken yet: the consumer
/// only ever sees the latest one. The generation counts publications.
#[derive(Debug, Default)]
pub struct ExternalAddressMailbox {
    slot: Mutex<Option<IpAddr>>,
    generation: AtomicU64,
}

impl ExternalAddressMailbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new external address
    pub fn publish(&self, addr: IpAddr) {
        let mut slot = self.slot.lock();
        *slot = Some(addr);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Take the pending address, if any
    pub fn take(&self) -> Option<IpAddr> {
        self.slot.lock().take()
    }

    /// Number of publications so far
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
