// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The mobility control loop

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

use crate::events::AddressEvent;
use crate::state::MobilityState;

trace_target!("mobility-monitor", LevelFilter::INFO, &["mobility"]);

/// Feeds address events to the mobility state until told to stop or the event source
/// goes away
pub struct MobilityMonitor {
    state: MobilityState,
    events: Receiver<AddressEvent>,
    tick: Duration,
}

impl MobilityMonitor {
    #[must_use]
    pub fn new(state: MobilityState, events: Receiver<AddressEvent>, tick: Duration) -> Self {
        Self {
            state,
            events,
            tick,
        }
    }

    /// Handle one event, reselecting the preferred address when one was added
    pub fn process(&mut self, event: &AddressEvent) {
        if self.state.handle_address_event(event) {
            self.state.select_preferred_address();
        }
    }

    /// Run until `run` is cleared. The flag is checked at least every tick.
    pub fn run(&mut self, run: &Arc<AtomicBool>) {
        info!("Mobility monitor started");
        while run.load(Ordering::Relaxed) {
            match self.events.recv_timeout(self.tick) {
                Ok(event) => self.process(&event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Address event source closed");
                    break;
                }
            }
        }
        debug!("Mobility monitor stopped");
    }

    #[must_use]
    pub fn state(&self) -> &MobilityState {
        &self.state
    }

    #[must_use]
    pub fn into_state(self) -> MobilityState {
        self.state
    }
}
