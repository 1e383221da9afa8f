// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Address management and mobility of a HIP host: the host's own addresses, the
//! choice of a preferred one, and the readdressing of associations as addresses come
//! and go.

pub mod address;
pub mod association;
pub mod config;
pub mod device;
pub mod errors;
pub mod events;
pub mod identity;
pub mod mailbox;
pub mod monitor;
pub mod nat;
pub mod selector;
pub mod state;

// re-exports
pub use address::{AddressList, AddressRecord, AddressStatus, IfIndex, RecordId, RemoveBy};
pub use association::{
    AssocState, Association, DataPlane, DelOutcome, Rekey, SaController, SaDirection,
    UpdateSender,
};
pub use config::{MobilityConfig, MobilityConfigBuilder};
pub use device::{DeviceInfo, DeviceSource, NetdevSource};
pub use errors::MobilityError;
pub use events::{AddressEvent, EventKind, PollingEventSource};
pub use identity::HostIdentity;
pub use mailbox::ExternalAddressMailbox;
pub use monitor::MobilityMonitor;
pub use nat::{NatDetector, NatType};
pub use selector::{Selection, select_preferred_address};
pub use state::MobilityState;
