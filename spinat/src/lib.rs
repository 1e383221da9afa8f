// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! The mobile router: SPI-based NAT (SPINAT) of the HIP and ESP traffic of the hosts
//! behind it, and proxy readdressing of their associations when its own external
//! address changes.

pub mod errors;
pub mod esp;
pub mod inspect;
pub mod params;
pub mod raw;
pub mod router;
pub mod signer;
pub mod spi;
pub mod table;
pub mod unix;
pub mod update;

#[cfg(test)]
mod test_utils;

// re-exports
pub use errors::SpinatError;
pub use esp::{Direction, EspVerdict, check_esp_packet};
pub use inspect::{Verdict, check_hip_packet};
pub use params::{RouterParams, RouterParamsBuilder};
pub use raw::{PacketSender, RawSockets};
pub use router::{
    ChannelFeed, ControlMessage, Disposition, FeedHandle, FeedMessage, InterceptedPacket,
    MobileRouter, PacketFeed, VerdictRecord,
};
pub use signer::TransformSigner;
pub use spi::{DEFAULT_SPI_RETRY_CAP, SpiAllocator};
pub use table::{
    ClientState, MobileRouterClient, MobileRouterState, ProxyTicket, SharedRouterState,
    SpinatEntry,
};
pub use unix::UnixFeed;
pub use update::{HmacSigner, ProxyUpdate, build_proxy_update, generate_hip_updates};
