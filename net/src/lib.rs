// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![forbid(unsafe_code)]
#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Wire-level types for HIP mobility: owned IP packets, HIP control messages and their
//! parameters, ESP SPI access, the HIP checksum and IPv4/IPv6 family translation.

pub mod addr;
pub mod checksum;
pub mod esp;
pub mod hip;
pub mod packet;
pub mod translate;

pub use addr::Family;
pub use packet::{IpPacket, PacketError};
