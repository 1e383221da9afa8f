// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use net::PacketError;
use net::hip::{HipError, Hit};
use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SpinatError {
    #[error("No unused public SPI found after {attempts} attempts")]
    SpiExhausted { attempts: usize },

    #[error("No mobile router client with HIT {0}")]
    NoSuchClient(Hit),

    #[error("Client {client} has no SPINAT entry for peer {peer}")]
    NoSuchEntry { client: Hit, peer: Hit },

    #[error("No ticket to sign UPDATEs for peer {0}")]
    NoTicket(Hit),

    #[error("Unsupported ESP transform {0}")]
    UnsupportedTransform(u16),

    #[error("Key of {len} bytes too short for ESP transform {transform}")]
    KeyTooShort { transform: u16, len: usize },

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("HIP error: {0}")]
    Hip(#[from] HipError),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Failed to send to {0}: {1}")]
    SendFailure(IpAddr, String),

    #[error("Packet feed error: {0}")]
    Feed(String),
}
