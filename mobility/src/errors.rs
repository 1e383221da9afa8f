// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use crate::address::RecordId;
use net::hip::Hit;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MobilityError {
    #[error("No interface named '{0}'")]
    NoSuchDevice(String),

    #[error("Failed to read interfaces: {0}")]
    DeviceScan(String),

    #[error("Address record {0} is the current address and cannot be removed")]
    CurrentRecord(RecordId),

    #[error("No address record {0}")]
    NoSuchRecord(RecordId),

    #[error("No peer with HIT {0}")]
    NoSuchPeer(Hit),

    #[error("Data-plane SA error: {0}")]
    SaFailure(String),

    #[error("Failed to send UPDATE to {0}: {1}")]
    SendFailure(IpAddr, String),

    #[error("NAT detection failed: {0}")]
    NatDetection(String),
}
