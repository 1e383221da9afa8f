// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT classification

use std::fmt::Display;
use std::net::SocketAddr;

use crate::errors::MobilityError;

/// Port HIP control and ESP traffic are sent to when UDP-encapsulated
pub const HIP_UDP_PORT: u16 = 10500;
/// Destination port of UDP-encapsulated ESP
pub const HIP_ESP_UDP_PORT: u16 = HIP_UDP_PORT;

/// What lies between this host and the classification server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    Open,
    Firewall,
    FullCone,
    RestrictedCone,
    PortRestricted,
    Symmetric,
    Blocked,
    Unknown,
}

impl NatType {
    /// Tells if traffic must be UDP-encapsulated to cross this path
    #[must_use]
    pub fn is_behind_nat(self) -> bool {
        !matches!(self, NatType::Open | NatType::Firewall)
    }
}

impl Display for NatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NatType::Open => "open",
            NatType::Firewall => "firewall",
            NatType::FullCone => "full cone",
            NatType::RestrictedCone => "restricted cone",
            NatType::PortRestricted => "port restricted",
            NatType::Symmetric => "symmetric",
            NatType::Blocked => "blocked",
            NatType::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Classifies the NAT on the path to a server
pub trait NatDetector: Send {
    /// # Errors
    ///
    /// Fails if the classification exchange fails.
    fn detect(&mut self, server: SocketAddr) -> Result<NatType, MobilityError>;
}

/// NAT state as seen by readdressing
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NatStatus {
    pub detection_enabled: bool,
    pub behind_nat: bool,
}
