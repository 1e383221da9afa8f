// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Address families and the address classes that address selection cares about.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The family of an IP address or packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl Family {
    /// The family of the given address
    #[must_use]
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::Ipv4,
            IpAddr::V6(_) => Family::Ipv6,
        }
    }

    /// The opposite family
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Family::Ipv4 => Family::Ipv6,
            Family::Ipv6 => Family::Ipv4,
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Ipv4 => write!(f, "IPv4"),
            Family::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Tells if an address is a local-scope identifier (1.0.0.0/8). These are virtual
/// addresses handed to legacy applications and never leave the host.
#[must_use]
pub fn is_lsi(addr: &IpAddr) -> bool {
    matches!(addr, IpAddr::V4(a) if a.octets()[0] == 1)
}

/// Tells if an address is an IPv4 auto-configuration address (169.254/16)
#[must_use]
pub fn is_autoconf(addr: &IpAddr) -> bool {
    matches!(addr, IpAddr::V4(a) if a.is_link_local())
}

/// Tells if an IPv4 address may not be used as a unicast peer address
#[must_use]
pub fn is_multicast_or_broadcast(addr: &Ipv4Addr) -> bool {
    addr.is_multicast() || addr.is_broadcast()
}

/// Express an address as IPv6, mapping IPv4 addresses into `::ffff:a.b.c.d`
#[must_use]
pub fn to_ipv6_mapped(addr: &IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(a) => a.to_ipv6_mapped(),
        IpAddr::V6(a) => *a,
    }
}
