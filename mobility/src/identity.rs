// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Host identities and their addresses

use net::hip::Hit;
use std::fmt::Display;
use std::net::IpAddr;

use crate::address::{AddressList, IfIndex};

/// A local or peer host identity. The current record of its address list is the
/// address associations use for it.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub hit: Hit,
    pub name: String,
    pub addrs: AddressList,
}

impl HostIdentity {
    #[must_use]
    pub fn new(hit: Hit, name: &str) -> Self {
        Self {
            hit,
            name: name.to_owned(),
            addrs: AddressList::new(),
        }
    }

    /// Add an active address
    #[must_use]
    pub fn with_address(mut self, addr: IpAddr, ifindex: IfIndex) -> Self {
        let id = self.addrs.add(addr, ifindex);
        self.addrs.make_active(id);
        self
    }

    /// The address in use for this identity
    #[must_use]
    pub fn address(&self) -> Option<IpAddr> {
        self.addrs.current().map(|r| r.addr)
    }
}

impl Display for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({})", self.name, self.hit)?;
        write!(f, "{}", self.addrs)
    }
}
