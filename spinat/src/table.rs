// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mobile router clients and their SPINAT entries

use net::Family;
use net::hip::{AuthTicket, Hit};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

use crate::errors::SpinatError;
use crate::spi::SpiAllocator;

trace_target!("spinat-table", LevelFilter::INFO, &["spinat"]);

/// A ticket by which a client lets the router readdress its association with one peer,
/// along with the key that signs UPDATEs under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTicket {
    pub hmac_key: Vec<u8>,
    pub ticket: AuthTicket,
}

/// NAT state of one client/peer association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinatEntry {
    pub peer_hit: Hit,
    /// SPI the client receives on
    pub private_spi: u32,
    /// SPI the peer sends to, allocated by the router
    pub public_spi: u32,
    /// SPI the peer receives on
    pub peer_spi: u32,
    /// Address the client addressed the peer with
    pub peer_addr: Option<IpAddr>,
    /// Alternate peer addresses learnt from the peer's locators
    pub peer_ipv4: Option<Ipv4Addr>,
    pub peer_ipv6: Option<Ipv6Addr>,
    pub ticket: Option<ProxyTicket>,
}

impl SpinatEntry {
    #[must_use]
    pub fn new(peer_hit: Hit) -> Self {
        Self {
            peer_hit,
            private_spi: 0,
            public_spi: 0,
            peer_spi: 0,
            peer_addr: None,
            peer_ipv4: None,
            peer_ipv6: None,
            ticket: None,
        }
    }

    /// The alternate peer address of the given family
    #[must_use]
    pub fn alternate(&self, family: Family) -> Option<IpAddr> {
        match family {
            Family::Ipv4 => self.peer_ipv4.map(IpAddr::V4),
            Family::Ipv6 => self.peer_ipv6.map(IpAddr::V6),
        }
    }

    /// The best peer address of the given family: the alternate one if known, else the
    /// address the client used if it is of that family
    #[must_use]
    pub fn peer_address_in(&self, family: Family) -> Option<IpAddr> {
        self.alternate(family)
            .or_else(|| self.peer_addr.filter(|a| Family::of(a) == family))
    }
}

fn show<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "--".to_string(), |v| v.to_string())
}

impl Display for SpinatEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "peer {} spi private {:#x} public {:#x} peer {:#x} addr {} v4 {} v6 {}{}",
            self.peer_hit,
            self.private_spi,
            self.public_spi,
            self.peer_spi,
            show(self.peer_addr),
            show(self.peer_ipv4),
            show(self.peer_ipv6),
            if self.ticket.is_some() { " ticket" } else { "" }
        )
    }
}

/// Registration state of a client
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    #[default]
    Init,
    /// The router accepted the client's registration
    ResponseSent,
}

impl Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Init => write!(f, "init"),
            ClientState::ResponseSent => write!(f, "response-sent"),
        }
    }
}

/// A host behind the mobile router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileRouterClient {
    pub hit: Hit,
    pub addr: IpAddr,
    pub state: ClientState,
    entries: Vec<SpinatEntry>,
}

impl MobileRouterClient {
    #[must_use]
    pub fn new(hit: Hit, addr: IpAddr) -> Self {
        Self {
            hit,
            addr,
            state: ClientState::Init,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[SpinatEntry] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, peer: &Hit) -> Option<&SpinatEntry> {
        self.entries.iter().find(|e| e.peer_hit == *peer)
    }

    pub fn entry_mut(&mut self, peer: &Hit) -> Option<&mut SpinatEntry> {
        self.entries.iter_mut().find(|e| e.peer_hit == *peer)
    }

    /// The entry for `peer`, created if missing
    pub fn entry_or_insert(&mut self, peer: Hit) -> &mut SpinatEntry {
        let index = match self.entries.iter().position(|e| e.peer_hit == peer) {
            Some(index) => index,
            None => {
                debug!("New SPINAT entry for client {} and peer {peer}", self.hit);
                self.entries.push(SpinatEntry::new(peer));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    pub fn remove_entry(&mut self, peer: &Hit) -> Option<SpinatEntry> {
        let index = self.entries.iter().position(|e| e.peer_hit == *peer)?;
        Some(self.entries.remove(index))
    }
}

impl Display for MobileRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "client {} at {} ({})", self.hit, self.addr, self.state)?;
        for entry in &self.entries {
            writeln!(f, "  {entry}")?;
        }
        Ok(())
    }
}

/// State of the mobile router shared between the mobility context and the dispatch loop
#[derive(Debug, Default)]
pub struct MobileRouterState {
    clients: Vec<MobileRouterClient>,
    out_addr: Option<IpAddr>,
    external_interface: Option<String>,
    allocator: SpiAllocator,
}

/// The router state behind the lock that serializes every access to it
pub type SharedRouterState = Arc<Mutex<MobileRouterState>>;

impl MobileRouterState {
    #[must_use]
    pub fn new(allocator: SpiAllocator) -> Self {
        Self {
            allocator,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn shared(self) -> SharedRouterState {
        Arc::new(Mutex::new(self))
    }

    /// Register a client, or update the address of a known one
    pub fn add_client(&mut self, hit: Hit, addr: IpAddr) -> &mut MobileRouterClient {
        let index = match self.clients.iter().position(|c| c.hit == hit) {
            Some(index) => {
                self.clients[index].addr = addr;
                index
            }
            None => {
                info!("Registered mobile router client {hit} at {addr}");
                self.clients.push(MobileRouterClient::new(hit, addr));
                self.clients.len() - 1
            }
        };
        &mut self.clients[index]
    }

    pub fn remove_client(&mut self, hit: &Hit) -> Option<MobileRouterClient> {
        let index = self.clients.iter().position(|c| c.hit == *hit)?;
        Some(self.clients.remove(index))
    }

    /// The client with the given HIT. None means the HIT is not a client's.
    #[must_use]
    pub fn find_client_by_identity(&self, hit: &Hit) -> Option<&MobileRouterClient> {
        self.clients.iter().find(|c| c.hit == *hit)
    }

    pub fn find_client_mut(&mut self, hit: &Hit) -> Option<&mut MobileRouterClient> {
        self.clients.iter_mut().find(|c| c.hit == *hit)
    }

    #[must_use]
    pub fn clients(&self) -> &[MobileRouterClient] {
        &self.clients
    }

    /// Mark a client's registration as accepted
    pub fn set_client_state(&mut self, hit: &Hit, state: ClientState) -> Result<(), SpinatError> {
        let client = self
            .find_client_mut(hit)
            .ok_or(SpinatError::NoSuchClient(*hit))?;
        client.state = state;
        Ok(())
    }

    /// Store the ticket a client issued for one of its peers
    pub fn set_ticket(
        &mut self,
        client: &Hit,
        peer: &Hit,
        ticket: ProxyTicket,
    ) -> Result<(), SpinatError> {
        let entry = self
            .find_client_mut(client)
            .ok_or(SpinatError::NoSuchClient(*client))?
            .entry_mut(peer)
            .ok_or(SpinatError::NoSuchEntry {
                client: *client,
                peer: *peer,
            })?;
        entry.ticket = Some(ticket);
        Ok(())
    }

    /// Public SPIs currently allocated, across all clients
    #[must_use]
    pub fn public_spis(&self) -> HashSet<u32> {
        self.clients
            .iter()
            .flat_map(|c| c.entries.iter().map(|e| e.public_spi))
            .filter(|spi| *spi != 0)
            .collect()
    }

    /// Allocate a public SPI unused by any entry of any client
    pub fn next_public_spi(&self) -> Result<u32, SpinatError> {
        self.allocator.allocate(&self.public_spis())
    }

    #[must_use]
    pub fn out_addr(&self) -> Option<IpAddr> {
        self.out_addr
    }

    pub fn set_out_addr(&mut self, addr: IpAddr) {
        self.out_addr = Some(addr);
    }

    #[must_use]
    pub fn external_interface(&self) -> Option<&str> {
        self.external_interface.as_deref()
    }

    /// Record the external interface name unless one was already recorded
    pub fn capture_external_interface(&mut self, name: Option<&str>) {
        if self.external_interface.is_none()
            && let Some(name) = name
        {
            debug!("External interface is {name}");
            self.external_interface = Some(name.to_string());
        }
    }
}

impl Display for MobileRouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Mobile router: external {} on {}",
            show(self.out_addr),
            self.external_interface.as_deref().unwrap_or("--")
        )?;
        for client in &self.clients {
            write!(f, "{client}")?;
        }
        Ok(())
    }
}
