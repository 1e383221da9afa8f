// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! SPINAT of HIP control packets.
//!
//! Base exchange packets between a client and its peers go through the router. Those
//! leaving carry the router's external address as source; those arriving are addressed
//! back to the client. Along the way the router learns the SPIs and peer addresses it
//! needs to translate ESP, and hands a public SPI to the peer by appending an
//! `ESP_INFO_NOSIG` parameter to the client's I2.

use net::IpPacket;
use net::addr::is_multicast_or_broadcast;
use net::checksum::{Checksum, PseudoHeader};
use net::hip::param::types;
use net::hip::{
    EspInfo, HipMessage, HipMessageMut, Hit, LocatorEntry, PacketType, append_parameter,
};
use std::fmt::Display;
use std::net::{IpAddr, Ipv6Addr};
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, trace, warn};

use crate::errors::SpinatError;
use crate::table::{MobileRouterState, SpinatEntry};

trace_target!("spinat-hip", LevelFilter::INFO, &["spinat"]);

/// What to do with an intercepted packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accept => write!(f, "ACCEPT"),
            Verdict::Drop => write!(f, "DROP"),
        }
    }
}

/// Overwrite the addresses of `packet` if both are known and of the packet's family.
/// Returns true if the packet was changed.
pub(crate) fn rewrite_addresses(
    packet: &mut IpPacket,
    src: Option<IpAddr>,
    dst: Option<IpAddr>,
) -> bool {
    let (Some(src), Some(dst)) = (src, dst) else {
        trace!("Not rewriting addresses: source or destination unknown");
        return false;
    };
    match packet.set_addresses(src, dst) {
        Ok(()) => {
            trace!("Addresses are now ({src}, {dst})");
            true
        }
        Err(e) => {
            debug!("Not rewriting addresses to ({src}, {dst}): {e}");
            false
        }
    }
}

/// The fields of a HIP message the router acts on
struct Summary {
    packet_type: PacketType,
    sender: Hit,
    receiver: Hit,
    esp_info: Option<EspInfo>,
    locator: Option<LocatorEntry>,
}

impl Summary {
    fn of(msg: &HipMessage<'_>) -> Self {
        Self {
            packet_type: msg.packet_type(),
            sender: msg.sender(),
            receiver: msg.receiver(),
            esp_info: msg.esp_info(),
            locator: msg
                .locators()
                .next()
                .and_then(|locator| locator.entries.first().copied()),
        }
    }
}

/// Apply SPINAT to a HIP packet, in place. The HIP checksum is recomputed whatever
/// happened to the packet. Packets that do not involve a client are left as they are.
///
/// Returns [`Verdict::Drop`] for an I2 when no public SPI could be allocated; every
/// other packet is accepted.
///
/// # Errors
///
/// Fails if the payload is not a HIP message or if the I2 cannot be grown. The packet
/// may have been partially rewritten.
pub fn check_hip_packet(
    state: &mut MobileRouterState,
    packet: &mut IpPacket,
) -> Result<Verdict, SpinatError> {
    let summary = Summary::of(&HipMessage::parse(packet.payload())?);
    debug!(
        "HIP {:?} packet of {} bytes from {} to {}",
        summary.packet_type,
        packet.len(),
        summary.sender,
        summary.receiver
    );

    let verdict = match summary.packet_type {
        PacketType::I1 => {
            process_i1(state, packet, &summary);
            Verdict::Accept
        }
        PacketType::R1 => {
            process_r1(state, packet, &summary);
            Verdict::Accept
        }
        PacketType::I2 => process_i2(state, packet, &summary)?,
        PacketType::R2 => {
            process_r2(state, packet, &summary);
            Verdict::Accept
        }
        PacketType::Close | PacketType::CloseAck => {
            process_close(state, packet, &summary);
            Verdict::Accept
        }
        _ => Verdict::Accept,
    };

    let pseudo = PseudoHeader::new(packet.source(), packet.destination());
    HipMessageMut::parse(packet.payload_mut())?.update_checksum(&pseudo);
    Ok(verdict)
}

/// Client to peer: create the entry and remember where the client sent it
fn process_i1(state: &mut MobileRouterState, packet: &mut IpPacket, msg: &Summary) {
    let out_addr = state.out_addr();
    let Some(client) = state.find_client_mut(&msg.sender) else {
        debug!("I1 sender {} is not a client", msg.sender);
        return;
    };
    let peer_addr = packet.destination();
    let entry = client.entry_or_insert(msg.receiver);
    entry.private_spi = 0;
    entry.public_spi = 0;
    entry.peer_addr = Some(peer_addr);
    rewrite_addresses(packet, out_addr, Some(peer_addr));
}

/// Keep a locator address as alternate peer address of its family, unless it is not
/// a unicast address
fn learn_peer_address(entry: &mut SpinatEntry, addr: Ipv6Addr) {
    if let Some(v4) = addr.to_ipv4_mapped() {
        entry.peer_ipv4 = (!is_multicast_or_broadcast(&v4)).then_some(v4);
        debug!("Peer {} IPv4 locator {v4}", entry.peer_hit);
    } else {
        entry.peer_ipv6 = (!addr.is_multicast()).then_some(addr);
        debug!("Peer {} IPv6 locator {addr}", entry.peer_hit);
    }
}

/// Peer to client: learn the peer's alternate address from its first locator
fn process_r1(state: &mut MobileRouterState, packet: &mut IpPacket, msg: &Summary) {
    let Some(client) = state.find_client_mut(&msg.receiver) else {
        debug!("R1 receiver {} is not a client", msg.receiver);
        return;
    };
    let client_addr = client.addr;
    let Some(entry) = client.entry_mut(&msg.sender) else {
        debug!("No SPINAT entry for R1 from {}", msg.sender);
        return;
    };
    if let Some(locator) = msg.locator {
        match locator.address() {
            Some(addr) => learn_peer_address(entry, addr),
            None => warn!("Unsupported locator type in R1 from {}", msg.sender),
        }
    }
    let peer_addr = entry.peer_addr;
    rewrite_addresses(packet, peer_addr, Some(client_addr));
}

/// Client to peer: learn the client's SPI and give the peer a public one instead
fn process_i2(
    state: &mut MobileRouterState,
    packet: &mut IpPacket,
    msg: &Summary,
) -> Result<Verdict, SpinatError> {
    let known = state
        .find_client_by_identity(&msg.sender)
        .is_some_and(|client| client.entry(&msg.receiver).is_some());
    if !known {
        debug!("I2 from {} to {} is not for a client", msg.sender, msg.receiver);
        return Ok(Verdict::Accept);
    }

    let public_spi = match msg.esp_info {
        Some(_) => match state.next_public_spi() {
            Ok(spi) => Some(spi),
            Err(e) => {
                error!("Dropping I2 from {} to {}: {e}", msg.sender, msg.receiver);
                if let Some(client) = state.find_client_mut(&msg.sender) {
                    client.remove_entry(&msg.receiver);
                }
                return Ok(Verdict::Drop);
            }
        },
        None => {
            warn!("I2 from {} carries no ESP_INFO", msg.sender);
            None
        }
    };

    let out_addr = state.out_addr();
    let Some(entry) = state
        .find_client_mut(&msg.sender)
        .and_then(|client| client.entry_mut(&msg.receiver))
    else {
        return Ok(Verdict::Accept);
    };
    let peer_addr = entry.peer_addr;
    rewrite_addresses(packet, out_addr, peer_addr);

    /* the entry only gets the SPIs once the peer can learn the public one */
    if let (Some(info), Some(public_spi)) = (msg.esp_info, public_spi) {
        let nat = EspInfo {
            keymat_index: 0,
            old_spi: 0,
            new_spi: public_spi,
        }
        .encode(types::ESP_INFO_NOSIG);
        append_parameter(packet, &nat)?;
        entry.private_spi = info.new_spi;
        entry.public_spi = public_spi;
        info!("Adding SPI_NAT of {public_spi:#x}");
    }
    Ok(Verdict::Accept)
}

/// Peer to client: learn the peer's SPI
fn process_r2(state: &mut MobileRouterState, packet: &mut IpPacket, msg: &Summary) {
    let Some(client) = state.find_client_mut(&msg.receiver) else {
        debug!("R2 receiver {} is not a client", msg.receiver);
        return;
    };
    let client_addr = client.addr;
    let Some(entry) = client.entry_mut(&msg.sender) else {
        debug!("No SPINAT entry for R2 from {}", msg.sender);
        return;
    };
    if let Some(info) = msg.esp_info {
        entry.peer_spi = info.new_spi;
    }
    let peer_addr = entry.peer_addr;
    rewrite_addresses(packet, peer_addr, Some(client_addr));
}

/// Either direction. The entry goes away once the CLOSE_ACK is through.
fn process_close(state: &mut MobileRouterState, packet: &mut IpPacket, msg: &Summary) {
    let out_addr = state.out_addr();
    let client_hit = [msg.receiver, msg.sender]
        .into_iter()
        .find(|hit| state.find_client_by_identity(hit).is_some());
    let Some(client) = client_hit.and_then(|hit| state.find_client_mut(&hit)) else {
        return;
    };

    let outbound = msg.sender == client.hit;
    let peer = if outbound { msg.receiver } else { msg.sender };
    let Some(peer_addr) = client.entry(&peer).map(|entry| entry.peer_addr) else {
        debug!("No SPINAT entry for {:?} with {peer}", msg.packet_type);
        return;
    };
    if outbound {
        rewrite_addresses(packet, out_addr, peer_addr);
    } else {
        rewrite_addresses(packet, peer_addr, Some(client.addr));
    }

    if msg.packet_type == PacketType::CloseAck && client.remove_entry(&peer).is_some() {
        info!("Removed SPINAT entry of client {} for peer {peer}", client.hit);
    }
}
