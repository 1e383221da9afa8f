// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! SPINAT of ESP packets.
//!
//! Inbound packets are matched on the public SPI the router gave the peer, outbound ones
//! on the peer's SPI and their addresses. When the client and the external side are of
//! different families, the packet is translated.

use net::esp::{set_spi, spi};
use net::translate::translate_family;
use net::{Family, IpPacket};
use std::fmt::Display;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, trace, warn};

use crate::inspect::rewrite_addresses;
use crate::table::MobileRouterState;

trace_target!("spinat-esp", LevelFilter::INFO, &["spinat"]);

/// Side a packet comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the external interface, towards a client
    Inbound,
    /// From a client, towards the external interface
    Outbound,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Result of [`check_esp_packet`]
#[derive(Debug, PartialEq, Eq)]
pub enum EspVerdict {
    /// No entry matched: the packet goes on unchanged
    PassThrough,
    /// The packet was rewritten in place
    Rewritten,
    /// The packet must be replaced by this one, of the other family
    Translated(IpPacket),
}

/// Apply SPINAT to an ESP packet. Unmatched packets pass through: they may well be for
/// the router itself.
pub fn check_esp_packet(
    state: &MobileRouterState,
    packet: &mut IpPacket,
    direction: Direction,
) -> EspVerdict {
    let Some(spi) = spi(packet.payload()) else {
        debug!("ESP packet too short for an SPI");
        return EspVerdict::PassThrough;
    };
    let verdict = match direction {
        Direction::Inbound => check_inbound(state, packet, spi),
        Direction::Outbound => check_outbound(state, packet, spi),
    };
    if verdict == EspVerdict::PassThrough {
        trace!("No SPINAT entry for {direction} SPI {spi:#x}");
    }
    verdict
}

fn translated(packet: &IpPacket) -> Option<IpPacket> {
    translate_family(packet)
        .inspect_err(|e| warn!("Cannot translate {} ESP packet: {e}", packet.family()))
        .ok()
}

fn check_inbound(state: &MobileRouterState, packet: &mut IpPacket, spi: u32) -> EspVerdict {
    for client in state.clients() {
        let family = Family::of(&client.addr);
        for entry in client.entries() {
            if entry.public_spi == 0 || entry.public_spi != spi {
                continue;
            }
            if family == packet.family() {
                if set_spi(packet.payload_mut(), entry.private_spi) {
                    rewrite_addresses(packet, entry.peer_addr, Some(client.addr));
                }
                return EspVerdict::Rewritten;
            }
            let Some(peer) = entry.peer_address_in(family) else {
                debug!("No {family} address for peer {}", entry.peer_hit);
                continue;
            };
            let Some(mut packet) = translated(packet) else {
                return EspVerdict::PassThrough;
            };
            if set_spi(packet.payload_mut(), entry.private_spi) {
                rewrite_addresses(&mut packet, Some(peer), Some(client.addr));
            }
            return EspVerdict::Translated(packet);
        }
    }
    EspVerdict::PassThrough
}

fn check_outbound(state: &MobileRouterState, packet: &mut IpPacket, spi: u32) -> EspVerdict {
    let Some(out_addr) = state.out_addr() else {
        trace!("No external address yet");
        return EspVerdict::PassThrough;
    };
    let out_family = Family::of(&out_addr);
    let (src, dst) = (packet.source(), packet.destination());

    for client in state.clients().iter().filter(|c| c.addr == src) {
        for entry in client.entries() {
            if entry.peer_spi == 0 || entry.peer_spi != spi || entry.peer_addr != Some(dst) {
                continue;
            }
            if packet.family() == out_family {
                rewrite_addresses(packet, Some(out_addr), entry.peer_address_in(out_family));
                return EspVerdict::Rewritten;
            }
            let Some(peer) = entry.alternate(out_family) else {
                debug!("No {out_family} address for peer {}", entry.peer_hit);
                continue;
            };
            let Some(mut packet) = translated(packet) else {
                return EspVerdict::PassThrough;
            };
            rewrite_addresses(&mut packet, Some(out_addr), Some(peer));
            return EspVerdict::Translated(packet);
        }
    }
    EspVerdict::PassThrough
}
