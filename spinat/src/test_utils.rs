// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet builders for tests

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use net::IpPacket;
use net::checksum::{Checksum, PseudoHeader};
use net::hip::{HipMessageBuilder, HipMessageMut, Hit};
use net::packet::{IPPROTO_ESP, IPPROTO_HIP};
use std::net::IpAddr;

use crate::table::{ClientState, MobileRouterState};

pub(crate) const CLIENT: Hit = Hit::new([
    0x20, 0x01, 0x00, 0x10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x0c,
]);
pub(crate) const PEER: Hit = Hit::new([
    0x20, 0x01, 0x00, 0x10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x0e,
]);

pub(crate) fn ip(s: &str) -> IpAddr {
    s.parse().expect("Should succeed")
}

/// An IP packet of the family of `src`
pub(crate) fn ip_packet(src: IpAddr, dst: IpAddr, proto: u8, payload: &[u8]) -> IpPacket {
    IpPacket::from_parts(src, dst, proto, payload.to_vec()).expect("Should succeed")
}

/// A HIP packet carrying the message being built
pub(crate) fn hip_packet(src: IpAddr, dst: IpAddr, builder: HipMessageBuilder) -> IpPacket {
    let msg = builder.build().expect("Should succeed");
    ip_packet(src, dst, IPPROTO_HIP, &msg)
}

/// An ESP packet with the given SPI, sequence number 1 and an opaque body
pub(crate) fn esp_packet(src: IpAddr, dst: IpAddr, spi: u32) -> IpPacket {
    let mut esp = spi.to_be_bytes().to_vec();
    esp.extend_from_slice(&1u32.to_be_bytes());
    esp.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04]);
    ip_packet(src, dst, IPPROTO_ESP, &esp)
}

/// Tells if the HIP checksum of `packet` matches its addresses and contents
pub(crate) fn checksum_ok(packet: &IpPacket) -> bool {
    let mut bytes = packet.payload().to_vec();
    let msg = HipMessageMut::parse(&mut bytes).expect("Should succeed");
    msg.validate_checksum(&PseudoHeader::new(packet.source(), packet.destination()))
        .is_ok()
}

/// Router state with an external address and one registered client
pub(crate) fn router_state(out_addr: &str, client_addr: &str) -> MobileRouterState {
    let mut state = MobileRouterState::default();
    state.set_out_addr(ip(out_addr));
    state.add_client(CLIENT, ip(client_addr)).state = ClientState::ResponseSent;
    state
}
