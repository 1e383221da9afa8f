// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4/IPv6 family translation.
//!
//! The payload is carried over unchanged under a header of the opposite family. Traffic
//! class, protocol and hop limit are copied and the length is recomputed. The IPv6 flow
//! label is dropped; an IPv4 header is built with identification zero and don't-fragment
//! set. Addresses are left unspecified for the caller to fill in.

use crate::addr::Family;
use crate::packet::{IpHeader, IpPacket, PacketError};
use etherparse::{IpDscp, IpEcn, Ipv4Header, Ipv6Header};
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::trace;

trace_target!("net-translate", LevelFilter::INFO, &["net"]);

/// Re-encapsulate the payload of `packet` under a header of the opposite family
///
/// # Errors
///
/// Fails if the payload does not fit the new header's length field.
pub fn translate_family(packet: &IpPacket) -> Result<IpPacket, PacketError> {
    let header = match packet.header() {
        IpHeader::V4(h) => IpHeader::V6(Ipv6Header {
            traffic_class: (h.dscp.value() << 2) | h.ecn.value(),
            next_header: h.protocol,
            hop_limit: h.time_to_live,
            ..Default::default()
        }),
        IpHeader::V6(h) => IpHeader::V4(Ipv4Header {
            dscp: IpDscp::try_new(h.traffic_class >> 2)
                .map_err(|_| PacketError::MalformedHeader(Family::Ipv6))?,
            ecn: IpEcn::try_new(h.traffic_class & 0x03)
                .map_err(|_| PacketError::MalformedHeader(Family::Ipv6))?,
            identification: 0,
            dont_fragment: true,
            time_to_live: h.hop_limit,
            protocol: h.next_header,
            ..Default::default()
        }),
    };
    trace!(
        "translating {} packet of {} bytes",
        packet.family(),
        packet.len()
    );
    IpPacket::new(header, packet.payload().to_vec())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::packet::IPPROTO_ESP;
    use crate::packet::test_utils::{ipv4_packet, ipv6_packet};
    use etherparse::Ipv4HeaderSlice;
    use std::net::{IpAddr, Ipv4Addr};

    fn ipv4_with_tos(tos: u8, ttl: u8, proto: u8, payload: &[u8]) -> IpPacket {
        let header = Ipv4Header {
            dscp: IpDscp::try_new(tos >> 2).expect("Should succeed"),
            ecn: IpEcn::try_new(tos & 3).expect("Should succeed"),
            time_to_live: ttl,
            protocol: etherparse::IpNumber(proto),
            source: [10, 0, 0, 1],
            destination: [10, 0, 0, 2],
            ..Default::default()
        };
        IpPacket::new(IpHeader::V4(header), payload.to_vec()).expect("Should succeed")
    }

    #[test]
    fn test_ipv6_to_ipv4() {
        let packet = ipv6_packet(
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
            IPPROTO_ESP,
            &[0xab; 24],
        );
        let mut out = translate_family(&packet).expect("Should succeed");
        out.set_addresses(
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)),
        )
        .expect("Should succeed");
        assert_eq!(out.family(), Family::Ipv4);
        assert_eq!(out.len(), 44);
        assert_eq!(out.payload(), &[0xab; 24]);

        let bytes = out.to_bytes();
        let slice = Ipv4HeaderSlice::from_slice(&bytes).expect("Should succeed");
        assert!(slice.dont_fragment());
        assert_eq!(slice.identification(), 0);
        assert_eq!(slice.ttl(), 64);
        assert_eq!(slice.protocol().0, IPPROTO_ESP);
        assert_eq!(slice.total_len(), 44);
        assert_eq!(slice.header_checksum(), slice.to_header().calc_header_checksum());
    }

    #[test]
    fn test_ipv4_to_ipv6() {
        let packet = ipv4_packet(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            IPPROTO_ESP,
            &[1, 2, 3, 4],
        );
        let out = translate_family(&packet).expect("Should succeed");
        let IpHeader::V6(header) = out.header() else {
            panic!("expected IPv6");
        };
        assert_eq!(header.payload_length, 4);
        assert_eq!(header.hop_limit, 64);
        assert_eq!(header.next_header.0, IPPROTO_ESP);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        bolero::check!()
            .with_type()
            .for_each(|(tos, ttl, proto, payload): &(u8, u8, u8, Vec<u8>)| {
                let payload = &payload[..payload.len().min(1400)];
                let original = ipv4_with_tos(*tos, *ttl, *proto, payload);
                let there = translate_family(&original).expect("Should succeed");
                let back = translate_family(&there).expect("Should succeed");
                let (IpHeader::V4(a), IpHeader::V4(b)) = (original.header(), back.header()) else {
                    panic!("expected IPv4 on both ends");
                };
                assert_eq!(a.protocol, b.protocol);
                assert_eq!(a.time_to_live, b.time_to_live);
                assert_eq!(a.dscp, b.dscp);
                assert_eq!(a.ecn, b.ecn);
                assert_eq!(original.payload(), back.payload());
            });
    }
}
