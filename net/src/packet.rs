// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Owned IP packet: a parsed IPv4 or IPv6 header followed by its payload.

use crate::addr::Family;
use etherparse::{IpNumber, Ipv4Header, Ipv6Header};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP protocol number of HIP
pub const IPPROTO_HIP: u8 = 139;
/// IP protocol number of ESP
pub const IPPROTO_ESP: u8 = 50;
/// IP "no next header" value, used as HIP next header
pub const IPPROTO_NONE: u8 = 59;

const DEFAULT_HOP_LIMIT: u8 = 64;

/// Errors building or parsing an [`IpPacket`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    /// Nothing to parse
    #[error("empty packet")]
    Empty,
    /// First nibble is neither 4 nor 6
    #[error("unknown IP version {0}")]
    UnknownVersion(u8),
    /// The IP header could not be parsed
    #[error("malformed {0} header")]
    MalformedHeader(Family),
    /// The buffer is shorter than the length the header announces
    #[error("truncated packet: header announces {announced} payload bytes, {available} present")]
    Truncated {
        /// payload length found in the header
        announced: usize,
        /// payload bytes actually present
        available: usize,
    },
    /// An address of one family was applied to a packet of the other
    #[error("family mismatch: packet is {packet}, address is {addr}")]
    FamilyMismatch {
        /// family of the packet
        packet: Family,
        /// family of the offending address
        addr: Family,
    },
    /// The payload would not fit the header length field
    #[error("payload of {0} bytes is too large")]
    TooLarge(usize),
}

/// The header of an [`IpPacket`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpHeader {
    /// IPv4 header (options are kept)
    V4(Ipv4Header),
    /// IPv6 fixed header
    V6(Ipv6Header),
}

/// An owned, length-checked IP packet.
///
/// The payload is everything the header length fields cover; trailing bytes beyond it are
/// discarded when parsing. Every mutation keeps the length fields and, for IPv4, the header
/// checksum consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPacket {
    header: IpHeader,
    payload: Vec<u8>,
}

impl IpPacket {
    /// Parse a raw IP packet
    ///
    /// # Errors
    ///
    /// Fails if the buffer does not start with a valid IPv4 or IPv6 header or if it is shorter
    /// than the length the header announces.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        let first = *data.first().ok_or(PacketError::Empty)?;
        match first >> 4 {
            4 => {
                let (header, rest) = Ipv4Header::from_slice(data)
                    .map_err(|_| PacketError::MalformedHeader(Family::Ipv4))?;
                let announced = usize::from(header.total_len)
                    .checked_sub(header.header_len())
                    .ok_or(PacketError::MalformedHeader(Family::Ipv4))?;
                let payload = Self::take_payload(rest, announced)?;
                Ok(Self {
                    header: IpHeader::V4(header),
                    payload,
                })
            }
            6 => {
                let (header, rest) = Ipv6Header::from_slice(data)
                    .map_err(|_| PacketError::MalformedHeader(Family::Ipv6))?;
                let payload = Self::take_payload(rest, usize::from(header.payload_length))?;
                Ok(Self {
                    header: IpHeader::V6(header),
                    payload,
                })
            }
            version => Err(PacketError::UnknownVersion(version)),
        }
    }

    fn take_payload(rest: &[u8], announced: usize) -> Result<Vec<u8>, PacketError> {
        rest.get(..announced)
            .map(<[u8]>::to_vec)
            .ok_or(PacketError::Truncated {
                announced,
                available: rest.len(),
            })
    }

    /// Build a packet from a header and a payload, fixing up the header length fields
    ///
    /// # Errors
    ///
    /// Fails if the payload does not fit the header length field.
    pub fn new(header: IpHeader, payload: Vec<u8>) -> Result<Self, PacketError> {
        let mut packet = Self { header, payload };
        packet.fix_lengths()?;
        Ok(packet)
    }

    /// Build a packet carrying `payload` from `src` to `dst`, with default header fields
    ///
    /// # Errors
    ///
    /// Fails if the addresses are of different families or the payload is too large.
    pub fn from_parts(
        src: IpAddr,
        dst: IpAddr,
        protocol: u8,
        payload: Vec<u8>,
    ) -> Result<Self, PacketError> {
        let header = match (src, dst) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => IpHeader::V4(Ipv4Header {
                source: src.octets(),
                destination: dst.octets(),
                protocol: IpNumber(protocol),
                time_to_live: DEFAULT_HOP_LIMIT,
                dont_fragment: true,
                ..Default::default()
            }),
            (IpAddr::V6(src), IpAddr::V6(dst)) => IpHeader::V6(Ipv6Header {
                source: src.octets(),
                destination: dst.octets(),
                next_header: IpNumber(protocol),
                hop_limit: DEFAULT_HOP_LIMIT,
                ..Default::default()
            }),
            (src, dst) => {
                return Err(PacketError::FamilyMismatch {
                    packet: Family::of(&src),
                    addr: Family::of(&dst),
                });
            }
        };
        Self::new(header, payload)
    }

    fn fix_lengths(&mut self) -> Result<(), PacketError> {
        let len = self.payload.len();
        match &mut self.header {
            IpHeader::V4(h) => {
                h.set_payload_len(len)
                    .map_err(|_| PacketError::TooLarge(len))?;
                h.header_checksum = h.calc_header_checksum();
            }
            IpHeader::V6(h) => {
                h.set_payload_length(len)
                    .map_err(|_| PacketError::TooLarge(len))?;
            }
        }
        Ok(())
    }

    /// The family of this packet
    #[must_use]
    pub fn family(&self) -> Family {
        match self.header {
            IpHeader::V4(_) => Family::Ipv4,
            IpHeader::V6(_) => Family::Ipv6,
        }
    }

    /// The IP header
    #[must_use]
    pub fn header(&self) -> &IpHeader {
        &self.header
    }

    /// Protocol of the payload (IPv4 protocol or IPv6 next header)
    #[must_use]
    pub fn protocol(&self) -> u8 {
        match &self.header {
            IpHeader::V4(h) => h.protocol.0,
            IpHeader::V6(h) => h.next_header.0,
        }
    }

    /// Tells if the payload is a HIP message
    #[must_use]
    pub fn is_hip(&self) -> bool {
        self.protocol() == IPPROTO_HIP
    }

    /// Tells if the payload is ESP
    #[must_use]
    pub fn is_esp(&self) -> bool {
        self.protocol() == IpNumber::ENCAPSULATING_SECURITY_PAYLOAD.0
    }

    /// Source address
    #[must_use]
    pub fn source(&self) -> IpAddr {
        match &self.header {
            IpHeader::V4(h) => IpAddr::V4(Ipv4Addr::from(h.source)),
            IpHeader::V6(h) => IpAddr::V6(Ipv6Addr::from(h.source)),
        }
    }

    /// Destination address
    #[must_use]
    pub fn destination(&self) -> IpAddr {
        match &self.header {
            IpHeader::V4(h) => IpAddr::V4(Ipv4Addr::from(h.destination)),
            IpHeader::V6(h) => IpAddr::V6(Ipv6Addr::from(h.destination)),
        }
    }

    /// Overwrite source and destination addresses.
    ///
    /// # Errors
    ///
    /// Both addresses must be of the packet's family; the packet is left untouched otherwise.
    pub fn set_addresses(&mut self, src: IpAddr, dst: IpAddr) -> Result<(), PacketError> {
        match (&mut self.header, src, dst) {
            (IpHeader::V4(h), IpAddr::V4(src), IpAddr::V4(dst)) => {
                h.source = src.octets();
                h.destination = dst.octets();
                h.header_checksum = h.calc_header_checksum();
                Ok(())
            }
            (IpHeader::V6(h), IpAddr::V6(src), IpAddr::V6(dst)) => {
                h.source = src.octets();
                h.destination = dst.octets();
                Ok(())
            }
            (header, src, dst) => {
                let packet = match header {
                    IpHeader::V4(_) => Family::Ipv4,
                    IpHeader::V6(_) => Family::Ipv6,
                };
                let addr = if Family::of(&src) == packet { dst } else { src };
                Err(PacketError::FamilyMismatch {
                    packet,
                    addr: Family::of(&addr),
                })
            }
        }
    }

    /// The payload following the IP header
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mutable access to the payload. Its length cannot change through this borrow.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Append bytes to the payload, updating the IP length fields.
    ///
    /// # Errors
    ///
    /// Fails if the grown payload would not fit the header length field.
    pub fn extend_payload(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        self.payload.extend_from_slice(bytes);
        if let Err(e) = self.fix_lengths() {
            self.payload.truncate(self.payload.len() - bytes.len());
            return Err(e);
        }
        Ok(())
    }

    /// Total length of the packet on the wire
    #[must_use]
    pub fn len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Tells if the packet has no payload
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Length of the IP header in bytes
    #[must_use]
    pub fn header_len(&self) -> usize {
        match &self.header {
            IpHeader::V4(h) => h.header_len(),
            IpHeader::V6(_) => Ipv6Header::LEN,
        }
    }

    /// Serialize the packet
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        match &self.header {
            IpHeader::V4(h) => out.extend_from_slice(&h.to_bytes()),
            IpHeader::V6(h) => out.extend_from_slice(&h.to_bytes()),
        }
        out.extend_from_slice(&self.payload);
        out
    }
}
