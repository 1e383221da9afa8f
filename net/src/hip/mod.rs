// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! HIP control messages.
//!
//! A HIP message is a fixed 40-byte header followed by TLV parameters, each padded to a
//! multiple of 8 bytes:
//!
//! ```text
//!  0               1               2               3
//! | next header   | header length |0| packet type | version | RES |1|
//! | checksum                      | controls                        |
//! | sender HIT (16 bytes)                                           |
//! | receiver HIT (16 bytes)                                         |
//! | parameters ...                                                  |
//! ```
//!
//! The header length counts 8-byte units, not including the first 8 bytes.

mod builder;
pub mod param;

pub use builder::{HipMessageBuilder, append_parameter};
pub use param::{
    AuthTicket, EspInfo, HipParam, Locator, LocatorEntry, LocatorKind, ParamIter, RawParam,
};

use crate::checksum::{Checksum, HipChecksum, PseudoHeader};
use crate::packet::PacketError;
use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv6Addr;

/// Length of the fixed HIP header
pub const HIP_HEADER_LEN: usize = 40;
/// Largest HIP message the header length field can describe
pub const HIP_MAX_LEN: usize = (u8::MAX as usize + 1) * 8;
/// HIP protocol version carried in the header
pub const HIP_VERSION: u8 = 1;

const OFF_HDR_LEN: usize = 1;
const OFF_TYPE: usize = 2;
const OFF_VERSION: usize = 3;
const OFF_CHECKSUM: usize = 4;
const OFF_CONTROLS: usize = 6;
const OFF_SENDER: usize = 8;
const OFF_RECEIVER: usize = 24;

/// Errors related to HIP messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HipError {
    /// Shorter than the fixed header
    #[error("HIP message too short: {0} bytes")]
    TooShort(usize),
    /// Header length points past the end of the buffer
    #[error("HIP header length covers {declared} bytes, only {available} available")]
    BadLength {
        /// bytes covered by the header length field
        declared: usize,
        /// bytes present
        available: usize,
    },
    /// A parameter runs past the end of the message
    #[error("truncated parameter of type {0}")]
    TruncatedParam(u16),
    /// A parameter is too short for its type or carries unexpected values
    #[error("malformed parameter of type {ty}: {reason}")]
    MalformedParam {
        /// parameter type
        ty: u16,
        /// what is wrong with it
        reason: &'static str,
    },
    /// The message does not fit the header length field
    #[error("HIP message of {0} bytes is too large")]
    TooLarge(usize),
    /// Error in the IP packet carrying the message
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// A Host Identity Tag
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hit([u8; 16]);

impl Hit {
    /// Create a HIT from its bytes
    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The bytes of this HIT
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<Ipv6Addr> for Hit {
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Hit> for Ipv6Addr {
    fn from(hit: Hit) -> Self {
        Ipv6Addr::from(hit.0)
    }
}

/* HITs are written like IPv6 addresses */
impl Display for Hit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Ipv6Addr::from(self.0))
    }
}

impl Debug for Hit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hit({self})")
    }
}

/// HIP packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Initiator's first message
    I1,
    /// Responder's reply to I1
    R1,
    /// Initiator's second message
    I2,
    /// Responder's confirmation
    R2,
    /// Readdressing and rekeying
    Update,
    /// Notification
    Notify,
    /// Association teardown
    Close,
    /// Teardown acknowledgement
    CloseAck,
    /// Anything else
    Other(u8),
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value & 0x7f {
            1 => PacketType::I1,
            2 => PacketType::R1,
            3 => PacketType::I2,
            4 => PacketType::R2,
            16 => PacketType::Update,
            17 => PacketType::Notify,
            18 => PacketType::Close,
            19 => PacketType::CloseAck,
            other => PacketType::Other(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(value: PacketType) -> Self {
        match value {
            PacketType::I1 => 1,
            PacketType::R1 => 2,
            PacketType::I2 => 3,
            PacketType::R2 => 4,
            PacketType::Update => 16,
            PacketType::Notify => 17,
            PacketType::Close => 18,
            PacketType::CloseAck => 19,
            PacketType::Other(other) => other & 0x7f,
        }
    }
}

/// Number of bytes covered by a header length value
fn covered_len(hdr_len: u8) -> usize {
    (usize::from(hdr_len) + 1) * 8
}

/// Header length value describing a message of `len` bytes
pub(crate) fn header_len_field(len: usize) -> Result<u8, HipError> {
    if len < HIP_HEADER_LEN || len % 8 != 0 {
        return Err(HipError::BadLength {
            declared: len,
            available: len,
        });
    }
    u8::try_from(len / 8 - 1).map_err(|_| HipError::TooLarge(len))
}

fn validate(buf: &[u8]) -> Result<usize, HipError> {
    if buf.len() < HIP_HEADER_LEN {
        return Err(HipError::TooShort(buf.len()));
    }
    let declared = covered_len(buf[OFF_HDR_LEN]);
    if declared < HIP_HEADER_LEN || declared > buf.len() {
        return Err(HipError::BadLength {
            declared,
            available: buf.len(),
        });
    }
    Ok(declared)
}

fn read_hit(buf: &[u8], offset: usize) -> Hit {
    let mut hit = [0u8; 16];
    hit.copy_from_slice(&buf[offset..offset + 16]);
    Hit(hit)
}

/// Read-only view of a HIP message
#[derive(Debug, Clone, Copy)]
pub struct HipMessage<'a> {
    buf: &'a [u8],
}

impl<'a> HipMessage<'a> {
    /// Validate the header of a HIP message. The view covers the bytes announced by the
    /// header length field; anything after them is ignored.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is shorter than the header or than the announced length.
    pub fn parse(buf: &'a [u8]) -> Result<Self, HipError> {
        let len = validate(buf)?;
        Ok(Self { buf: &buf[..len] })
    }

    /// Length of the message in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always false: a valid message has at least its header
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Raw bytes of the message
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// Next header field
    #[must_use]
    pub fn next_header(&self) -> u8 {
        self.buf[0]
    }

    /// Packet type
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        PacketType::from(self.buf[OFF_TYPE])
    }

    /// Protocol version
    #[must_use]
    pub fn version(&self) -> u8 {
        self.buf[OFF_VERSION] >> 4
    }

    /// Checksum field
    #[must_use]
    pub fn checksum(&self) -> HipChecksum {
        HipChecksum::new(u16::from_be_bytes([
            self.buf[OFF_CHECKSUM],
            self.buf[OFF_CHECKSUM + 1],
        ]))
    }

    /// Controls field
    #[must_use]
    pub fn controls(&self) -> u16 {
        u16::from_be_bytes([self.buf[OFF_CONTROLS], self.buf[OFF_CONTROLS + 1]])
    }

    /// HIT of the sender
    #[must_use]
    pub fn sender(&self) -> Hit {
        read_hit(self.buf, OFF_SENDER)
    }

    /// HIT of the receiver
    #[must_use]
    pub fn receiver(&self) -> Hit {
        read_hit(self.buf, OFF_RECEIVER)
    }

    /// Iterate over the raw parameters
    #[must_use]
    pub fn params(&self) -> ParamIter<'a> {
        ParamIter::new(&self.buf[HIP_HEADER_LEN..])
    }

    /// Iterate over the parameters this crate understands, skipping malformed ones
    pub fn typed_params(&self) -> impl Iterator<Item = HipParam> + 'a {
        self.params()
            .filter_map(Result::ok)
            .filter_map(|raw| HipParam::parse(&raw).ok())
    }

    /// The first well-formed ESP_INFO parameter, if any
    #[must_use]
    pub fn esp_info(&self) -> Option<EspInfo> {
        self.typed_params().find_map(|p| match p {
            HipParam::EspInfo(info) => Some(info),
            _ => None,
        })
    }

    /// All well-formed LOCATOR parameters
    pub fn locators(&self) -> impl Iterator<Item = Locator> + 'a {
        self.typed_params().filter_map(|p| match p {
            HipParam::Locator(locator) => Some(locator),
            _ => None,
        })
    }

    /// Ones-complement sum of the message, with the checksum field read as zero
    fn compute_checksum(&self, pseudo: &PseudoHeader) -> HipChecksum {
        let Ok(len) = u16::try_from(self.buf.len()) else {
            unreachable!("length bounded by the header length field");
        };
        let sum = pseudo
            .sum(len)
            .add_slice(&self.buf[..OFF_CHECKSUM])
            .add_slice(&self.buf[OFF_CHECKSUM + 2..]);
        HipChecksum::new(sum.ones_complement().to_be())
    }
}

/// Mutable view of a HIP message, used to fix up its length and checksum
#[derive(Debug)]
pub struct HipMessageMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> HipMessageMut<'a> {
    /// Validate the header of a HIP message held in a mutable buffer
    ///
    /// # Errors
    ///
    /// Fails if the buffer is shorter than the header or than the announced length.
    pub fn parse(buf: &'a mut [u8]) -> Result<Self, HipError> {
        let len = validate(buf)?;
        Ok(Self {
            buf: &mut buf[..len],
        })
    }

    /// Read-only view of the message
    #[must_use]
    pub fn as_message(&self) -> HipMessage<'_> {
        HipMessage { buf: self.buf }
    }
}

impl Checksum for HipMessageMut<'_> {
    type Payload<'p>
        = PseudoHeader
    where
        Self: 'p;
    type Checksum = HipChecksum;

    fn checksum(&self) -> Self::Checksum {
        self.as_message().checksum()
    }

    fn compute_checksum(&self, payload: &PseudoHeader) -> Self::Checksum {
        self.as_message().compute_checksum(payload)
    }

    fn set_checksum(&mut self, checksum: Self::Checksum) -> &mut Self {
        self.buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&u16::from(checksum).to_be_bytes());
        self
    }
}

/// Rewrite the header length field of a message. The buffer must hold at least `len` bytes.
pub(crate) fn set_header_len(buf: &mut [u8], len: usize) -> Result<(), HipError> {
    if buf.len() < len {
        return Err(HipError::BadLength {
            declared: len,
            available: buf.len(),
        });
    }
    buf[OFF_HDR_LEN] = header_len_field(len)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub(crate) mod test_utils {
    use super::{HipMessageBuilder, Hit, PacketType};

    pub(crate) const HIT_A: Hit = Hit::new([
        0x20, 0x01, 0x00, 0x10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xaa,
    ]);
    pub(crate) const HIT_B: Hit = Hit::new([
        0x20, 0x01, 0x00, 0x10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xbb,
    ]);

    /// A bare message of the given type from A to B
    pub(crate) fn bare_message(packet_type: PacketType) -> Vec<u8> {
        HipMessageBuilder::new(packet_type, HIT_A, HIT_B)
            .build()
            .expect("Should succeed")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::test_utils::{HIT_A, HIT_B, bare_message};
    use super::*;

    #[test]
    fn test_packet_type_mapping() {
        for (raw, ty) in [
            (1u8, PacketType::I1),
            (2, PacketType::R1),
            (3, PacketType::I2),
            (4, PacketType::R2),
            (16, PacketType::Update),
            (18, PacketType::Close),
            (19, PacketType::CloseAck),
        ] {
            assert_eq!(PacketType::from(raw), ty);
            assert_eq!(u8::from(ty), raw);
        }
        /* the top bit is a fixed zero and must be ignored */
        assert_eq!(PacketType::from(0x81), PacketType::I1);
        assert_eq!(PacketType::from(42), PacketType::Other(42));
    }

    #[test]
    fn test_parse_header_fields() {
        let buf = bare_message(PacketType::I1);
        let msg = HipMessage::parse(&buf).expect("Should succeed");
        assert_eq!(msg.len(), HIP_HEADER_LEN);
        assert_eq!(msg.packet_type(), PacketType::I1);
        assert_eq!(msg.version(), HIP_VERSION);
        assert_eq!(msg.sender(), HIT_A);
        assert_eq!(msg.receiver(), HIT_B);
        assert_eq!(msg.params().count(), 0);
    }

    #[test]
    fn test_parse_rejects_bad_lengths() {
        assert_eq!(HipMessage::parse(&[0u8; 12]).err(), Some(HipError::TooShort(12)));

        let mut buf = bare_message(PacketType::R2);
        buf[OFF_HDR_LEN] = 10;
        assert_eq!(
            HipMessage::parse(&buf).err(),
            Some(HipError::BadLength {
                declared: 88,
                available: 40
            })
        );
    }

    #[test]
    fn test_checksum_update_validates() {
        let mut buf = bare_message(PacketType::Close);
        let pseudo = PseudoHeader::new("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap());
        let mut msg = HipMessageMut::parse(&mut buf).expect("Should succeed");
        msg.update_checksum(&pseudo);
        assert!(msg.validate_checksum(&pseudo).is_ok());

        /* the checksum covers the pseudo-header */
        let other = PseudoHeader::new("10.0.0.1".parse().unwrap(), "10.0.0.3".parse().unwrap());
        assert!(msg.validate_checksum(&other).is_err());
    }

    #[test]
    fn test_checksum_against_plain_sum() {
        let mut buf = bare_message(PacketType::Update);
        let pseudo = PseudoHeader::new("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap());
        HipMessageMut::parse(&mut buf)
            .expect("Should succeed")
            .update_checksum(&pseudo);

        /* plain big-endian ones-complement sum over pseudo-header and message */
        let mut words: Vec<u8> = vec![10, 0, 0, 1, 10, 0, 0, 2, 0, 139, 0, 40];
        words.extend_from_slice(&buf);
        let mut sum: u32 = words
            .chunks(2)
            .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
            .sum();
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        /* a correct checksum makes the total sum all ones */
        assert_eq!(sum, 0xffff);
    }

    #[test]
    fn test_hit_display() {
        assert_eq!(HIT_A.to_string(), "2001:10::aa");
        assert_eq!(Hit::from(Ipv6Addr::from(HIT_B)), HIT_B);
    }
}
