// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Building HIP messages and growing existing ones.

use super::param::encode_parameter;
use super::{
    HIP_HEADER_LEN, HIP_MAX_LEN, HIP_VERSION, HipError, HipMessage, Hit, PacketType,
    set_header_len,
};
use crate::packet::{IPPROTO_NONE, IpPacket};

/// Fixed one bit at the end of the version byte
const HIP_RES_FIXED_BIT: u8 = 0x01;

/// Builds a HIP message parameter by parameter. Parameters must be added in ascending
/// type order, as receivers expect.
#[derive(Debug, Clone)]
pub struct HipMessageBuilder {
    buf: Vec<u8>,
}

impl HipMessageBuilder {
    /// Start a message with an empty parameter list and a zero checksum
    #[must_use]
    pub fn new(packet_type: PacketType, sender: Hit, receiver: Hit) -> Self {
        let mut buf = Vec::with_capacity(HIP_HEADER_LEN * 4);
        buf.push(IPPROTO_NONE);
        buf.push(0);
        buf.push(u8::from(packet_type));
        buf.push((HIP_VERSION << 4) | HIP_RES_FIXED_BIT);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(sender.as_bytes());
        buf.extend_from_slice(receiver.as_bytes());
        Self { buf }
    }

    /// Set the controls field
    #[must_use]
    pub fn controls(mut self, controls: u16) -> Self {
        self.buf[6..8].copy_from_slice(&controls.to_be_bytes());
        self
    }

    /// Append an already encoded (and padded) parameter
    #[must_use]
    pub fn encoded(mut self, param: &[u8]) -> Self {
        self.buf.extend_from_slice(param);
        self
    }

    /// Append a parameter from its type and contents
    ///
    /// # Errors
    ///
    /// Fails if the contents do not fit a parameter.
    pub fn param(self, ty: u16, contents: &[u8]) -> Result<Self, HipError> {
        Ok(self.encoded(&encode_parameter(ty, contents)?))
    }

    /// Current length of the message
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always false: the header is there from the start
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Set the header length to cover what has been built so far and return the bytes.
    /// This is what an HMAC parameter appended next must cover.
    ///
    /// # Errors
    ///
    /// Fails if the message is too large.
    pub fn sealed(&mut self) -> Result<&[u8], HipError> {
        if self.buf.len() > HIP_MAX_LEN {
            return Err(HipError::TooLarge(self.buf.len()));
        }
        let len = self.buf.len();
        set_header_len(&mut self.buf, len)?;
        Ok(&self.buf)
    }

    /// Finish the message. The checksum is left zero: it depends on the IP addresses the
    /// message will be sent with.
    ///
    /// # Errors
    ///
    /// Fails if the message is too large.
    pub fn build(mut self) -> Result<Vec<u8>, HipError> {
        self.sealed()?;
        Ok(self.buf)
    }
}

/// Append an encoded parameter to the HIP message carried by `packet`, growing the IP
/// length fields and the HIP header length together. The message must fill the payload.
///
/// # Errors
///
/// Fails if the payload is not exactly one HIP message or if the result would be too large.
/// The packet is unchanged on error.
pub fn append_parameter(packet: &mut IpPacket, param: &[u8]) -> Result<(), HipError> {
    let msg_len = HipMessage::parse(packet.payload())?.len();
    if msg_len != packet.payload().len() {
        return Err(HipError::BadLength {
            declared: msg_len,
            available: packet.payload().len(),
        });
    }
    let new_len = msg_len + param.len();
    if new_len > HIP_MAX_LEN {
        return Err(HipError::TooLarge(new_len));
    }
    if param.len() % 8 != 0 {
        return Err(HipError::BadLength {
            declared: new_len,
            available: new_len,
        });
    }
    packet.extend_payload(param)?;
    set_header_len(packet.payload_mut(), new_len)
}
