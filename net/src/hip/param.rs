// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! HIP parameters: raw TLV iteration and typed views of the parameters the mobility code
//! reads or writes.

use super::HipError;
use std::net::Ipv6Addr;

/// Parameter type codes
pub mod types {
    /// ESP_INFO: SPI and keying material index
    pub const ESP_INFO: u16 = 65;
    /// LOCATOR: alternate addresses of the sender
    pub const LOCATOR: u16 = 193;
    /// SEQ: UPDATE sequence number
    pub const SEQ: u16 = 385;
    /// ACK: UPDATE acknowledgement
    pub const ACK: u16 = 449;
    /// AUTH_TICKET: delegation ticket of a mobile-router client
    pub const AUTH_TICKET: u16 = 59841;
    /// HMAC
    pub const HMAC: u16 = 61505;
    /// HMAC_2
    pub const HMAC_2: u16 = 61569;
    /// HIP_SIGNATURE
    pub const HIP_SIGNATURE: u16 = 61697;
    /// ESP_INFO appended by a mobile router, outside of any signature
    pub const ESP_INFO_NOSIG: u16 = 62565;
}

/// Locator sub-type carrying a bare IPv6 address
pub const LOCATOR_TYPE_IPV6: u8 = 0;
/// Locator sub-type carrying an SPI followed by an IPv6 address
pub const LOCATOR_TYPE_SPI_IPV6: u8 = 1;
/// Locator is used for both HIP and ESP traffic
pub const LOCATOR_TRAFFIC_TYPE_BOTH: u8 = 0;
/// Preferred bit in the locator reserved byte
pub const LOCATOR_PREFERRED: u8 = 0x01;

const TLV_HEADER_LEN: usize = 4;
/// Length of an HMAC tag, as carried by HMAC and AUTH_TICKET
pub const HMAC_LEN: usize = 20;

/// Size a parameter occupies in a message: header, contents, and padding to 8 bytes
#[must_use]
pub fn parameter_len(contents_len: usize) -> usize {
    (TLV_HEADER_LEN + contents_len).div_ceil(8) * 8
}

/// Encode a parameter with its padding
///
/// # Errors
///
/// Fails if the contents do not fit the 16-bit length field.
pub fn encode_parameter(ty: u16, contents: &[u8]) -> Result<Vec<u8>, HipError> {
    let len = u16::try_from(contents.len()).map_err(|_| HipError::TooLarge(contents.len()))?;
    let mut out = Vec::with_capacity(parameter_len(contents.len()));
    out.extend_from_slice(&ty.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(contents);
    out.resize(parameter_len(contents.len()), 0);
    Ok(out)
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn ipv6_at(buf: &[u8], at: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&buf[at..at + 16]);
    Ipv6Addr::from(octets)
}

/// A parameter as found in a message: its type and contents, without padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawParam<'a> {
    /// Parameter type
    pub ty: u16,
    /// Contents, as long as the length field says
    pub contents: &'a [u8],
}

/// Iterator over the parameters of a message.
///
/// A parameter running past the end of the message is reported once as an error and ends
/// the iteration.
#[derive(Debug, Clone)]
pub struct ParamIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ParamIter<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for ParamIter<'a> {
    type Item = Result<RawParam<'a>, HipError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return None;
        }
        if rest.len() < TLV_HEADER_LEN {
            self.pos = self.buf.len();
            return Some(Err(HipError::TruncatedParam(0)));
        }
        let ty = be16(rest, 0);
        let len = usize::from(be16(rest, 2));
        let Some(contents) = rest.get(TLV_HEADER_LEN..TLV_HEADER_LEN + len) else {
            self.pos = self.buf.len();
            return Some(Err(HipError::TruncatedParam(ty)));
        };
        /* the last parameter may lack its padding */
        self.pos += parameter_len(len).min(rest.len());
        Some(Ok(RawParam { ty, contents }))
    }
}

/// ESP_INFO parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EspInfo {
    /// Index of the keying material to draw from
    pub keymat_index: u16,
    /// SPI being replaced, zero when none
    pub old_spi: u32,
    /// SPI the sender wants to receive on
    pub new_spi: u32,
}

impl EspInfo {
    const CONTENTS_LEN: usize = 12;

    fn parse(ty: u16, contents: &[u8]) -> Result<Self, HipError> {
        if contents.len() < Self::CONTENTS_LEN {
            return Err(HipError::MalformedParam {
                ty,
                reason: "ESP_INFO shorter than 12 bytes",
            });
        }
        Ok(Self {
            keymat_index: be16(contents, 2),
            old_spi: be32(contents, 4),
            new_spi: be32(contents, 8),
        })
    }

    /// Encode under the given type: [`types::ESP_INFO`] or [`types::ESP_INFO_NOSIG`]
    #[must_use]
    pub fn encode(&self, ty: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&ty.to_be_bytes());
        out.extend_from_slice(&12u16.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.keymat_index.to_be_bytes());
        out.extend_from_slice(&self.old_spi.to_be_bytes());
        out.extend_from_slice(&self.new_spi.to_be_bytes());
        out
    }
}

/// Address carried by a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    /// Plain IPv6 (or IPv4-mapped) address
    Ipv6(Ipv6Addr),
    /// SPI and IPv6 (or IPv4-mapped) address
    SpiIpv6 {
        /// SPI the locator is bound to
        spi: u32,
        /// the address
        addr: Ipv6Addr,
    },
    /// Sub-type this crate does not interpret
    Unknown(u8),
}

/// One entry of a LOCATOR parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorEntry {
    /// Traffic type (HIP, ESP, both)
    pub traffic_type: u8,
    /// Whether the P bit is set
    pub preferred: bool,
    /// Lifetime in seconds
    pub lifetime: u32,
    /// The locator itself
    pub kind: LocatorKind,
}

impl LocatorEntry {
    const HEADER_LEN: usize = 8;

    /// The address carried, if the sub-type is known
    #[must_use]
    pub fn address(&self) -> Option<Ipv6Addr> {
        match self.kind {
            LocatorKind::Ipv6(addr) | LocatorKind::SpiIpv6 { addr, .. } => Some(addr),
            LocatorKind::Unknown(_) => None,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let (locator_type, words) = match self.kind {
            LocatorKind::Ipv6(_) => (LOCATOR_TYPE_IPV6, 4u8),
            LocatorKind::SpiIpv6 { .. } => (LOCATOR_TYPE_SPI_IPV6, 5u8),
            LocatorKind::Unknown(t) => (t, 0u8),
        };
        out.push(self.traffic_type);
        out.push(locator_type);
        out.push(words);
        out.push(if self.preferred { LOCATOR_PREFERRED } else { 0 });
        out.extend_from_slice(&self.lifetime.to_be_bytes());
        match self.kind {
            LocatorKind::Ipv6(addr) => out.extend_from_slice(&addr.octets()),
            LocatorKind::SpiIpv6 { spi, addr } => {
                out.extend_from_slice(&spi.to_be_bytes());
                out.extend_from_slice(&addr.octets());
            }
            LocatorKind::Unknown(_) => {}
        }
    }
}

/// LOCATOR parameter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Locator {
    /// Entries in message order
    pub entries: Vec<LocatorEntry>,
}

impl Locator {
    fn parse(ty: u16, contents: &[u8]) -> Result<Self, HipError> {
        let mut entries = Vec::new();
        let mut rest = contents;
        while rest.len() >= LocatorEntry::HEADER_LEN {
            let words = usize::from(rest[2]);
            let end = LocatorEntry::HEADER_LEN + words * 4;
            let Some(locator) = rest.get(LocatorEntry::HEADER_LEN..end) else {
                return Err(HipError::MalformedParam {
                    ty,
                    reason: "locator runs past the parameter",
                });
            };
            let kind = match (rest[1], words) {
                (LOCATOR_TYPE_IPV6, 4) => LocatorKind::Ipv6(ipv6_at(locator, 0)),
                (LOCATOR_TYPE_SPI_IPV6, 5) => LocatorKind::SpiIpv6 {
                    spi: be32(locator, 0),
                    addr: ipv6_at(locator, 4),
                },
                (other, _) => LocatorKind::Unknown(other),
            };
            entries.push(LocatorEntry {
                traffic_type: rest[0],
                preferred: rest[3] & LOCATOR_PREFERRED != 0,
                lifetime: be32(rest, 4),
                kind,
            });
            rest = &rest[end..];
        }
        Ok(Self { entries })
    }

    /// Encode as a LOCATOR parameter
    ///
    /// # Errors
    ///
    /// Fails if the entries do not fit a parameter.
    pub fn encode(&self) -> Result<Vec<u8>, HipError> {
        let mut contents = Vec::new();
        for entry in &self.entries {
            entry.encode_into(&mut contents);
        }
        encode_parameter(types::LOCATOR, &contents)
    }
}

/// AUTH_TICKET parameter: a ticket by which a mobile-router client lets the router
/// readdress its associations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthTicket {
    /// Index of the HMAC key in the client's keying material
    pub hmac_key_index: u16,
    /// ESP transform of the key
    pub transform_type: u16,
    /// Authorized action
    pub action: u16,
    /// Lifetime of the ticket
    pub lifetime: u16,
    /// Tag computed by the client over the ticket
    pub hmac: [u8; HMAC_LEN],
}

impl AuthTicket {
    const CONTENTS_LEN: usize = 8 + HMAC_LEN;

    fn parse(ty: u16, contents: &[u8]) -> Result<Self, HipError> {
        if contents.len() < Self::CONTENTS_LEN {
            return Err(HipError::MalformedParam {
                ty,
                reason: "AUTH_TICKET shorter than 28 bytes",
            });
        }
        let mut hmac = [0u8; HMAC_LEN];
        hmac.copy_from_slice(&contents[8..Self::CONTENTS_LEN]);
        Ok(Self {
            hmac_key_index: be16(contents, 0),
            transform_type: be16(contents, 2),
            action: be16(contents, 4),
            lifetime: be16(contents, 6),
            hmac,
        })
    }

    /// Encode as an AUTH_TICKET parameter
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut contents = Vec::with_capacity(Self::CONTENTS_LEN);
        contents.extend_from_slice(&self.hmac_key_index.to_be_bytes());
        contents.extend_from_slice(&self.transform_type.to_be_bytes());
        contents.extend_from_slice(&self.action.to_be_bytes());
        contents.extend_from_slice(&self.lifetime.to_be_bytes());
        contents.extend_from_slice(&self.hmac);
        /* fixed size, always fits */
        encode_parameter(types::AUTH_TICKET, &contents).unwrap_or_default()
    }
}

/// Parameters with a typed view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HipParam {
    /// ESP_INFO
    EspInfo(EspInfo),
    /// ESP_INFO added by a mobile router
    EspInfoNoSig(EspInfo),
    /// LOCATOR
    Locator(Locator),
    /// AUTH_TICKET
    AuthTicket(AuthTicket),
    /// HMAC tag
    Hmac([u8; HMAC_LEN]),
    /// Any other parameter, by type
    Other(u16),
}

impl HipParam {
    /// Interpret a raw parameter
    ///
    /// # Errors
    ///
    /// Fails if a known parameter is too short or inconsistent.
    pub fn parse(raw: &RawParam<'_>) -> Result<Self, HipError> {
        Ok(match raw.ty {
            types::ESP_INFO => HipParam::EspInfo(EspInfo::parse(raw.ty, raw.contents)?),
            types::ESP_INFO_NOSIG => HipParam::EspInfoNoSig(EspInfo::parse(raw.ty, raw.contents)?),
            types::LOCATOR => HipParam::Locator(Locator::parse(raw.ty, raw.contents)?),
            types::AUTH_TICKET => HipParam::AuthTicket(AuthTicket::parse(raw.ty, raw.contents)?),
            types::HMAC => {
                let tag = raw.contents.get(..HMAC_LEN).ok_or(HipError::MalformedParam {
                    ty: raw.ty,
                    reason: "HMAC shorter than 20 bytes",
                })?;
                let mut hmac = [0u8; HMAC_LEN];
                hmac.copy_from_slice(tag);
                HipParam::Hmac(hmac)
            }
            other => HipParam::Other(other),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parameter_len() {
        assert_eq!(parameter_len(12), 16);
        assert_eq!(parameter_len(28), 32);
        assert_eq!(parameter_len(20), 24);
        assert_eq!(parameter_len(5), 16);
        assert_eq!(parameter_len(4), 8);
    }

    #[test]
    fn test_esp_info_layout() {
        let info = EspInfo {
            keymat_index: 3,
            old_spi: 0,
            new_spi: 0x1000,
        };
        let bytes = info.encode(types::ESP_INFO_NOSIG);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &[0xf4, 0x65, 0, 12]);
        assert_eq!(&bytes[12..], &[0, 0, 0x10, 0]);

        let mut iter = ParamIter::new(&bytes);
        let raw = iter.next().expect("Should be found").expect("Should succeed");
        assert_eq!(HipParam::parse(&raw), Ok(HipParam::EspInfoNoSig(info)));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_locator_spi_and_plain() {
        let locator = Locator {
            entries: vec![
                LocatorEntry {
                    traffic_type: LOCATOR_TRAFFIC_TYPE_BOTH,
                    preferred: true,
                    lifetime: 3600,
                    kind: LocatorKind::SpiIpv6 {
                        spi: 0xdead_beef,
                        addr: "::ffff:192.0.2.7".parse().unwrap(),
                    },
                },
                LocatorEntry {
                    traffic_type: LOCATOR_TRAFFIC_TYPE_BOTH,
                    preferred: false,
                    lifetime: 60,
                    kind: LocatorKind::Ipv6("2001:db8::7".parse().unwrap()),
                },
            ],
        };
        let bytes = locator.encode().expect("Should succeed");
        /* 8 + 20 and 8 + 16 bytes of entries, plus header, padded */
        assert_eq!(bytes.len(), parameter_len(52));

        let raw = ParamIter::new(&bytes)
            .next()
            .expect("Should be found")
            .expect("Should succeed");
        assert_eq!(HipParam::parse(&raw), Ok(HipParam::Locator(locator)));
    }

    #[test]
    fn test_truncated_parameter_ends_iteration() {
        let mut bytes = EspInfo::default().encode(types::ESP_INFO);
        bytes.extend_from_slice(&[0x00, 0xc1, 0x00, 0x40, 0, 0]);
        let items: Vec<_> = ParamIter::new(&bytes).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err(HipError::TruncatedParam(types::LOCATOR)));
    }

    #[test]
    fn test_short_esp_info_is_malformed() {
        let bytes = encode_parameter(types::ESP_INFO, &[0u8; 6]).expect("Should succeed");
        let raw = ParamIter::new(&bytes)
            .next()
            .expect("Should be found")
            .expect("Should succeed");
        assert!(matches!(
            HipParam::parse(&raw),
            Err(HipError::MalformedParam { ty: 65, .. })
        ));
    }

    #[test]
    fn test_arbitrary_bytes_never_panic() {
        bolero::check!().with_type().for_each(|bytes: &Vec<u8>| {
            for raw in ParamIter::new(bytes).flatten() {
                let _ = HipParam::parse(&raw);
            }
        });
    }
}
