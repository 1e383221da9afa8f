// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A [`PacketFeed`] over a unix datagram socket. The interception adapter sends the
//! packets it holds, and the registration machinery its control messages, as datagrams
//! to the socket. Verdicts go back to the sender of each packet.
//!
//! Messages are big-endian and start with a kind octet:
//!
//! | kind | contents |
//! |------|----------|
//! | 1 packet | id u32, indev length u8, indev, outdev length u8, outdev, IP packet |
//! | 2 register | client HIT (16), address family u8 (4 or 6), address (4 or 16) |
//! | 3 deregister | client HIT (16) |
//! | 4 ticket | client HIT (16), peer HIT (16), key index u16, transform u16, action u16, lifetime u16, ticket HMAC (20), key length u8, key |
//!
//! A verdict is the packet id u32, 1 to accept or 0 to drop, then the replacement packet
//! if the packet was rewritten.

use net::hip::param::HMAC_LEN;
use net::hip::{AuthTicket, Hit};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::errors::SpinatError;
use crate::inspect::Verdict;
use crate::router::{ControlMessage, FeedMessage, InterceptedPacket, PacketFeed};
use crate::table::ProxyTicket;

pub const MSG_PACKET: u8 = 1;
pub const MSG_REGISTER: u8 = 2;
pub const MSG_DEREGISTER: u8 = 3;
pub const MSG_TICKET: u8 = 4;

/// Largest message: a full IP packet behind the longest header
const MAX_MESSAGE: usize = 65_535 + 5 + 2 * 256;

/// Reads big-endian fields off a message
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], SpinatError> {
        if self.buf.len() < len {
            return Err(SpinatError::Feed(format!(
                "message truncated: {len} bytes wanted, {} left",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }
    fn array<const N: usize>(&mut self) -> Result<[u8; N], SpinatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
    fn u8(&mut self) -> Result<u8, SpinatError> {
        Ok(self.array::<1>()?[0])
    }
    fn u16(&mut self) -> Result<u16, SpinatError> {
        Ok(u16::from_be_bytes(self.array()?))
    }
    fn u32(&mut self) -> Result<u32, SpinatError> {
        Ok(u32::from_be_bytes(self.array()?))
    }
    fn hit(&mut self) -> Result<Hit, SpinatError> {
        Ok(Hit::new(self.array()?))
    }
    /// A length-prefixed device name. Empty means none.
    fn device(&mut self) -> Result<Option<String>, SpinatError> {
        let len = self.u8()?;
        let name = self.take(len as usize)?;
        if name.is_empty() {
            return Ok(None);
        }
        String::from_utf8(name.to_vec())
            .map(Some)
            .map_err(|_| SpinatError::Feed("device name is not UTF-8".to_string()))
    }
    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}

/// Decode one datagram
pub fn decode_message(buf: &[u8]) -> Result<FeedMessage, SpinatError> {
    let mut r = Reader { buf };
    match r.u8()? {
        MSG_PACKET => Ok(FeedMessage::Packet(InterceptedPacket {
            id: r.u32()?,
            indev: r.device()?,
            outdev: r.device()?,
            data: r.rest().to_vec(),
        })),
        MSG_REGISTER => {
            let hit = r.hit()?;
            let addr = match r.u8()? {
                4 => IpAddr::V4(Ipv4Addr::from(r.array::<4>()?)),
                6 => IpAddr::V6(Ipv6Addr::from(r.array::<16>()?)),
                family => {
                    return Err(SpinatError::Feed(format!("bad address family {family}")));
                }
            };
            Ok(FeedMessage::Control(ControlMessage::Register { hit, addr }))
        }
        MSG_DEREGISTER => Ok(FeedMessage::Control(ControlMessage::Deregister {
            hit: r.hit()?,
        })),
        MSG_TICKET => {
            let client = r.hit()?;
            let peer = r.hit()?;
            let ticket = AuthTicket {
                hmac_key_index: r.u16()?,
                transform_type: r.u16()?,
                action: r.u16()?,
                lifetime: r.u16()?,
                hmac: r.array::<HMAC_LEN>()?,
            };
            let key_len = r.u8()?;
            let hmac_key = r.take(key_len as usize)?.to_vec();
            Ok(FeedMessage::Control(ControlMessage::Ticket {
                client,
                peer,
                ticket: ProxyTicket { hmac_key, ticket },
            }))
        }
        kind => Err(SpinatError::Feed(format!("unknown message kind {kind}"))),
    }
}

/// Encode the verdict of packet `id`
#[must_use]
pub fn encode_verdict(id: u32, verdict: Verdict, data: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + data.map_or(0, <[u8]>::len));
    out.extend_from_slice(&id.to_be_bytes());
    out.push(u8::from(verdict == Verdict::Accept));
    if let Some(data) = data {
        out.extend_from_slice(data);
    }
    out
}

fn open_unix_sock(path: &Path) -> Result<UnixDatagram, SpinatError> {
    let _ = fs::remove_file(path);
    let sock = UnixDatagram::bind(path)
        .map_err(|e| SpinatError::Socket(format!("Failed to bind {}: {e}", path.display())))?;
    let mut perms = fs::metadata(path)
        .map_err(|e| SpinatError::Socket(format!("Failure retrieving socket metadata: {e}")))?
        .permissions();
    /* tickets carry keys: owner only */
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)
        .map_err(|e| SpinatError::Socket(format!("Failure setting socket permissions: {e}")))?;
    Ok(sock)
}

/// The feed of a mobile router run next to an interception adapter
#[derive(Debug)]
pub struct UnixFeed {
    sock: UnixDatagram,
    path: PathBuf,
    /// Where to send the verdict of each pending packet
    pending: HashMap<u32, SocketAddr>,
    buf: Vec<u8>,
}

impl UnixFeed {
    /// Bind the feed socket at `path`, replacing any stale socket file
    pub fn bind(path: &Path) -> Result<Self, SpinatError> {
        let sock = open_unix_sock(path)?;
        debug!("Mobile router feed bound at {}", path.display());
        Ok(Self {
            sock,
            path: path.to_path_buf(),
            pending: HashMap::new(),
            buf: vec![0; MAX_MESSAGE],
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PacketFeed for UnixFeed {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, SpinatError> {
        /* a zero timeout would mean blocking forever */
        self.sock
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(|e| SpinatError::Socket(e.to_string()))?;
        let (len, peer) = match self.sock.recv_from(self.buf.as_mut_slice()) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) => return Err(SpinatError::Feed(e.to_string())),
        };
        match decode_message(&self.buf[..len]) {
            Ok(FeedMessage::Packet(packet)) => {
                trace!("Packet {} of {} bytes", packet.id, packet.data.len());
                self.pending.insert(packet.id, peer);
                Ok(Some(FeedMessage::Packet(packet)))
            }
            Ok(control) => Ok(Some(control)),
            Err(e) => {
                warn!("Ignoring message of {len} bytes: {e}");
                Ok(None)
            }
        }
    }

    fn set_verdict(
        &mut self,
        id: u32,
        verdict: Verdict,
        data: Option<&[u8]>,
    ) -> Result<(), SpinatError> {
        let peer = self
            .pending
            .remove(&id)
            .ok_or_else(|| SpinatError::Feed(format!("no pending packet {id}")))?;
        if peer.as_pathname().is_none() {
            return Err(SpinatError::Feed(format!(
                "sender of packet {id} is unnamed, cannot return the verdict"
            )));
        }
        self.sock
            .send_to_addr(&encode_verdict(id, verdict, data), &peer)
            .map(|_| ())
            .map_err(|e| SpinatError::Feed(e.to_string()))
    }
}

impl Drop for UnixFeed {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
