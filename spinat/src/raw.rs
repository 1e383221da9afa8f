// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Egress of packets the router builds or translates

use net::IpPacket;
use nix::sys::socket::{
    AddressFamily, MsgFlags, SockFlag, SockProtocol, SockType, SockaddrIn, SockaddrIn6, sendto,
    socket,
};
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, OwnedFd};
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, trace};

use crate::errors::SpinatError;

trace_target!("spinat-raw", LevelFilter::INFO, &["spinat"]);

/// Sends complete IP packets
pub trait PacketSender: Send {
    /// Send `packet` to its destination address
    fn send_packet(&mut self, packet: &IpPacket) -> Result<(), SpinatError>;
}

/// A pair of raw sockets, one per family, that send packets with the IP header they carry
#[derive(Debug)]
pub struct RawSockets {
    v4: OwnedFd,
    v6: OwnedFd,
}

fn open(family: AddressFamily) -> Result<OwnedFd, SpinatError> {
    socket(family, SockType::Raw, SockFlag::SOCK_CLOEXEC, SockProtocol::Raw)
        .map_err(|e| SpinatError::Socket(format!("raw {family:?} socket: {e}")))
}

impl RawSockets {
    /// Open both sockets. Needs `CAP_NET_RAW`.
    pub fn open() -> Result<Self, SpinatError> {
        let sockets = Self {
            v4: open(AddressFamily::Inet)?,
            v6: open(AddressFamily::Inet6)?,
        };
        debug!("Opened raw sockets");
        Ok(sockets)
    }
}

impl PacketSender for RawSockets {
    fn send_packet(&mut self, packet: &IpPacket) -> Result<(), SpinatError> {
        let bytes = packet.to_bytes();
        let dst = packet.destination();
        let sent = match dst {
            IpAddr::V4(addr) => sendto(
                self.v4.as_raw_fd(),
                &bytes,
                &SockaddrIn::from(SocketAddrV4::new(addr, 0)),
                MsgFlags::empty(),
            ),
            IpAddr::V6(addr) => sendto(
                self.v6.as_raw_fd(),
                &bytes,
                &SockaddrIn6::from(SocketAddrV6::new(addr, 0, 0, 0)),
                MsgFlags::empty(),
            ),
        };
        let sent = sent.map_err(|e| SpinatError::SendFailure(dst, e.to_string()))?;
        trace!("Sent {sent} bytes to {dst}");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Keeps what it is asked to send
    #[derive(Debug, Default, Clone)]
    pub(crate) struct RecordingSender {
        pub(crate) sent: Arc<Mutex<Vec<IpPacket>>>,
        pub(crate) fail: bool,
    }

    impl RecordingSender {
        pub(crate) fn sent(&self) -> Vec<IpPacket> {
            self.sent.lock().clone()
        }
    }

    impl PacketSender for RecordingSender {
        fn send_packet(&mut self, packet: &IpPacket) -> Result<(), SpinatError> {
            if self.fail {
                return Err(SpinatError::SendFailure(
                    packet.destination(),
                    "unreachable".to_string(),
                ));
            }
            self.sent.lock().push(packet.clone());
            Ok(())
        }
    }
}
