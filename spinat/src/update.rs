// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Proxy UPDATEs: when the router's external address changes, it readdresses the
//! associations of its clients on their behalf, signing with the tickets they issued.

use net::addr::to_ipv6_mapped;
use net::checksum::{Checksum, PseudoHeader};
use net::hip::param::{HMAC_LEN, LOCATOR_TRAFFIC_TYPE_BOTH, types};
use net::hip::{
    HipMessageBuilder, HipMessageMut, Hit, Locator, LocatorEntry, LocatorKind, PacketType,
};
use net::packet::IPPROTO_HIP;
use net::{Family, IpPacket};
use std::net::IpAddr;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

use crate::errors::SpinatError;
use crate::raw::PacketSender;
use crate::table::{ClientState, MobileRouterState, ProxyTicket};

trace_target!("spinat-update", LevelFilter::INFO, &["spinat"]);

/// Computes the HMAC tags of proxy UPDATEs
pub trait HmacSigner: Send {
    /// Tag `data` with `key`, using the HMAC of the ESP transform `transform`
    fn sign(&self, key: &[u8], transform: u16, data: &[u8]) -> Result<[u8; HMAC_LEN], SpinatError>;
}

/// What a proxy UPDATE says, and to whom
#[derive(Debug, Clone, Copy)]
pub struct ProxyUpdate<'a> {
    /// New external address of the router, the UPDATE's source
    pub new_addr: IpAddr,
    /// Where the peer is reached, the UPDATE's destination
    pub peer_addr: IpAddr,
    pub client: Hit,
    pub peer: Hit,
    pub ticket: &'a ProxyTicket,
    /// SPI the peer must now send to
    pub public_spi: u32,
    /// Locator lifetime in seconds
    pub lifetime: u32,
}

/// Build a proxy UPDATE: LOCATOR with the new address and the public SPI, the client's
/// AUTH_TICKET, then an HMAC over all of it.
pub fn build_proxy_update(
    update: &ProxyUpdate<'_>,
    signer: &dyn HmacSigner,
) -> Result<IpPacket, SpinatError> {
    let locator = Locator {
        entries: vec![LocatorEntry {
            traffic_type: LOCATOR_TRAFFIC_TYPE_BOTH,
            preferred: true,
            lifetime: update.lifetime,
            kind: LocatorKind::SpiIpv6 {
                spi: update.public_spi,
                addr: to_ipv6_mapped(&update.new_addr),
            },
        }],
    };
    let mut builder = HipMessageBuilder::new(PacketType::Update, update.client, update.peer)
        .encoded(&locator.encode()?)
        .encoded(&update.ticket.ticket.encode());
    let tag = signer.sign(
        &update.ticket.hmac_key,
        update.ticket.ticket.transform_type,
        builder.sealed()?,
    )?;
    let mut msg = builder.param(types::HMAC, &tag)?.build()?;
    HipMessageMut::parse(&mut msg)?
        .update_checksum(&PseudoHeader::new(update.new_addr, update.peer_addr));
    Ok(IpPacket::from_parts(
        update.new_addr,
        update.peer_addr,
        IPPROTO_HIP,
        msg,
    )?)
}

/// Send a proxy UPDATE announcing `out_addr` to every peer of every registered client.
/// Returns the number of UPDATEs sent.
pub fn generate_hip_updates(
    state: &MobileRouterState,
    out_addr: IpAddr,
    lifetime: u32,
    signer: &dyn HmacSigner,
    sender: &mut dyn PacketSender,
) -> usize {
    let family = Family::of(&out_addr);
    let mut sent = 0;
    for client in state
        .clients()
        .iter()
        .filter(|c| c.state == ClientState::ResponseSent)
    {
        info!("Doing UPDATE for mobile router client {}", client.addr);
        for entry in client.entries() {
            let Some(peer_addr) = entry.peer_address_in(family) else {
                warn!(
                    "Unable to find {family} address for peer {} of client {}",
                    entry.peer_hit, client.hit
                );
                continue;
            };
            let Some(ticket) = entry.ticket.as_ref() else {
                warn!("{}", SpinatError::NoTicket(entry.peer_hit));
                continue;
            };
            let update = ProxyUpdate {
                new_addr: out_addr,
                peer_addr,
                client: client.hit,
                peer: entry.peer_hit,
                ticket,
                public_spi: entry.public_spi,
                lifetime,
            };
            match build_proxy_update(&update, signer)
                .and_then(|packet| sender.send_packet(&packet))
            {
                Ok(()) => {
                    debug!("Sent UPDATE to {peer_addr}");
                    sent += 1;
                }
                Err(e) => warn!("Problem sending UPDATE to {peer_addr}: {e}"),
            }
        }
    }
    sent
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub(crate) mod fake {
    use super::*;

    /// A signer whose tag is the XOR of the key, the transform and the data
    #[derive(Debug, Default)]
    pub(crate) struct XorSigner;

    impl HmacSigner for XorSigner {
        fn sign(
            &self,
            key: &[u8],
            transform: u16,
            data: &[u8],
        ) -> Result<[u8; HMAC_LEN], SpinatError> {
            if transform == 0 {
                return Err(SpinatError::UnsupportedTransform(transform));
            }
            let mut tag = [0u8; HMAC_LEN];
            for (i, byte) in key.iter().chain(data).enumerate() {
                tag[i % HMAC_LEN] ^= byte;
            }
            tag[0] ^= transform.to_be_bytes()[1];
            Ok(tag)
        }
    }
}
