// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The mobile router dispatch loop: intercepted HIP and ESP packets go through SPINAT,
//! and changes of the external address are announced to the peers of the clients.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use mobility::ExternalAddressMailbox;
use net::IpPacket;
use net::hip::Hit;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, trace, warn};

use crate::errors::SpinatError;
use crate::esp::{Direction, EspVerdict, check_esp_packet};
use crate::inspect::{Verdict, check_hip_packet};
use crate::params::RouterParams;
use crate::raw::PacketSender;
use crate::table::{ClientState, ProxyTicket, SharedRouterState};
use crate::update::{HmacSigner, generate_hip_updates};

trace_target!("spinat", LevelFilter::INFO, &["spinat"]);

/// A packet held by the interception mechanism until it gets a verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedPacket {
    pub id: u32,
    /// Device the packet came in through, if any
    pub indev: Option<String>,
    /// Device the packet leaves through, if any
    pub outdev: Option<String>,
    /// The packet, from its IP header on
    pub data: Vec<u8>,
}

/// Changes to the client table made by the registration and keying machinery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The router accepted the registration of a client
    Register { hit: Hit, addr: IpAddr },
    /// A client left
    Deregister { hit: Hit },
    /// A client issued a ticket for one of its peers
    Ticket {
        client: Hit,
        peer: Hit,
        ticket: ProxyTicket,
    },
}

/// What a [`PacketFeed`] delivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Packet(InterceptedPacket),
    Control(ControlMessage),
}

/// Where intercepted packets and control messages come from, and where verdicts go
pub trait PacketFeed: Send {
    /// Wait up to `timeout` for a message. `Ok(None)` means the wait timed out.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, SpinatError>;

    /// Release packet `id`, replacing its contents with `data` if given
    fn set_verdict(
        &mut self,
        id: u32,
        verdict: Verdict,
        data: Option<&[u8]>,
    ) -> Result<(), SpinatError>;
}

/// A verdict as returned by a [`ChannelFeed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictRecord {
    pub id: u32,
    pub verdict: Verdict,
    pub data: Option<Vec<u8>>,
}

/// A [`PacketFeed`] over channels. Messages are injected and verdicts collected through
/// the [`FeedHandle`] that comes with it.
#[derive(Debug)]
pub struct ChannelFeed {
    messages: Receiver<FeedMessage>,
    verdicts: Sender<VerdictRecord>,
}

/// The other end of a [`ChannelFeed`]
#[derive(Debug, Clone)]
pub struct FeedHandle {
    pub messages: Sender<FeedMessage>,
    pub verdicts: Receiver<VerdictRecord>,
}

impl ChannelFeed {
    #[must_use]
    pub fn new() -> (Self, FeedHandle) {
        let (messages_tx, messages_rx) = unbounded();
        let (verdicts_tx, verdicts_rx) = unbounded();
        let feed = Self {
            messages: messages_rx,
            verdicts: verdicts_tx,
        };
        let handle = FeedHandle {
            messages: messages_tx,
            verdicts: verdicts_rx,
        };
        (feed, handle)
    }
}

impl PacketFeed for ChannelFeed {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, SpinatError> {
        match self.messages.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SpinatError::Feed("message source closed".to_string()))
            }
        }
    }

    fn set_verdict(
        &mut self,
        id: u32,
        verdict: Verdict,
        data: Option<&[u8]>,
    ) -> Result<(), SpinatError> {
        self.verdicts
            .send(VerdictRecord {
                id,
                verdict,
                data: data.map(<[u8]>::to_vec),
            })
            .map_err(|_| SpinatError::Feed("verdict sink closed".to_string()))
    }
}

/// What to do with one intercepted packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub verdict: Verdict,
    /// Replacement contents, if the packet was rewritten
    pub data: Option<Vec<u8>>,
}

impl Disposition {
    const fn unchanged() -> Self {
        Self {
            verdict: Verdict::Accept,
            data: None,
        }
    }
}

/// The mobile router: SPINAT for its clients' traffic and proxy UPDATEs on external
/// address changes
pub struct MobileRouter {
    params: RouterParams,
    state: SharedRouterState,
    mailbox: Arc<ExternalAddressMailbox>,
    sender: Box<dyn PacketSender>,
    signer: Option<Box<dyn HmacSigner>>,
}

impl MobileRouter {
    #[must_use]
    pub fn new(
        params: RouterParams,
        state: SharedRouterState,
        mailbox: Arc<ExternalAddressMailbox>,
        sender: Box<dyn PacketSender>,
    ) -> Self {
        Self {
            params,
            state,
            mailbox,
            sender,
            signer: None,
        }
    }

    /// Set the signer of proxy UPDATEs. Without one no UPDATE is sent.
    #[must_use]
    pub fn with_signer(mut self, signer: Box<dyn HmacSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn state(&self) -> &SharedRouterState {
        &self.state
    }

    #[must_use]
    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    fn direction(&self, packet: &InterceptedPacket) -> Direction {
        let state = self.state.lock();
        let external = state
            .external_interface()
            .or(self.params.external_iface.as_deref());
        match (external, packet.indev.as_deref()) {
            (Some(external), Some(indev)) if external == indev => Direction::Inbound,
            _ => Direction::Outbound,
        }
    }

    /// Decide the fate of an intercepted packet. Packets that are neither HIP nor ESP, or
    /// that cannot be parsed, are accepted unchanged.
    pub fn handle_packet(&mut self, packet: &InterceptedPacket) -> Disposition {
        let mut ip = match IpPacket::parse(&packet.data) {
            Ok(ip) => ip,
            Err(e) => {
                debug!("Accepting unparseable packet {}: {e}", packet.id);
                return Disposition::unchanged();
            }
        };
        if ip.is_hip() {
            self.handle_hip(&mut ip)
        } else if ip.is_esp() {
            let direction = self.direction(packet);
            self.handle_esp(&mut ip, direction)
        } else {
            trace!("Packet {} is neither HIP nor ESP", packet.id);
            Disposition::unchanged()
        }
    }

    fn handle_hip(&self, ip: &mut IpPacket) -> Disposition {
        let verdict = check_hip_packet(&mut self.state.lock(), ip);
        match verdict {
            Ok(Verdict::Accept) => Disposition {
                verdict: Verdict::Accept,
                data: Some(ip.to_bytes()),
            },
            Ok(Verdict::Drop) => Disposition {
                verdict: Verdict::Drop,
                data: None,
            },
            Err(e) => {
                warn!("Accepting HIP packet unchanged: {e}");
                Disposition::unchanged()
            }
        }
    }

    fn handle_esp(&mut self, ip: &mut IpPacket, direction: Direction) -> Disposition {
        let verdict = check_esp_packet(&self.state.lock(), ip, direction);
        match verdict {
            EspVerdict::PassThrough => Disposition::unchanged(),
            EspVerdict::Rewritten => Disposition {
                verdict: Verdict::Accept,
                data: Some(ip.to_bytes()),
            },
            EspVerdict::Translated(translated) => {
                if let Err(e) = self.sender.send_packet(&translated) {
                    warn!("Failed to send translated ESP packet: {e}");
                }
                Disposition {
                    verdict: Verdict::Drop,
                    data: None,
                }
            }
        }
    }

    /// Pick up a new external address, if the mobility context published one, and send
    /// proxy UPDATEs for it. Returns the number of UPDATEs sent.
    pub fn check_address_change(&mut self) -> usize {
        let mut state = self.state.lock();
        let Some(addr) = self.mailbox.take() else {
            return 0;
        };
        info!("External address is now {addr}");
        state.set_out_addr(addr);
        state.capture_external_interface(self.params.external_iface.as_deref());

        let Some(signer) = self.signer.as_deref() else {
            warn!("No HMAC signer: not sending proxy UPDATEs for {addr}");
            return 0;
        };
        generate_hip_updates(
            &state,
            addr,
            self.params.locator_lifetime,
            signer,
            self.sender.as_mut(),
        )
    }

    /// Apply a change to the client table
    pub fn handle_control(&self, control: ControlMessage) -> Result<(), SpinatError> {
        let mut state = self.state.lock();
        match control {
            ControlMessage::Register { hit, addr } => {
                state.add_client(hit, addr);
                state.set_client_state(&hit, ClientState::ResponseSent)
            }
            ControlMessage::Deregister { hit } => state
                .remove_client(&hit)
                .map(|client| info!("Mobile router client {} left", client.hit))
                .ok_or(SpinatError::NoSuchClient(hit)),
            ControlMessage::Ticket {
                client,
                peer,
                ticket,
            } => {
                debug!("Ticket from client {client} for peer {peer}");
                state.set_ticket(&client, &peer, ticket)
            }
        }
    }

    /// Process messages from `feed` until `run` is cleared or the feed fails. Address
    /// changes are checked whenever the wait for a message times out.
    pub fn run(
        &mut self,
        feed: &mut dyn PacketFeed,
        run: &Arc<AtomicBool>,
    ) -> Result<(), SpinatError> {
        info!("Mobile router started");
        while run.load(Ordering::Relaxed) {
            let packet = match feed.recv_timeout(self.params.timeout) {
                Ok(Some(FeedMessage::Packet(packet))) => packet,
                Ok(Some(FeedMessage::Control(control))) => {
                    if let Err(e) = self.handle_control(control) {
                        warn!("Control message ignored: {e}");
                    }
                    continue;
                }
                Ok(None) => {
                    self.check_address_change();
                    continue;
                }
                Err(e) => {
                    error!("Packet feed failed: {e}");
                    return Err(e);
                }
            };
            let disposition = self.handle_packet(&packet);
            let len = disposition
                .data
                .as_ref()
                .map_or(packet.data.len(), Vec::len);
            trace!(
                "Packet {}: {} ({len} bytes)",
                packet.id, disposition.verdict
            );
            if let Err(e) =
                feed.set_verdict(packet.id, disposition.verdict, disposition.data.as_deref())
            {
                warn!("Failed to set verdict of packet {}: {e}", packet.id);
            }
        }
        debug!("Mobile router stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::params::RouterParamsBuilder;
    use crate::raw::fake::RecordingSender;
    use crate::table::{MobileRouterState, SpinatEntry};
    use crate::test_utils::{CLIENT, PEER, checksum_ok, esp_packet, hip_packet, ip, router_state};
    use crate::update::fake::XorSigner;
    use net::Family;
    use net::esp::spi;
    use net::hip::param::types;
    use net::hip::{AuthTicket, EspInfo, HipMessage, HipMessageBuilder, PacketType};
    use pretty_assertions::assert_eq;
    use std::thread;
    use tracing_test::traced_test;

    struct Fixture {
        router: MobileRouter,
        sender: RecordingSender,
        mailbox: Arc<ExternalAddressMailbox>,
    }

    fn fixture(state: MobileRouterState) -> Fixture {
        let params = RouterParamsBuilder::default()
            .external_iface("wlan0")
            .timeout(Duration::from_millis(10))
            .build()
            .expect("Should succeed");
        let sender = RecordingSender::default();
        let mailbox = Arc::new(ExternalAddressMailbox::new());
        let router = MobileRouter::new(
            params,
            state.shared(),
            mailbox.clone(),
            Box::new(sender.clone()),
        )
        .with_signer(Box::new(XorSigner));
        Fixture {
            router,
            sender,
            mailbox,
        }
    }

    fn intercepted(id: u32, indev: Option<&str>, packet: &IpPacket) -> InterceptedPacket {
        InterceptedPacket {
            id,
            indev: indev.map(str::to_string),
            outdev: None,
            data: packet.to_bytes(),
        }
    }

    #[test]
    fn test_i1_creates_entry() {
        let mut f = fixture(router_state("10.0.0.1", "192.168.0.2"));
        let i1 = hip_packet(
            ip("192.168.0.2"),
            ip("198.51.100.7"),
            HipMessageBuilder::new(PacketType::I1, CLIENT, PEER),
        );
        let disposition = f.router.handle_packet(&intercepted(1, Some("eth1"), &i1));
        assert_eq!(disposition.verdict, Verdict::Accept);

        let out = IpPacket::parse(&disposition.data.unwrap()).expect("Should succeed");
        assert_eq!(out.source(), ip("10.0.0.1"));
        assert_eq!(out.destination(), ip("198.51.100.7"));
        assert!(checksum_ok(&out));

        let state = f.router.state().lock();
        let client = state.find_client_by_identity(&CLIENT).unwrap();
        assert_eq!(client.entries().len(), 1);
        assert_eq!(client.entries()[0].peer_hit, PEER);
        assert_eq!(client.entries()[0].peer_addr, Some(ip("198.51.100.7")));
    }

    #[test]
    fn test_i2_gets_public_spi() {
        let mut f = fixture(router_state("10.0.0.1", "192.168.0.2"));
        f.router
            .state()
            .lock()
            .find_client_mut(&CLIENT)
            .unwrap()
            .entry_or_insert(PEER)
            .peer_addr = Some(ip("198.51.100.7"));
        let info = EspInfo {
            keymat_index: 0,
            old_spi: 0,
            new_spi: 0x1000,
        };
        let i2 = hip_packet(
            ip("192.168.0.2"),
            ip("198.51.100.7"),
            HipMessageBuilder::new(PacketType::I2, CLIENT, PEER)
                .encoded(&info.encode(types::ESP_INFO)),
        );
        let disposition = f.router.handle_packet(&intercepted(2, Some("eth1"), &i2));
        let out = IpPacket::parse(&disposition.data.unwrap()).expect("Should succeed");
        assert_eq!(out.len(), i2.len() + 16);
        assert!(checksum_ok(&out));

        let state = f.router.state().lock();
        let entry = state.find_client_by_identity(&CLIENT).unwrap().entries()[0].clone();
        assert_eq!(entry.private_spi, 0x1000);
        assert_ne!(entry.public_spi, 0);
        assert_ne!(entry.public_spi, entry.private_spi);
    }

    #[test]
    fn test_translated_esp_is_dropped_and_sent() {
        let mut state = router_state("2001:db8::1", "192.168.0.2");
        *state
            .find_client_mut(&CLIENT)
            .unwrap()
            .entry_or_insert(PEER) = SpinatEntry {
            private_spi: 0x1000,
            public_spi: 0xabcd_0001,
            peer_spi: 0x2000,
            peer_addr: Some(ip("198.51.100.7")),
            peer_ipv6: Some("2001:db8::7".parse().unwrap()),
            ..SpinatEntry::new(PEER)
        };
        let mut f = fixture(state);
        let esp = esp_packet(ip("2001:db8::7"), ip("2001:db8::1"), 0xabcd_0001);
        let disposition = f.router.handle_packet(&intercepted(3, Some("wlan0"), &esp));
        assert_eq!(
            disposition,
            Disposition {
                verdict: Verdict::Drop,
                data: None
            }
        );
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].family(), Family::Ipv4);
        assert_eq!(sent[0].destination(), ip("192.168.0.2"));
        assert_eq!(spi(sent[0].payload()), Some(0x1000));
    }

    #[test]
    fn test_direction_follows_ingress_device() {
        let mut state = router_state("10.0.0.1", "192.168.0.2");
        *state
            .find_client_mut(&CLIENT)
            .unwrap()
            .entry_or_insert(PEER) = SpinatEntry {
            private_spi: 0x1000,
            public_spi: 0xabcd_0001,
            peer_addr: Some(ip("198.51.100.7")),
            ..SpinatEntry::new(PEER)
        };
        let mut f = fixture(state);
        let esp = esp_packet(ip("198.51.100.7"), ip("10.0.0.1"), 0xabcd_0001);

        /* not from the external interface: treated as outbound, no match */
        let disposition = f.router.handle_packet(&intercepted(4, Some("eth1"), &esp));
        assert_eq!(disposition.data, None);

        let disposition = f.router.handle_packet(&intercepted(5, Some("wlan0"), &esp));
        let out = IpPacket::parse(&disposition.data.unwrap()).expect("Should succeed");
        assert_eq!(out.destination(), ip("192.168.0.2"));
        assert_eq!(spi(out.payload()), Some(0x1000));
    }

    #[test]
    fn test_garbage_is_accepted_unchanged() {
        let mut f = fixture(router_state("10.0.0.1", "192.168.0.2"));
        let packet = InterceptedPacket {
            id: 6,
            indev: None,
            outdev: None,
            data: vec![0x45, 0, 0],
        };
        assert_eq!(f.router.handle_packet(&packet), Disposition::unchanged());
    }

    #[traced_test]
    #[test]
    fn test_address_change_sends_updates() {
        let mut state = router_state("10.0.0.1", "192.168.0.2");
        *state
            .find_client_mut(&CLIENT)
            .unwrap()
            .entry_or_insert(PEER) = SpinatEntry {
            public_spi: 0xabcd_0001,
            peer_addr: Some(ip("198.51.100.7")),
            ticket: Some(ProxyTicket {
                hmac_key: vec![1; 20],
                ticket: AuthTicket {
                    transform_type: 1,
                    ..Default::default()
                },
            }),
            ..SpinatEntry::new(PEER)
        };
        let mut f = fixture(state);

        /* nothing published, nothing sent */
        assert_eq!(f.router.check_address_change(), 0);

        f.mailbox.publish(ip("10.0.0.8"));
        f.mailbox.publish(ip("10.0.0.9"));
        assert_eq!(f.router.check_address_change(), 1);
        {
            let state = f.router.state().lock();
            assert_eq!(state.out_addr(), Some(ip("10.0.0.9")));
            assert_eq!(state.external_interface(), Some("wlan0"));
        }
        let sent = f.sender.sent();
        assert_eq!(sent[0].source(), ip("10.0.0.9"));
        let msg = HipMessage::parse(sent[0].payload()).expect("Should succeed");
        assert_eq!(msg.packet_type(), PacketType::Update);
        assert!(logs_contain("External address is now 10.0.0.9"));

        /* the mailbox is drained */
        assert_eq!(f.router.check_address_change(), 0);
    }

    #[traced_test]
    #[test]
    fn test_no_signer_no_updates() {
        let params = RouterParamsBuilder::default().build().expect("Should succeed");
        let mailbox = Arc::new(ExternalAddressMailbox::new());
        let mut router = MobileRouter::new(
            params,
            router_state("10.0.0.1", "192.168.0.2").shared(),
            mailbox.clone(),
            Box::new(RecordingSender::default()),
        );
        mailbox.publish(ip("10.0.0.9"));
        assert_eq!(router.check_address_change(), 0);
        assert_eq!(router.state().lock().out_addr(), Some(ip("10.0.0.9")));
        assert!(logs_contain("No HMAC signer"));
    }

    #[test]
    fn test_run_loop() {
        let Fixture {
            mut router,
            mailbox,
            ..
        } = fixture(router_state("10.0.0.1", "192.168.0.2"));
        let (mut feed, handle) = ChannelFeed::new();
        let run = Arc::new(AtomicBool::new(true));
        let state = router.state().clone();

        let running = run.clone();
        let worker = thread::spawn(move || router.run(&mut feed, &running));

        let i1 = hip_packet(
            ip("192.168.0.2"),
            ip("198.51.100.7"),
            HipMessageBuilder::new(PacketType::I1, CLIENT, PEER),
        );
        handle
            .messages
            .send(FeedMessage::Packet(intercepted(7, Some("eth1"), &i1)))
            .expect("Should succeed");
        let record = handle
            .verdicts
            .recv_timeout(Duration::from_secs(5))
            .expect("Should succeed");
        assert_eq!(record.id, 7);
        assert_eq!(record.verdict, Verdict::Accept);

        /* picked up on a timeout */
        mailbox.publish(ip("10.0.0.9"));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while state.lock().out_addr() != Some(ip("10.0.0.9")) {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }

        run.store(false, Ordering::Relaxed);
        assert_eq!(worker.join().unwrap(), Ok(()));
    }

    fn ticket() -> ProxyTicket {
        ProxyTicket {
            hmac_key: vec![1; 20],
            ticket: AuthTicket {
                transform_type: 1,
                ..Default::default()
            },
        }
    }

    #[traced_test]
    #[test]
    fn test_control_messages() {
        let f = fixture(MobileRouterState::default());
        let other = Hit::new([9; 16]);
        f.router
            .handle_control(ControlMessage::Register {
                hit: CLIENT,
                addr: ip("192.168.0.2"),
            })
            .expect("Should succeed");
        {
            let state = f.router.state().lock();
            let client = state.find_client_by_identity(&CLIENT).unwrap();
            assert_eq!(client.state, ClientState::ResponseSent);
            assert_eq!(client.addr, ip("192.168.0.2"));
        }

        /* a ticket needs an entry for the peer */
        let control = ControlMessage::Ticket {
            client: CLIENT,
            peer: PEER,
            ticket: ticket(),
        };
        assert_eq!(
            f.router.handle_control(control.clone()),
            Err(SpinatError::NoSuchEntry {
                client: CLIENT,
                peer: PEER
            })
        );
        f.router
            .state()
            .lock()
            .find_client_mut(&CLIENT)
            .unwrap()
            .entry_or_insert(PEER);
        f.router.handle_control(control).expect("Should succeed");
        {
            let state = f.router.state().lock();
            let entry = &state.find_client_by_identity(&CLIENT).unwrap().entries()[0];
            assert_eq!(entry.ticket, Some(ticket()));
        }

        assert_eq!(
            f.router.handle_control(ControlMessage::Deregister { hit: other }),
            Err(SpinatError::NoSuchClient(other))
        );
        f.router
            .handle_control(ControlMessage::Deregister { hit: CLIENT })
            .expect("Should succeed");
        assert!(f.router.state().lock().clients().is_empty());
        assert!(logs_contain("left"));
    }

    #[test]
    fn test_ticket_through_feed_enables_updates() {
        let Fixture {
            mut router,
            sender,
            mailbox,
        } = fixture(MobileRouterState::default());
        let (mut feed, handle) = ChannelFeed::new();
        let run = Arc::new(AtomicBool::new(true));
        let state = router.state().clone();
        let running = run.clone();
        let worker = thread::spawn(move || router.run(&mut feed, &running));

        handle
            .messages
            .send(FeedMessage::Control(ControlMessage::Register {
                hit: CLIENT,
                addr: ip("192.168.0.2"),
            }))
            .expect("Should succeed");
        let i1 = hip_packet(
            ip("192.168.0.2"),
            ip("198.51.100.7"),
            HipMessageBuilder::new(PacketType::I1, CLIENT, PEER),
        );
        handle
            .messages
            .send(FeedMessage::Packet(intercepted(8, Some("eth1"), &i1)))
            .expect("Should succeed");
        handle
            .verdicts
            .recv_timeout(Duration::from_secs(5))
            .expect("Should succeed");
        handle
            .messages
            .send(FeedMessage::Control(ControlMessage::Ticket {
                client: CLIENT,
                peer: PEER,
                ticket: ticket(),
            }))
            .expect("Should succeed");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while state.lock().find_client_by_identity(&CLIENT).unwrap().entries()[0]
            .ticket
            .is_none()
        {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }

        /* the next address change is announced to the peer */
        mailbox.publish(ip("10.0.0.9"));
        while sender.sent().is_empty() {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sender.sent()[0].destination(), ip("198.51.100.7"));

        run.store(false, Ordering::Relaxed);
        assert_eq!(worker.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_run_over_unix_feed() {
        use crate::signer::TransformSigner;
        use crate::unix::{MSG_PACKET, MSG_REGISTER, UnixFeed};
        use std::os::unix::net::UnixDatagram;
        use std::path::Path;

        let feed_path = Path::new("/tmp/hipmr-router-run-feed.sock");
        let adapter_path = Path::new("/tmp/hipmr-router-run-adapter.sock");
        let _ = std::fs::remove_file(adapter_path);
        let mut feed = UnixFeed::bind(feed_path).expect("Should succeed");
        let mailbox = Arc::new(ExternalAddressMailbox::new());
        let mut router = MobileRouter::new(
            RouterParamsBuilder::default()
                .timeout(Duration::from_millis(10))
                .build()
                .expect("Should succeed"),
            MobileRouterState::default().shared(),
            mailbox,
            Box::new(RecordingSender::default()),
        )
        .with_signer(Box::new(TransformSigner));
        let state = router.state().clone();
        let run = Arc::new(AtomicBool::new(true));
        let running = run.clone();
        let worker = thread::spawn(move || router.run(&mut feed, &running));

        let adapter = UnixDatagram::bind(adapter_path).expect("Should succeed");
        adapter
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("Should succeed");
        let mut register = vec![MSG_REGISTER];
        register.extend_from_slice(CLIENT.as_bytes());
        register.extend_from_slice(&[4, 192, 168, 0, 2]);
        adapter.send_to(&register, feed_path).expect("Should succeed");

        let i1 = hip_packet(
            ip("192.168.0.2"),
            ip("198.51.100.7"),
            HipMessageBuilder::new(PacketType::I1, CLIENT, PEER),
        );
        let mut message = vec![MSG_PACKET];
        message.extend_from_slice(&9u32.to_be_bytes());
        message.extend_from_slice(&[4, b'e', b't', b'h', b'1', 0]);
        message.extend_from_slice(&i1.to_bytes());
        adapter.send_to(&message, feed_path).expect("Should succeed");

        /* registered before the I1 came: the entry exists once the verdict is back */
        let mut reply = vec![0u8; 2048];
        let len = adapter.recv(&mut reply).expect("Should succeed");
        assert_eq!(&reply[..5], &[0, 0, 0, 9, 1]);
        assert!(len > 5);
        assert_eq!(
            state
                .lock()
                .find_client_by_identity(&CLIENT)
                .map(|c| c.entries().len()),
            Some(1)
        );

        run.store(false, Ordering::Relaxed);
        assert_eq!(worker.join().unwrap(), Ok(()));
        let _ = std::fs::remove_file(adapter_path);
    }

    #[test]
    fn test_run_ends_when_feed_closes() {
        let Fixture { mut router, .. } = fixture(router_state("10.0.0.1", "192.168.0.2"));
        let (mut feed, handle) = ChannelFeed::new();
        drop(handle);
        let run = Arc::new(AtomicBool::new(true));
        assert!(matches!(
            router.run(&mut feed, &run),
            Err(SpinatError::Feed(_))
        ));
    }
}
