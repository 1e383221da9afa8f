// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Associations and their readdressing.
//!
//! When the address an association uses locally goes away, the association moves to
//! another one: the data-plane SA is rebuilt on the new address, the identity's current
//! record is rewritten, a rekey is armed and the peer is told with an UPDATE.

use net::Family;
use net::esp::random_spi;
use std::fmt::Display;
use std::net::IpAddr;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

use crate::address::{AddressStatus, IfIndex, RemoveBy};
use crate::errors::MobilityError;
use crate::identity::HostIdentity;
use crate::nat::{HIP_ESP_UDP_PORT, HIP_UDP_PORT, NatStatus};

trace_target!("mobility-readdress", LevelFilter::INFO, &["mobility"]);

/// Protocol state of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocState {
    Unassociated,
    I1Sent,
    I2Sent,
    R2Sent,
    Established,
    Closing,
    Closed,
}

/// Direction of a data-plane SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaDirection {
    Inbound,
    Outbound,
}

/// Rekey material announced with the next UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rekey {
    pub keymat_index: u16,
    pub new_spi: u32,
}

/// Installs and moves the data-plane SAs of associations
pub trait SaController: Send {
    /// Rebuild one direction of the SA of `assoc` on `new_addr`
    ///
    /// # Errors
    ///
    /// Fails if the data plane rejects the change.
    fn rebuild(
        &mut self,
        assoc: &Association,
        new_addr: IpAddr,
        direction: SaDirection,
    ) -> Result<(), MobilityError>;

    /// Re-bind the SA of `assoc` from `old` to `new`
    ///
    /// # Errors
    ///
    /// Fails if the data plane rejects the change.
    fn readdress(&mut self, assoc: &Association, old: IpAddr, new: IpAddr)
    -> Result<(), MobilityError>;
}

/// Sends UPDATE messages announcing a new address to the peer of an association
pub trait UpdateSender: Send {
    /// # Errors
    ///
    /// Fails if the message could not be sent.
    fn send_update(
        &mut self,
        assoc: &Association,
        new_addr: IpAddr,
        behind_nat: bool,
    ) -> Result<(), MobilityError>;
}

/// The collaborators readdressing drives
pub struct DataPlane {
    pub sa: Box<dyn SaController>,
    pub updates: Box<dyn UpdateSender>,
}

/// What readdressing needs besides the association itself
pub struct ReaddressCtx<'a> {
    pub dataplane: &'a mut DataPlane,
    pub nat: NatStatus,
}

/// Result of removing an address from an association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelOutcome {
    /// The association does not use the address
    NotFound,
    /// The address was not the current one; it is only marked deleted
    NotCurrent,
    /// The association moved to this address
    Readdressed(IpAddr),
    /// No address of the same family left in the association; the caller should
    /// reselect a system-wide preferred address and call
    /// [`Association::complete_reselection`]
    NeedsReselection,
    /// No replacement available; the association waits for a later event
    Stranded,
}

/// A HIP association between a local and a peer identity
#[derive(Debug, Clone)]
pub struct Association {
    pub state: AssocState,
    pub local: HostIdentity,
    pub peer: HostIdentity,
    pub spi_in: u32,
    pub spi_out: u32,
    pub keymat_index: u16,
    pub rekey: Option<Rekey>,
    pub use_udp: bool,
    pub next_use_udp: bool,
    pub peer_dst_port: u16,
    pub peer_esp_dst_port: u16,
}

impl Association {
    #[must_use]
    pub fn new(local: HostIdentity, peer: HostIdentity) -> Self {
        Self {
            state: AssocState::Unassociated,
            local,
            peer,
            spi_in: 0,
            spi_out: 0,
            keymat_index: 0,
            rekey: None,
            use_udp: false,
            next_use_udp: false,
            peer_dst_port: 0,
            peer_esp_dst_port: 0,
        }
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        self.state == AssocState::Established
    }

    /// Local address in use
    #[must_use]
    pub fn src(&self) -> Option<IpAddr> {
        self.local.address()
    }

    /// Peer address in use
    #[must_use]
    pub fn dst(&self) -> Option<IpAddr> {
        self.peer.address()
    }

    /// Move the association to `new_addr`. Only established associations move; for the
    /// others this logs and returns false. Data-plane and send failures are logged: the
    /// local state is updated regardless.
    pub fn readdress(&mut self, new_addr: IpAddr, ifindex: IfIndex, ctx: &mut ReaddressCtx) -> bool {
        let old = self.src();
        info!(
            "Readdressing association with {} ({}) from {} to {new_addr}",
            self.peer.name,
            self.dst().map_or_else(|| "?".to_string(), |a| a.to_string()),
            old.map_or_else(|| "?".to_string(), |a| a.to_string()),
        );
        if !self.is_established() {
            info!("Not readdressing association in state {:?}", self.state);
            return false;
        }

        let sa = &mut ctx.dataplane.sa;
        for direction in [SaDirection::Outbound, SaDirection::Inbound] {
            if let Err(e) = sa.rebuild(self, new_addr, direction) {
                warn!("Failed to rebuild {direction:?} SA: {e}");
            }
        }
        if let Some(old) = old
            && let Err(e) = sa.readdress(self, old, new_addr)
        {
            warn!("Failed to readdress SA: {e}");
        }

        self.local.addrs.replace_current(new_addr, ifindex);

        if self.rekey.is_none() {
            let rekey = Rekey {
                keymat_index: self.keymat_index,
                new_spi: random_spi(),
            };
            debug!("Built rekey with new SPI {:#x}", rekey.new_spi);
            self.rekey = Some(rekey);
        }

        let behind_nat = ctx.nat.behind_nat;
        if ctx.nat.detection_enabled {
            self.next_use_udp = behind_nat;
        }
        if behind_nat {
            self.peer_dst_port = HIP_UDP_PORT;
            self.peer_esp_dst_port = HIP_ESP_UDP_PORT;
        }

        if let Err(e) = ctx.dataplane.updates.send_update(self, new_addr, behind_nat) {
            warn!("Problem sending UPDATE for {new_addr}: {e}");
        }
        true
    }

    /// An address was added on interface `ifindex`. If the current local address was
    /// deleted, move to the new one (or revive the current one if it is the same
    /// address). Otherwise just add it to the local list.
    pub fn add_address(&mut self, addr: IpAddr, ifindex: IfIndex, ctx: &mut ReaddressCtx) {
        let list = &mut self.local.addrs;
        match list.current().map(|r| (r.id(), r.addr, r.status)) {
            Some((id, current, AddressStatus::Deleted)) if current == addr => {
                debug!("Address {addr} is back");
                list.make_active(id);
            }
            Some((_, _, AddressStatus::Deleted)) => {
                self.readdress(addr, ifindex, ctx);
            }
            _ => {
                let id = list.add(addr, ifindex);
                list.make_active(id);
            }
        }
    }

    /// An address was deleted. The record is marked deleted; if it was the current
    /// one, the association moves to another local address of the same family.
    pub fn del_address(&mut self, addr: IpAddr, ctx: &mut ReaddressCtx) -> DelOutcome {
        let list = &mut self.local.addrs;
        let Some(deleted) = list.find_record(&addr).map(|r| r.id()) else {
            return DelOutcome::NotFound;
        };
        if let Some(record) = list.get_mut(deleted) {
            record.status = AddressStatus::Deleted;
        }
        if list.current_id() != Some(deleted) {
            return DelOutcome::NotCurrent;
        }

        let family = Family::of(&addr);
        let alternate = list
            .iter()
            .find(|r| r.id() != deleted && r.family() == family && r.status != AddressStatus::Deleted)
            .map(|r| (r.id(), r.addr, r.ifindex));
        let Some((alt_id, alt_addr, alt_ifindex)) = alternate else {
            info!("Selecting a new preferred address since none available in association");
            return DelOutcome::NeedsReselection;
        };
        if !self.readdress(alt_addr, alt_ifindex, ctx) {
            return DelOutcome::Stranded;
        }
        /* the current record now holds the alternate address */
        if let Err(e) = self.local.addrs.remove_entry(alt_id) {
            warn!("Failed to remove duplicate record of {alt_addr}: {e}");
        }
        DelOutcome::Readdressed(alt_addr)
    }

    /// Finish [`DelOutcome::NeedsReselection`] with the system-wide preferred address of
    /// the deleted address's family, if reselection found one.
    pub fn complete_reselection(
        &mut self,
        deleted: IpAddr,
        candidate: Option<(IpAddr, IfIndex)>,
        ctx: &mut ReaddressCtx,
    ) -> DelOutcome {
        match candidate {
            Some((addr, ifindex)) if addr != deleted => {
                if !self.readdress(addr, ifindex, ctx) {
                    return DelOutcome::Stranded;
                }
                let current = self.local.addrs.current_id();
                let stale: Vec<_> = self
                    .local
                    .addrs
                    .iter()
                    .filter(|r| r.addr == addr && Some(r.id()) != current)
                    .map(|r| r.id())
                    .collect();
                for id in stale {
                    if let Err(e) = self.local.addrs.remove_entry(id) {
                        warn!("Failed to remove stale record of {addr}: {e}");
                    }
                }
                DelOutcome::Readdressed(addr)
            }
            _ => {
                warn!("Preferred address deleted, but could not find a suitable replacement");
                DelOutcome::Stranded
            }
        }
    }

    /// Replace `old` (if given) by `new` in the peer address list
    pub fn update_peer_address(&mut self, old: Option<IpAddr>, new: IpAddr) {
        if let Some(old) = old {
            self.peer.addrs.remove(RemoveBy::Address(old));
        }
        self.peer.addrs.add(new, 0);
    }
}

impl Display for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |a: Option<IpAddr>| a.map_or_else(|| "--".to_string(), |a| a.to_string());
        write!(
            f,
            "{} -> {} [{:?}] {} -> {} spi in {:#x} out {:#x}",
            self.local.hit,
            self.peer.hit,
            self.state,
            show(self.src()),
            show(self.dst()),
            self.spi_in,
            self.spi_out
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// What the fake collaborators were asked to do
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Rebuild(IpAddr, SaDirection),
        Readdress(IpAddr, IpAddr),
        Update(IpAddr, bool),
    }

    #[derive(Debug, Default, Clone)]
    pub(crate) struct Recorder(pub(crate) Arc<Mutex<Vec<Call>>>);

    impl Recorder {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.0.lock().clone()
        }
        pub(crate) fn dataplane(&self, fail_updates: bool) -> DataPlane {
            DataPlane {
                sa: Box::new(FakeSa(self.clone())),
                updates: Box::new(FakeSender(self.clone(), fail_updates)),
            }
        }
    }

    struct FakeSa(Recorder);
    struct FakeSender(Recorder, bool);

    impl SaController for FakeSa {
        fn rebuild(
            &mut self,
            _assoc: &Association,
            new_addr: IpAddr,
            direction: SaDirection,
        ) -> Result<(), MobilityError> {
            self.0.0.lock().push(Call::Rebuild(new_addr, direction));
            Ok(())
        }
        fn readdress(
            &mut self,
            _assoc: &Association,
            old: IpAddr,
            new: IpAddr,
        ) -> Result<(), MobilityError> {
            self.0.0.lock().push(Call::Readdress(old, new));
            Ok(())
        }
    }

    impl UpdateSender for FakeSender {
        fn send_update(
            &mut self,
            _assoc: &Association,
            new_addr: IpAddr,
            behind_nat: bool,
        ) -> Result<(), MobilityError> {
            self.0.0.lock().push(Call::Update(new_addr, behind_nat));
            if self.1 {
                return Err(MobilityError::SendFailure(new_addr, "unreachable".to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::fake::{Call, Recorder};
    use super::*;
    use net::hip::Hit;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn ip(s: &str) -> IpAddr {
        s.parse().expect("Should succeed")
    }

    fn established(local: &[(&str, IfIndex)]) -> Association {
        let mut me = HostIdentity::new(Hit::from(ip6("2001:10::1")), "me");
        for (addr, ifindex) in local {
            me = me.with_address(ip(addr), *ifindex);
        }
        let peer = HostIdentity::new(Hit::from(ip6("2001:10::2")), "peer")
            .with_address(ip("192.0.2.1"), 0);
        let mut assoc = Association::new(me, peer);
        assoc.state = AssocState::Established;
        assoc
    }

    fn ip6(s: &str) -> std::net::Ipv6Addr {
        s.parse().expect("Should succeed")
    }

    #[test]
    fn test_readdress_updates_everything() {
        let recorder = Recorder::default();
        let mut dataplane = recorder.dataplane(false);
        let mut ctx = ReaddressCtx {
            dataplane: &mut dataplane,
            nat: NatStatus {
                detection_enabled: true,
                behind_nat: true,
            },
        };
        let mut assoc = established(&[("10.0.0.5", 2)]);
        assert!(assoc.readdress(ip("10.0.1.9"), 4, &mut ctx));

        assert_eq!(
            recorder.calls(),
            vec![
                Call::Rebuild(ip("10.0.1.9"), SaDirection::Outbound),
                Call::Rebuild(ip("10.0.1.9"), SaDirection::Inbound),
                Call::Readdress(ip("10.0.0.5"), ip("10.0.1.9")),
                Call::Update(ip("10.0.1.9"), true),
            ]
        );
        let current = assoc.local.addrs.current().expect("Should succeed");
        assert_eq!((current.addr, current.ifindex), (ip("10.0.1.9"), 4));
        assert!(current.preferred && current.is_active());
        assert!(assoc.rekey.is_some_and(|r| r.new_spi > net::esp::SPI_RESERVED));
        assert!(assoc.next_use_udp);
        assert_eq!(assoc.peer_dst_port, HIP_UDP_PORT);
        assert_eq!(assoc.peer_esp_dst_port, HIP_ESP_UDP_PORT);
    }

    #[test]
    #[traced_test]
    fn test_readdress_requires_established() {
        let recorder = Recorder::default();
        let mut dataplane = recorder.dataplane(false);
        let mut ctx = ReaddressCtx {
            dataplane: &mut dataplane,
            nat: NatStatus::default(),
        };
        let mut assoc = established(&[("10.0.0.5", 2)]);
        assoc.state = AssocState::I2Sent;
        assert!(!assoc.readdress(ip("10.0.1.9"), 4, &mut ctx));
        assert!(recorder.calls().is_empty());
        assert_eq!(assoc.src(), Some(ip("10.0.0.5")));
        assert!(logs_contain("Not readdressing association"));
    }

    #[test]
    #[traced_test]
    fn test_send_failure_is_not_fatal() {
        let recorder = Recorder::default();
        let mut dataplane = recorder.dataplane(true);
        let mut ctx = ReaddressCtx {
            dataplane: &mut dataplane,
            nat: NatStatus::default(),
        };
        let mut assoc = established(&[("10.0.0.5", 2)]);
        assoc.rekey = Some(Rekey {
            keymat_index: 3,
            new_spi: 0x1234,
        });
        assert!(assoc.readdress(ip("10.0.1.9"), 4, &mut ctx));
        assert_eq!(assoc.src(), Some(ip("10.0.1.9")));
        /* a pending rekey is kept */
        assert_eq!(assoc.rekey.map(|r| r.new_spi), Some(0x1234));
        assert!(logs_contain("Problem sending UPDATE"));
    }

    #[test]
    fn test_add_address() {
        let recorder = Recorder::default();
        let mut dataplane = recorder.dataplane(false);
        let mut ctx = ReaddressCtx {
            dataplane: &mut dataplane,
            nat: NatStatus::default(),
        };
        let mut assoc = established(&[("10.0.0.5", 2)]);

        /* current address alive: just appended */
        assoc.add_address(ip("10.0.0.6"), 2, &mut ctx);
        assert_eq!(assoc.local.addrs.len(), 2);
        assert!(recorder.calls().is_empty());

        /* current address deleted then back: revived without readdress */
        let id = assoc.local.addrs.current_id().expect("Should succeed");
        assoc.local.addrs.get_mut(id).expect("Should succeed").status = AddressStatus::Deleted;
        assoc.add_address(ip("10.0.0.5"), 2, &mut ctx);
        assert!(assoc.local.addrs.current().is_some_and(|r| r.is_active()));
        assert!(recorder.calls().is_empty());

        /* current address deleted and another shows up: readdress */
        assoc.local.addrs.get_mut(id).expect("Should succeed").status = AddressStatus::Deleted;
        assoc.add_address(ip("172.16.0.1"), 5, &mut ctx);
        assert_eq!(assoc.src(), Some(ip("172.16.0.1")));
        assert!(recorder.calls().contains(&Call::Update(ip("172.16.0.1"), false)));
    }

    #[test]
    fn test_del_address_uses_local_alternate() {
        let recorder = Recorder::default();
        let mut dataplane = recorder.dataplane(false);
        let mut ctx = ReaddressCtx {
            dataplane: &mut dataplane,
            nat: NatStatus::default(),
        };
        let mut assoc = established(&[("10.0.0.5", 2), ("2001:db8::5", 2), ("10.0.0.6", 3)]);

        assert_eq!(
            assoc.del_address(ip("2001:db8::5"), &mut ctx),
            DelOutcome::NotCurrent
        );
        assert_eq!(
            assoc.del_address(ip("10.0.0.5"), &mut ctx),
            DelOutcome::Readdressed(ip("10.0.0.6"))
        );
        let addrs: Vec<_> = assoc.local.addrs.iter().map(|r| r.addr).collect();
        assert_eq!(addrs, vec![ip("10.0.0.6"), ip("2001:db8::5")]);
        assert_eq!(assoc.local.addrs.iter().filter(|r| r.preferred).count(), 1);
        assert_eq!(assoc.del_address(ip("10.9.9.9"), &mut ctx), DelOutcome::NotFound);
    }

    #[test]
    fn test_del_address_without_alternate() {
        let recorder = Recorder::default();
        let mut dataplane = recorder.dataplane(false);
        let mut ctx = ReaddressCtx {
            dataplane: &mut dataplane,
            nat: NatStatus::default(),
        };
        let mut assoc = established(&[("10.0.0.5", 2), ("2001:db8::5", 2)]);
        assert_eq!(
            assoc.del_address(ip("10.0.0.5"), &mut ctx),
            DelOutcome::NeedsReselection
        );
        /* the deleted record stays current until something replaces it */
        let current = assoc.local.addrs.current().expect("Should succeed");
        assert_eq!(current.status, AddressStatus::Deleted);

        assert_eq!(
            assoc.complete_reselection(ip("10.0.0.5"), Some((ip("10.0.0.5"), 2)), &mut ctx),
            DelOutcome::Stranded
        );
        assert_eq!(
            assoc.complete_reselection(ip("10.0.0.5"), Some((ip("10.7.0.1"), 6)), &mut ctx),
            DelOutcome::Readdressed(ip("10.7.0.1"))
        );
        assert_eq!(assoc.src(), Some(ip("10.7.0.1")));
        assert!(assoc.local.addrs.find(&ip("10.0.0.5")).is_none());
    }

    #[test]
    #[traced_test]
    fn test_reselection_drops_stale_duplicates() {
        let recorder = Recorder::default();
        let mut dataplane = recorder.dataplane(false);
        let mut ctx = ReaddressCtx {
            dataplane: &mut dataplane,
            nat: NatStatus::default(),
        };
        let mut assoc = established(&[("10.0.0.5", 2), ("10.7.0.1", 6)]);
        /* a deleted record of the address reselection comes back with */
        let stale = assoc
            .local
            .addrs
            .iter()
            .find(|r| r.addr == ip("10.7.0.1"))
            .map(|r| r.id())
            .expect("Should be found");
        assoc.local.addrs.get_mut(stale).expect("Should succeed").status = AddressStatus::Deleted;

        assert_eq!(
            assoc.del_address(ip("10.0.0.5"), &mut ctx),
            DelOutcome::NeedsReselection
        );
        assert_eq!(
            assoc.complete_reselection(ip("10.0.0.5"), Some((ip("10.7.0.1"), 6)), &mut ctx),
            DelOutcome::Readdressed(ip("10.7.0.1"))
        );
        let addrs: Vec<_> = assoc.local.addrs.iter().map(|r| r.addr).collect();
        assert_eq!(addrs, vec![ip("10.7.0.1")]);
        assert!(assoc.local.addrs.get(stale).is_none());
        assert!(!logs_contain("Failed to remove stale record"));
    }

    #[test]
    fn test_update_peer_address() {
        let mut assoc = established(&[("10.0.0.5", 2)]);
        assoc.update_peer_address(Some(ip("192.0.2.1")), ip("198.51.100.7"));
        assert_eq!(assoc.dst(), Some(ip("198.51.100.7")));
        assert_eq!(assoc.peer.addrs.len(), 1);
        assoc.update_peer_address(None, ip("2001:db8::7"));
        assert_eq!(assoc.peer.addrs.len(), 2);
    }
}
