// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! State of the mobility context: the host's addresses, its identities and
//! associations, and the handling of address events.

use net::Family;
use net::hip::Hit;
use std::net::IpAddr;
use std::sync::Arc;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

use crate::address::{AddressList, IfIndex, RemoveBy};
use crate::association::{Association, DataPlane, DelOutcome, ReaddressCtx};
use crate::config::MobilityConfig;
use crate::device::DeviceSource;
use crate::errors::MobilityError;
use crate::events::{AddressEvent, EventKind};
use crate::identity::HostIdentity;
use crate::mailbox::ExternalAddressMailbox;
use crate::nat::{NatDetector, NatStatus};
use crate::selector::{Selection, select_preferred_address};

trace_target!("mobility", LevelFilter::INFO, &["mobility"]);

/// Everything the mobility context owns
pub struct MobilityState {
    config: MobilityConfig,
    devices: Arc<dyn DeviceSource>,
    registry: AddressList,
    identities: Vec<HostIdentity>,
    associations: Vec<Association>,
    dataplane: DataPlane,
    nat_detector: Option<Box<dyn NatDetector>>,
    behind_nat: bool,
    external_ifindex: Option<IfIndex>,
    mailbox: Arc<ExternalAddressMailbox>,
}

impl MobilityState {
    #[must_use]
    pub fn new(
        config: MobilityConfig,
        devices: Arc<dyn DeviceSource>,
        dataplane: DataPlane,
        mailbox: Arc<ExternalAddressMailbox>,
    ) -> Self {
        Self {
            config,
            devices,
            registry: AddressList::new(),
            identities: vec![],
            associations: vec![],
            dataplane,
            nat_detector: None,
            behind_nat: false,
            external_ifindex: None,
            mailbox,
        }
    }

    /// Set the NAT classifier used when detection is enabled
    #[must_use]
    pub fn with_nat_detector(mut self, detector: Box<dyn NatDetector>) -> Self {
        self.nat_detector = Some(detector);
        self
    }

    pub fn add_identity(&mut self, identity: HostIdentity) {
        self.identities.push(identity);
    }

    /// Register an association. Returns its index.
    pub fn add_association(&mut self, assoc: Association) -> usize {
        self.associations.push(assoc);
        self.associations.len() - 1
    }

    #[must_use]
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn association_mut(&mut self, index: usize) -> Option<&mut Association> {
        self.associations.get_mut(index)
    }

    /// The system-wide address registry
    #[must_use]
    pub fn registry(&self) -> &AddressList {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AddressList {
        &mut self.registry
    }

    #[must_use]
    pub fn external_ifindex(&self) -> Option<IfIndex> {
        self.external_ifindex
    }

    #[must_use]
    pub fn behind_nat(&self) -> bool {
        self.behind_nat
    }

    #[must_use]
    pub fn config(&self) -> &MobilityConfig {
        &self.config
    }

    fn nat_status(&self) -> NatStatus {
        NatStatus {
            detection_enabled: self.config.nat_detection,
            behind_nat: self.behind_nat,
        }
    }

    /// Fill the registry with the addresses of every interface, then with the IPv6
    /// addresses of the local identities (on no interface). All are marked active.
    /// Returns the size of the registry.
    ///
    /// # Errors
    ///
    /// Fails if the interfaces cannot be read.
    pub fn get_my_addresses(&mut self) -> Result<usize, MobilityError> {
        let devices = self.devices.interfaces()?;
        for device in &devices {
            for addr in &device.addrs {
                let id = self.registry.add(*addr, device.index);
                self.registry.make_active(id);
            }
        }
        let identity_addrs: Vec<IpAddr> = self
            .identities
            .iter()
            .flat_map(|hi| hi.addrs.iter())
            .filter(|r| r.family() == Family::Ipv6)
            .map(|r| r.addr)
            .collect();
        for addr in identity_addrs {
            let id = self.registry.add(addr, 0);
            self.registry.make_active(id);
        }
        info!("Local addresses:\n{}", self.registry);
        Ok(self.registry.len())
    }

    /// Run preferred address selection over the registry
    pub fn select_preferred_address(&mut self) -> Selection {
        let selection =
            select_preferred_address(&mut self.registry, &self.config, self.devices.as_ref());
        if self.config.mobile_router {
            self.external_ifindex = selection.external_ifindex;
        }
        selection
    }

    fn detect_nat(&mut self) {
        if !self.config.nat_detection {
            return;
        }
        let (Some(detector), Some(server)) = (self.nat_detector.as_mut(), self.config.stun_server)
        else {
            warn!("NAT detection enabled without a detector and server");
            return;
        };
        info!("NAT detection with server {server}");
        match detector.detect(server) {
            Ok(nat) => {
                self.behind_nat = nat.is_behind_nat();
                if self.behind_nat {
                    info!("NAT detected ({nat}), UDP encapsulation activated");
                } else {
                    info!("No NAT detected ({nat})");
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    /// Apply an address or link event to the registry and the established
    /// associations. Returns true when an address was added, in which case the caller
    /// should run [`Self::select_preferred_address`].
    pub fn handle_address_event(&mut self, event: &AddressEvent) -> bool {
        debug!("Handling {event}");
        match event.kind {
            EventKind::LinkUp => false,
            EventKind::LinkDown => {
                let removed = self.registry.remove(RemoveBy::Interface(event.ifindex));
                info!("Link {} down, {removed} addresses removed", event.ifindex);
                false
            }
            EventKind::AddrAdd | EventKind::AddrDel => {
                let Some(addr) = event.addr else {
                    warn!("Address event without address: {event}");
                    return false;
                };
                let is_add = event.kind == EventKind::AddrAdd;
                info!(
                    "Address {}: ({}){addr}",
                    if is_add { "added" } else { "deleted" },
                    event.ifindex
                );
                if is_add {
                    self.detect_nat();
                    let id = self.registry.add(addr, event.ifindex);
                    self.registry.make_active(id);
                } else {
                    self.registry.remove(RemoveBy::Address(addr));
                }
                self.handle_local_address_change(is_add, addr, event.ifindex);
                is_add
            }
        }
    }

    fn handle_local_address_change(&mut self, is_add: bool, addr: IpAddr, ifindex: IfIndex) {
        for index in 0..self.associations.len() {
            if !self.associations[index].is_established() {
                debug!(
                    "Ignoring address change for association {}",
                    self.associations[index]
                );
                continue;
            }
            if is_add {
                self.association_add_address(index, addr, ifindex);
            } else {
                self.association_del_address(index, addr);
            }
        }

        if is_add && self.config.mobile_router && self.external_ifindex == Some(ifindex) {
            debug!("New external address {addr}");
            self.mailbox.publish(addr);
        }
    }

    /// Propagate an added address to one association
    pub fn association_add_address(&mut self, index: usize, addr: IpAddr, ifindex: IfIndex) {
        let nat = self.nat_status();
        let Some(assoc) = self.associations.get_mut(index) else {
            return;
        };
        let mut ctx = ReaddressCtx {
            dataplane: &mut self.dataplane,
            nat,
        };
        assoc.add_address(addr, ifindex, &mut ctx);
    }

    /// Propagate a deleted address to one association, falling back to the system-wide
    /// preferred address when the association has no other address of the same family
    pub fn association_del_address(&mut self, index: usize, addr: IpAddr) -> DelOutcome {
        let nat = self.nat_status();
        let Some(assoc) = self.associations.get_mut(index) else {
            return DelOutcome::NotFound;
        };
        let mut ctx = ReaddressCtx {
            dataplane: &mut self.dataplane,
            nat,
        };
        match assoc.del_address(addr, &mut ctx) {
            DelOutcome::NeedsReselection => {
                let selection = select_preferred_address(
                    &mut self.registry,
                    &self.config,
                    self.devices.as_ref(),
                );
                if self.config.mobile_router {
                    self.external_ifindex = selection.external_ifindex;
                }
                let family = Family::of(&addr);
                let candidate = self
                    .registry
                    .iter()
                    .find(|r| r.family() == family && r.preferred && r.is_active())
                    .map(|r| (r.addr, r.ifindex));
                assoc.complete_reselection(addr, candidate, &mut ctx)
            }
            outcome => outcome,
        }
    }

    /// Replace `old` (if given) by `new` as address of the peer with HIT `peer`
    ///
    /// # Errors
    ///
    /// Fails if no association has that peer.
    pub fn update_peer_address(
        &mut self,
        peer: Hit,
        old: Option<IpAddr>,
        new: IpAddr,
    ) -> Result<(), MobilityError> {
        let mut found = false;
        for assoc in self.associations.iter_mut().filter(|a| a.peer.hit == peer) {
            assoc.update_peer_address(old, new);
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(MobilityError::NoSuchPeer(peer))
        }
    }
}
