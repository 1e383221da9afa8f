// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Preferred address selection

use net::addr::{is_autoconf, is_lsi};
use std::net::IpAddr;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};

use crate::address::{AddressList, AddressRecord, AddressStatus, IfIndex};
use crate::config::MobilityConfig;
use crate::device::DeviceSource;

trace_target!("mobility-select", LevelFilter::INFO, &["mobility"]);

/// Outcome of a selection pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// The address marked preferred, if any qualified
    pub preferred: Option<IpAddr>,
    /// External interface of the mobile router, when running as one and it resolved
    pub external_ifindex: Option<IfIndex>,
}

fn resolve(devices: &dyn DeviceSource, name: Option<&str>) -> Option<IfIndex> {
    let name = name?;
    match devices.devname_to_index(name) {
        Ok((index, _)) => Some(index),
        Err(e) => {
            warn!("Cannot resolve interface: {e}");
            None
        }
    }
}

/// IPv4, not loopback and not a local-scope identifier
fn usable_ipv4(r: &AddressRecord) -> bool {
    matches!(r.addr, IpAddr::V4(a) if !a.is_loopback()) && !is_lsi(&r.addr)
}

fn pick<'a>(
    list: &'a AddressList,
    config: &MobilityConfig,
    pref_ifindex: Option<IfIndex>,
) -> Option<(&'a AddressRecord, &'static str)> {
    let live = || list.iter().filter(|r| r.status != AddressStatus::Deleted);

    if let Some(wanted) = config.preferred_address
        && let Some(r) = live().find(|r| r.addr == wanted)
    {
        return Some((r, "conf"));
    }
    if let Some(ifindex) = pref_ifindex
        && let Some(r) = live().find(|r| r.ifindex == ifindex && usable_ipv4(r))
    {
        return Some((r, "conf iface"));
    }
    list.iter()
        .find(|r| r.is_active() && usable_ipv4(r) && !is_autoconf(&r.addr))
        .map(|r| (r, "first in list"))
}

/// Choose the preferred address of `list`: the configured address if present, else the
/// first IPv4 address of the configured interface, else the first usable active IPv4
/// address. Loopback, local-scope identifiers and auto-configuration addresses are never
/// picked by the last two rules. Finding nothing is not an error; the list is left with
/// no preferred address.
///
/// When running as mobile router, also resolves the external interface: the configured
/// outbound interface, else the preferred interface.
pub fn select_preferred_address(
    list: &mut AddressList,
    config: &MobilityConfig,
    devices: &dyn DeviceSource,
) -> Selection {
    let pref_ifindex = resolve(devices, config.preferred_iface.as_deref());

    list.clear_preferred();
    let picked = pick(list, config, pref_ifindex).map(|(r, why)| (r.id(), r.addr, why));
    let preferred = match picked {
        Some((id, addr, why)) => {
            list.mark_preferred(id);
            info!("{addr} selected as the preferred address ({why})");
            Some(addr)
        }
        None => {
            warn!("No preferred address could be selected");
            None
        }
    };

    let mut external_ifindex = None;
    if config.mobile_router {
        external_ifindex = resolve(devices, config.outbound_iface.as_deref());
        match (external_ifindex, pref_ifindex) {
            (Some(_), _) => {
                info!(
                    "Selected {} as outbound interface",
                    config.outbound_iface.as_deref().unwrap_or_default()
                );
            }
            (None, Some(ifindex)) => {
                info!("Selected the preferred interface as outbound interface");
                external_ifindex = Some(ifindex);
            }
            (None, None) => {
                error!("Started as mobile router but unable to set outbound interface index");
            }
        }
    }

    Selection {
        preferred,
        external_ifindex,
    }
}
