// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interface metadata: names, indices, link-layer and IP addresses.

use netdev::get_interfaces;
use std::net::IpAddr;

use crate::address::IfIndex;
use crate::errors::MobilityError;

/// What the mobility code needs to know about a network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: IfIndex,
    pub name: String,
    pub mac: Option<[u8; 6]>,
    pub up: bool,
    pub addrs: Vec<IpAddr>,
}

/// A source of interface metadata
pub trait DeviceSource: Send + Sync {
    /// Read every interface of the host
    ///
    /// # Errors
    ///
    /// Fails if the interfaces cannot be read.
    fn interfaces(&self) -> Result<Vec<DeviceInfo>, MobilityError>;

    /// Resolve an interface name to its index and link-layer address
    ///
    /// # Errors
    ///
    /// Fails if there is no such interface or the interfaces cannot be read.
    fn devname_to_index(&self, name: &str) -> Result<(IfIndex, Option<[u8; 6]>), MobilityError> {
        self.interfaces()?
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| (d.index, d.mac))
            .ok_or_else(|| MobilityError::NoSuchDevice(name.to_string()))
    }

    /// Resolve an interface index to its name
    fn index_to_devname(&self, index: IfIndex) -> Option<String> {
        self.interfaces()
            .ok()?
            .into_iter()
            .find(|d| d.index == index)
            .map(|d| d.name)
    }
}

/// Interface metadata read from the kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct NetdevSource;

impl DeviceSource for NetdevSource {
    fn interfaces(&self) -> Result<Vec<DeviceInfo>, MobilityError> {
        let devices = get_interfaces()
            .into_iter()
            .map(|iface| DeviceInfo {
                index: iface.index,
                up: iface.is_up(),
                mac: iface.mac_addr.map(|mac| mac.octets()),
                addrs: iface
                    .ipv4
                    .iter()
                    .map(|net| IpAddr::V4(net.addr()))
                    .chain(iface.ipv6.iter().map(|net| IpAddr::V6(net.addr())))
                    .collect(),
                name: iface.name,
            })
            .collect();
        Ok(devices)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// A device source whose interfaces the test controls
    #[derive(Debug, Default)]
    pub(crate) struct FakeDevices {
        devices: Mutex<Vec<DeviceInfo>>,
    }

    impl FakeDevices {
        pub(crate) fn new(devices: Vec<DeviceInfo>) -> Self {
            Self {
                devices: Mutex::new(devices),
            }
        }
        pub(crate) fn set(&self, devices: Vec<DeviceInfo>) {
            *self.devices.lock() = devices;
        }
    }

    impl DeviceSource for FakeDevices {
        fn interfaces(&self) -> Result<Vec<DeviceInfo>, MobilityError> {
            Ok(self.devices.lock().clone())
        }
    }

    pub(crate) fn device(index: IfIndex, name: &str, addrs: &[&str]) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.to_string(),
            mac: Some([0x02, 0, 0, 0, 0, u8::try_from(index).unwrap_or(0)]),
            up: true,
            addrs: addrs
                .iter()
                .map(|a| a.parse().expect("Should succeed"))
                .collect(),
        }
    }
}
