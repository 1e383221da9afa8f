// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mobility configuration

use derive_builder::Builder;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Address selection and mobility settings. Built with [`MobilityConfigBuilder`];
/// every field has a default.
#[derive(Builder, Clone, Debug, PartialEq)]
pub struct MobilityConfig {
    /// Address to prefer over any other when present
    #[builder(setter(into, strip_option), default)]
    pub preferred_address: Option<IpAddr>,

    /// Interface whose IPv4 address is preferred
    #[builder(setter(into, strip_option), default)]
    pub preferred_iface: Option<String>,

    /// Outbound interface of the mobile router
    #[builder(setter(into, strip_option), default)]
    pub outbound_iface: Option<String>,

    /// Run as mobile router
    #[builder(default)]
    pub mobile_router: bool,

    /// Classify the NAT in front of us whenever an address is added
    #[builder(default)]
    pub nat_detection: bool,

    /// Server used for NAT classification
    #[builder(setter(into, strip_option), default)]
    pub stun_server: Option<SocketAddr>,

    /// Period of the interface rescans that produce address events
    #[builder(default = DEFAULT_POLL_PERIOD)]
    pub poll_period: Duration,
}

impl Default for MobilityConfig {
    fn default() -> Self {
        Self {
            preferred_address: None,
            preferred_iface: None,
            outbound_iface: None,
            mobile_router: false,
            nat_detection: false,
            stun_server: None,
            poll_period: DEFAULT_POLL_PERIOD,
        }
    }
}

fn show<T: Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "--".to_string(), ToString::to_string)
}

impl Display for MobilityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        writeln!(f, "Mobility config")?;
        writeln!(f, "  preferred address : {}", show(self.preferred_address.as_ref()))?;
        writeln!(f, "  preferred iface   : {}", show(self.preferred_iface.as_ref()))?;
        writeln!(f, "  outbound iface    : {}", show(self.outbound_iface.as_ref()))?;
        writeln!(f, "  mobile router     : {}", self.mobile_router)?;
        writeln!(f, "  NAT detection     : {}", self.nat_detection)?;
        writeln!(f, "  STUN server       : {}", show(self.stun_server.as_ref()))?;
        write!(f, "  poll period       : {:?}", self.poll_period)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = MobilityConfigBuilder::default()
            .build()
            .expect("Should succeed");
        assert_eq!(config, MobilityConfig::default());

        let config = MobilityConfigBuilder::default()
            .preferred_iface("eth1")
            .mobile_router(true)
            .build()
            .expect("Should succeed");
        assert_eq!(config.preferred_iface.as_deref(), Some("eth1"));
        assert!(config.mobile_router);
        assert_eq!(config.poll_period, DEFAULT_POLL_PERIOD);
    }
}
