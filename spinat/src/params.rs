// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mobile router parameters

use derive_builder::Builder;
use std::fmt::Display;
use std::time::Duration;

use crate::spi::DEFAULT_SPI_RETRY_CAP;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_LOCATOR_LIFETIME: u32 = 3600;

/// Struct to configure the mobile router. N.B we derive a builder type
/// `RouterParamsBuilder` and provide defaults for each field.
#[derive(Builder, Clone, Debug, PartialEq)]
pub struct RouterParams {
    /// Interface facing the peers. If unset, the first one the mobility context reports
    /// is used.
    #[builder(setter(into, strip_option), default)]
    pub external_iface: Option<String>,

    /// How long the dispatch loop waits for a packet before checking for a new
    /// external address
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Random draws before giving up on finding a free public SPI
    #[builder(default = DEFAULT_SPI_RETRY_CAP)]
    pub spi_retry_cap: usize,

    /// Lifetime, in seconds, of the locators in proxy UPDATEs
    #[builder(default = DEFAULT_LOCATOR_LIFETIME)]
    pub locator_lifetime: u32,
}

impl Display for RouterParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        writeln!(f, "Mobile router config")?;
        writeln!(
            f,
            "  external iface  : {}",
            self.external_iface.as_deref().unwrap_or("--")
        )?;
        writeln!(f, "  timeout         : {:?}", self.timeout)?;
        writeln!(f, "  SPI retry cap   : {}", self.spi_retry_cap)?;
        write!(f, "  locator lifetime: {}s", self.locator_lifetime)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_params_defaults() {
        let params = RouterParamsBuilder::default()
            .build()
            .expect("Should succeed");
        assert_eq!(params.external_iface, None);
        assert_eq!(params.timeout, Duration::from_millis(500));
        assert_eq!(params.spi_retry_cap, 64);
        assert_eq!(params.locator_lifetime, 3600);

        let params = RouterParamsBuilder::default()
            .external_iface("wlan0")
            .locator_lifetime(60u32)
            .build()
            .expect("Should succeed");
        assert_eq!(params.external_iface.as_deref(), Some("wlan0"));
        assert!(params.to_string().contains("wlan0"));
    }
}
