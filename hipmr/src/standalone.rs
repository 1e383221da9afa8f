// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Readdressing collaborators of a daemon running without a keying daemon next to it:
//! SA changes and UPDATEs are reported in the log, not carried out.

use mobility::{Association, MobilityError, SaController, SaDirection, UpdateSender};
use std::net::IpAddr;
use tracing::info;

/// Reports SA rebuilds
#[derive(Debug, Default)]
pub struct LoggedSa;

impl SaController for LoggedSa {
    fn rebuild(
        &mut self,
        assoc: &Association,
        new_addr: IpAddr,
        direction: SaDirection,
    ) -> Result<(), MobilityError> {
        info!("{direction:?} SA of {assoc} now on {new_addr}");
        Ok(())
    }

    fn readdress(
        &mut self,
        assoc: &Association,
        old: IpAddr,
        new: IpAddr,
    ) -> Result<(), MobilityError> {
        info!("SA of {assoc} moved from {old} to {new}");
        Ok(())
    }
}

/// Reports UPDATEs
#[derive(Debug, Default)]
pub struct LoggedUpdates;

impl UpdateSender for LoggedUpdates {
    fn send_update(
        &mut self,
        assoc: &Association,
        new_addr: IpAddr,
        behind_nat: bool,
    ) -> Result<(), MobilityError> {
        info!(
            "UPDATE for {assoc} to {new_addr}{}",
            if behind_nat { " over UDP" } else { "" }
        );
        Ok(())
    }
}
