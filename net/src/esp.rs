// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ESP header access. Only the SPI is of interest: everything after it is opaque.

use rand::Rng;

/// SPI values up to this one are reserved and never allocated
pub const SPI_RESERVED: u32 = 255;

/// Read the SPI of an ESP payload
#[must_use]
pub fn spi(esp: &[u8]) -> Option<u32> {
    let bytes = esp.get(..4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Overwrite the SPI of an ESP payload. Returns false if the payload is too short.
#[must_use]
pub fn set_spi(esp: &mut [u8], spi: u32) -> bool {
    match esp.get_mut(..4) {
        Some(bytes) => {
            bytes.copy_from_slice(&spi.to_be_bytes());
            true
        }
        None => false,
    }
}

/// Draw a random SPI outside of the reserved range
#[must_use]
pub fn random_spi() -> u32 {
    rand::rng().random_range(SPI_RESERVED + 1..=u32::MAX)
}
