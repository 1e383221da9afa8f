// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Traits for checksum calculation and manipulation, and the HIP checksum.

use crate::packet::IPPROTO_HIP;
use etherparse::checksum::Sum16BitWords;
use std::fmt::{Debug, Display, Formatter};
use std::net::IpAddr;

/// A trait for checksum calculation and manipulation.
pub trait Checksum {
    /// The data, external to the checksummed object, that the checksum covers.
    type Payload<'a>: ?Sized
    where
        Self: 'a;
    /// The checksum type.
    type Checksum: Eq + Copy + Sized + Debug;

    /// Get the checksum value currently stored
    fn checksum(&self) -> Self::Checksum;

    /// Compute the checksum value from the object and payload
    fn compute_checksum(&self, payload: &Self::Payload<'_>) -> Self::Checksum;

    /// Store a checksum value. The value is not validated.
    fn set_checksum(&mut self, checksum: Self::Checksum) -> &mut Self;

    /// Validate the stored checksum.
    ///
    /// # Errors
    ///
    /// Returns a [`ChecksumError`] if the checksum is invalid.
    fn validate_checksum(
        &self,
        payload: &Self::Payload<'_>,
    ) -> Result<Self::Checksum, ChecksumError<Self>> {
        let expected = self.compute_checksum(payload);
        let actual = self.checksum();
        if expected == actual {
            Ok(expected)
        } else {
            Err(ChecksumError { expected, actual })
        }
    }

    /// Recompute and store the checksum. Afterwards `validate_checksum` succeeds for the same
    /// `payload`.
    fn update_checksum(&mut self, payload: &Self::Payload<'_>) -> &mut Self {
        self.set_checksum(self.compute_checksum(payload))
    }
}

/// An error resulting from a checksum mismatch.
#[derive(Debug, thiserror::Error)]
#[error("checksum mismatch: expected {expected:?}, actual {actual:?}")]
pub struct ChecksumError<T: Checksum + ?Sized> {
    /// The checksum computed over the data
    pub expected: T::Checksum,
    /// The checksum found in the data
    pub actual: T::Checksum,
}

/// A HIP header checksum, as it reads in network byte order
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct HipChecksum(u16);

impl HipChecksum {
    /// Map a raw value to a [`HipChecksum`]
    #[must_use]
    pub const fn new(raw: u16) -> HipChecksum {
        HipChecksum(raw)
    }
}

impl Display for HipChecksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

impl From<HipChecksum> for u16 {
    fn from(checksum: HipChecksum) -> Self {
        checksum.0
    }
}

/// The addresses of the IP header carrying a HIP message. The HIP checksum covers them
/// through a pseudo-header, like TCP and UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoHeader {
    /// Source address of the IP header
    pub source: IpAddr,
    /// Destination address of the IP header
    pub destination: IpAddr,
}

impl PseudoHeader {
    /// Create a pseudo-header from the addresses of the IP header
    #[must_use]
    pub fn new(source: IpAddr, destination: IpAddr) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Ones-complement sum of the pseudo-header for a HIP message of `len` bytes.
    /// The IPv4 and IPv6 layouts differ but their sums are the same once the
    /// zero padding is dropped.
    pub(crate) fn sum(&self, len: u16) -> Sum16BitWords {
        let mut sum = Sum16BitWords::new();
        let mut sum = match self.source {
            IpAddr::V4(a) => sum.add_4bytes(a.octets()),
            IpAddr::V6(a) => sum.add_16bytes(a.octets()),
        };
        let sum = match self.destination {
            IpAddr::V4(a) => sum.add_4bytes(a.octets()),
            IpAddr::V6(a) => sum.add_16bytes(a.octets()),
        };
        sum.add_2bytes([0, IPPROTO_HIP]).add_2bytes(len.to_be_bytes())
    }
}
