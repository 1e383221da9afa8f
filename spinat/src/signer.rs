// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! HMAC signing of proxy UPDATEs with the integrity algorithm of the association's ESP
//! transform.

use hmac::{Hmac, Mac};
use md5::Md5;
use net::hip::param::HMAC_LEN;
use sha1::Sha1;

use crate::errors::SpinatError;
use crate::update::HmacSigner;

/// ESP transform suite identifiers
pub mod transforms {
    pub const AES_CBC_HMAC_SHA1: u16 = 1;
    pub const TDES_CBC_HMAC_SHA1: u16 = 2;
    pub const TDES_CBC_HMAC_MD5: u16 = 3;
    pub const BLOWFISH_CBC_HMAC_SHA1: u16 = 4;
    pub const NULL_HMAC_SHA1: u16 = 5;
    pub const NULL_HMAC_MD5: u16 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Digest {
    Sha1,
    Md5,
}

impl Digest {
    fn of(transform: u16) -> Result<Self, SpinatError> {
        use transforms::{
            AES_CBC_HMAC_SHA1, BLOWFISH_CBC_HMAC_SHA1, NULL_HMAC_MD5, NULL_HMAC_SHA1,
            TDES_CBC_HMAC_MD5, TDES_CBC_HMAC_SHA1,
        };
        match transform {
            AES_CBC_HMAC_SHA1 | TDES_CBC_HMAC_SHA1 | BLOWFISH_CBC_HMAC_SHA1 | NULL_HMAC_SHA1 => {
                Ok(Digest::Sha1)
            }
            TDES_CBC_HMAC_MD5 | NULL_HMAC_MD5 => Ok(Digest::Md5),
            _ => Err(SpinatError::UnsupportedTransform(transform)),
        }
    }

    /// Length of the integrity key
    const fn key_len(self) -> usize {
        match self {
            Digest::Sha1 => 20,
            Digest::Md5 => 16,
        }
    }
}

/// Computes the tag of a proxy UPDATE: HMAC-SHA1 or HMAC-MD5 as the transform says, keyed
/// with the leading integrity-key bytes of the ticket key. MD5 tags are right-aligned in
/// the 20-byte HMAC parameter, behind zeroes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransformSigner;

impl HmacSigner for TransformSigner {
    fn sign(&self, key: &[u8], transform: u16, data: &[u8]) -> Result<[u8; HMAC_LEN], SpinatError> {
        let digest = Digest::of(transform)?;
        let key = key
            .get(..digest.key_len())
            .ok_or(SpinatError::KeyTooShort {
                transform,
                len: key.len(),
            })?;
        let mut tag = [0u8; HMAC_LEN];
        match digest {
            Digest::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| {
                    SpinatError::KeyTooShort {
                        transform,
                        len: key.len(),
                    }
                })?;
                mac.update(data);
                tag.copy_from_slice(&mac.finalize().into_bytes());
            }
            Digest::Md5 => {
                let mut mac = Hmac::<Md5>::new_from_slice(key).map_err(|_| {
                    SpinatError::KeyTooShort {
                        transform,
                        len: key.len(),
                    }
                })?;
                mac.update(data);
                let bytes = mac.finalize().into_bytes();
                tag[HMAC_LEN - bytes.len()..].copy_from_slice(&bytes);
            }
        }
        Ok(tag)
    }
}
