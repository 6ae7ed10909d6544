//! Channel pre-shared keys.
//!
//! Keys are configured as base64. A 16 byte key selects AES-128, a 32 byte
//! key AES-256. A single byte is the mesh firmware's shorthand for the
//! well-known default key: `1` is the default key itself, `n` is the default
//! key with its last byte incremented by `n - 1`, and `0` means the channel is
//! not encrypted.

use aes::{Aes128, Aes256};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherError};
use std::fmt;
use std::str::FromStr;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// The default channel key ("AQ==" in shorthand form).
pub const DEFAULT_KEY: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69, 0x01,
];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum KeyError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("key index 0 means no encryption and cannot be used for decryption")]
    NoEncryption,
    #[error("unsupported key length {0}, expected 1, 16 or 32 bytes")]
    InvalidLength(usize),
}

#[derive(Clone, PartialEq, Eq)]
pub enum ChannelKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl ChannelKey {
    /// XORs `buf` in place with the AES-CTR keystream for `nonce`. The same
    /// call encrypts and decrypts.
    pub fn apply_keystream(&self, nonce: &[u8; 16], buf: &mut [u8]) -> Result<(), StreamCipherError> {
        match self {
            ChannelKey::Aes128(key) => {
                Aes128Ctr::new(&(*key).into(), &(*nonce).into()).try_apply_keystream(buf)
            }
            ChannelKey::Aes256(key) => {
                Aes256Ctr::new(&(*key).into(), &(*nonce).into()).try_apply_keystream(buf)
            }
        }
    }

    pub fn bits(&self) -> usize {
        match self {
            ChannelKey::Aes128(_) => 128,
            ChannelKey::Aes256(_) => 256,
        }
    }
}

impl FromStr for ChannelKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = STANDARD.decode(s.trim())?;

        match bytes.len() {
            1 => match bytes[0] {
                0 => Err(KeyError::NoEncryption),
                index => {
                    let mut key = DEFAULT_KEY;
                    key[15] = key[15].wrapping_add(index - 1);
                    Ok(ChannelKey::Aes128(key))
                }
            },
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(&bytes);
                Ok(ChannelKey::Aes128(key))
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                Ok(ChannelKey::Aes256(key))
            }
            len => Err(KeyError::InvalidLength(len)),
        }
    }
}

// Never print key material.
impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelKey(AES-{})", self.bits())
    }
}
