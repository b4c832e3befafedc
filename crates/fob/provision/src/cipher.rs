//! DES / 3DES cipher unit used for external authentication
//!
//! A key of 16 hex characters selects single DES. A key of 32 hex characters
//! selects two-key 3DES, built as `E(k1, D(k2, E(k1, p)))` from independent
//! ECB passes. There is no IV and no chaining.

use std::fmt;

use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::Des;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// DES block size in bytes
pub const BLOCK_SIZE: usize = 8;

/// Key material, split at construction
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub enum DesKey {
    /// Single DES under `k1`
    Single([u8; 8]),
    /// Two-key 3DES EDE under `(k1, k2)`
    Triple([u8; 8], [u8; 8]),
}

impl fmt::Debug for DesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(_) => f.write_str("DesKey::Single(..)"),
            Self::Triple(..) => f.write_str("DesKey::Triple(..)"),
        }
    }
}

impl DesKey {
    /// Parse a 16 or 32 hex character key
    pub fn from_hex(key: &str) -> Result<Self> {
        if key.len() != 16 && key.len() != 32 {
            return Err(Error::InvalidKeyLength(key.len()));
        }
        let mut bytes = hex::decode(key)?;
        let mut k1 = [0u8; 8];
        k1.copy_from_slice(&bytes[..8]);
        let parsed = if bytes.len() == 16 {
            let mut k2 = [0u8; 8];
            k2.copy_from_slice(&bytes[8..]);
            Self::Triple(k1, k2)
        } else {
            Self::Single(k1)
        };
        k1.zeroize();
        bytes.zeroize();
        Ok(parsed)
    }

    /// Raw key length in bytes
    pub const fn byte_len(&self) -> usize {
        match self {
            Self::Single(_) => 8,
            Self::Triple(..) => 16,
        }
    }
}

/// Block cipher keyed for one authentication exchange
#[derive(Debug, Clone)]
pub struct CipherUnit {
    key: DesKey,
}

impl CipherUnit {
    /// Create a cipher from a 16 or 32 hex character key
    pub fn from_hex(key: &str) -> Result<Self> {
        Ok(Self {
            key: DesKey::from_hex(key)?,
        })
    }

    /// The parsed key
    pub const fn key(&self) -> &DesKey {
        &self.key
    }

    /// Encrypt hex input, returning uppercase hex
    pub fn encrypt_hex(&self, plain: &str) -> Result<String> {
        let data = hex::decode(plain)?;
        Ok(hex::encode_upper(self.encrypt(&data)))
    }

    /// Decrypt hex input, returning uppercase hex
    pub fn decrypt_hex(&self, cipher: &str) -> Result<String> {
        let data = hex::decode(cipher)?;
        Ok(hex::encode_upper(self.decrypt(&data)?))
    }

    /// Encrypt raw bytes
    ///
    /// Input that is not block aligned is PKCS#7 padded first.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut buffer = data.to_vec();
        let remainder = buffer.len() % BLOCK_SIZE;
        if remainder != 0 {
            let pad = BLOCK_SIZE - remainder;
            buffer.resize(buffer.len() + pad, pad as u8);
        }

        match &self.key {
            DesKey::Single(k1) => {
                let c1 = Des::new(GenericArray::from_slice(k1));
                for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
                    c1.encrypt_block(GenericArray::from_mut_slice(block));
                }
            }
            DesKey::Triple(k1, k2) => {
                let c1 = Des::new(GenericArray::from_slice(k1));
                let c2 = Des::new(GenericArray::from_slice(k2));
                for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
                    let block = GenericArray::from_mut_slice(block);
                    c1.encrypt_block(block);
                    c2.decrypt_block(block);
                    c1.encrypt_block(block);
                }
            }
        }
        buffer
    }

    /// Decrypt raw bytes; input must be block aligned and padding is kept
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(Error::InvalidBlockLength(data.len()));
        }
        let mut buffer = data.to_vec();

        match &self.key {
            DesKey::Single(k1) => {
                let c1 = Des::new(GenericArray::from_slice(k1));
                for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
                    c1.decrypt_block(GenericArray::from_mut_slice(block));
                }
            }
            DesKey::Triple(k1, k2) => {
                let c1 = Des::new(GenericArray::from_slice(k1));
                let c2 = Des::new(GenericArray::from_slice(k2));
                for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
                    let block = GenericArray::from_mut_slice(block);
                    c1.decrypt_block(block);
                    c2.encrypt_block(block);
                    c1.decrypt_block(block);
                }
            }
        }
        Ok(buffer)
    }
}
