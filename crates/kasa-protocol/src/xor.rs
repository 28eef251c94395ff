//! Autokey XOR cipher used by IOT devices on port 9999.

use crate::error::{KasaError, Result};

pub const INITIAL_KEY: u8 = 171;

/// Length of the big-endian size prefix on TCP frames.
pub const BLOCK_SIZE: usize = 4;

pub struct XorEncryption;

impl XorEncryption {
    /// Cipher bytes without the length prefix (the UDP discovery form).
    pub fn xor_payload(plain: &[u8]) -> Vec<u8> {
        let mut key = INITIAL_KEY;
        plain
            .iter()
            .map(|b| {
                key ^= b;
                key
            })
            .collect()
    }

    /// Encrypt a request and prepend its length.
    pub fn encrypt(request: &str) -> Vec<u8> {
        let plain = request.as_bytes();
        let mut out = Vec::with_capacity(BLOCK_SIZE + plain.len());
        out.extend_from_slice(&(plain.len() as u32).to_be_bytes());
        out.extend(Self::xor_payload(plain));
        out
    }

    /// Decrypt a payload that has already had its length prefix removed.
    pub fn decrypt(cipher: &[u8]) -> Result<String> {
        let mut key = INITIAL_KEY;
        let plain: Vec<u8> = cipher
            .iter()
            .map(|&c| {
                let p = key ^ c;
                key = c;
                p
            })
            .collect();
        String::from_utf8(plain)
            .map_err(|e| KasaError::kasa(format!("Decrypted payload is not UTF-8: {e}")))
    }
}
