//! Cryptographically secure random generation.
//!
//! Uses the operating system's CSPRNG for all random number generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::aead::{KEY_SIZE, NONCE_SIZE};

/// Generates a cryptographically secure random 256-bit key.
///
/// The key is wrapped in `Zeroizing` to ensure it is cleared from memory when dropped.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut *key);
    key
}

/// Generates a cryptographically secure random nonce for AES-GCM.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generates cryptographically secure random bytes.
pub fn generate_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generates a random token as unpadded URL-safe base64.
///
/// Suitable for bearer tokens passed in HTTP headers or environment variables.
///
/// # Arguments
///
/// * `byte_len` - Number of random bytes before encoding
pub fn generate_token(byte_len: usize) -> String {
    let bytes = Zeroizing::new(generate_bytes(byte_len));
    URL_SAFE_NO_PAD.encode(&*bytes)
}
