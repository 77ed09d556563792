//! AES-GCM authenticated encryption.
//!
//! Every call to [`seal`] draws a fresh 12-byte nonce from the OS CSPRNG, so a
//! given key never sees the same nonce twice in practice. The nonce is returned
//! separately from the ciphertext because Coffer's envelopes carry it as its
//! own field.
//!
//! AES-128, AES-192 and AES-256 keys are accepted; the cipher is selected from
//! the key length. Everything Coffer generates itself is AES-256.

use aes_gcm::{
    aead::{self, consts::U12, Aead, KeyInit, Payload},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::random::generate_nonce;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Output of [`seal`]: the nonce used and the authenticated ciphertext
/// (`ciphertext || tag`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Random nonce used for this encryption.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte GCM tag appended.
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
enum Cipher {
    Aes128,
    Aes192,
    Aes256,
}

impl Cipher {
    fn for_key(key: &[u8]) -> Result<Self, CryptoError> {
        match key.len() {
            16 => Ok(Self::Aes128),
            24 => Ok(Self::Aes192),
            32 => Ok(Self::Aes256),
            n => Err(CryptoError::InvalidKey(format!(
                "expected 16, 24 or 32 bytes, got {n}"
            ))),
        }
    }
}

/// Encrypts plaintext with AES-GCM under a freshly generated nonce.
///
/// # Arguments
///
/// * `key` - 16, 24 or 32-byte key
/// * `plaintext` - Data to encrypt (may be empty)
/// * `associated_data` - Optional data to authenticate without encrypting
pub fn seal(
    key: &[u8],
    plaintext: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Sealed, CryptoError> {
    let cipher = Cipher::for_key(key)?;
    let nonce = generate_nonce();
    let payload = Payload {
        msg: plaintext,
        aad: associated_data.unwrap_or_default(),
    };

    let ciphertext = match cipher {
        Cipher::Aes128 => encrypt_with::<Aes128Gcm>(key, &nonce, payload)?,
        Cipher::Aes192 => encrypt_with::<Aes192Gcm>(key, &nonce, payload)?,
        Cipher::Aes256 => encrypt_with::<Aes256Gcm>(key, &nonce, payload)?,
    };

    Ok(Sealed { nonce, ciphertext })
}

/// Decrypts and authenticates ciphertext produced by [`seal`].
///
/// Any failure after the input checks (wrong key, wrong nonce, flipped bit,
/// mismatched associated data) is reported as the same
/// [`CryptoError::DecryptionFailed`].
///
/// # Returns
///
/// Decrypted plaintext wrapped in `Zeroizing` for automatic memory cleanup.
pub fn open(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = Cipher::for_key(key)?;

    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidInput(format!(
            "nonce must be {NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }

    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::InvalidInput("ciphertext too short".to_string()));
    }

    let payload = Payload {
        msg: ciphertext,
        aad: associated_data.unwrap_or_default(),
    };

    let plaintext = match cipher {
        Cipher::Aes128 => decrypt_with::<Aes128Gcm>(key, nonce, payload)?,
        Cipher::Aes192 => decrypt_with::<Aes192Gcm>(key, nonce, payload)?,
        Cipher::Aes256 => decrypt_with::<Aes256Gcm>(key, nonce, payload)?,
    };

    Ok(Zeroizing::new(plaintext))
}

fn encrypt_with<C>(key: &[u8], nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    cipher
        .encrypt(aead::Nonce::<C>::from_slice(nonce), payload)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

fn decrypt_with<C>(key: &[u8], nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    cipher
        .decrypt(aead::Nonce::<C>::from_slice(nonce), payload)
        .map_err(|_| CryptoError::DecryptionFailed)
}
