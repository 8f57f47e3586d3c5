//! Password-sealed key store container
//!
//! A key store or trust store PEM bundle may be sealed with a password using
//! AES-256-GCM and a PBKDF2-HMAC-SHA256 derived key.
//!
//! # Sealed Format
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header: "TRUSTGATE-SEALED-STORE-V1\0"      │  26 bytes
//! ├─────────────────────────────────────────────┤
//! │ PBKDF2 iterations (u32, big endian)        │   4 bytes
//! ├─────────────────────────────────────────────┤
//! │ Salt (random, unique per seal)             │  32 bytes
//! ├─────────────────────────────────────────────┤
//! │ Nonce (random, unique per seal)            │  12 bytes
//! ├─────────────────────────────────────────────┤
//! │ Ciphertext (AES-256-GCM sealed PEM)        │  Variable
//! ├─────────────────────────────────────────────┤
//! │ Authentication Tag (GCM)                   │  16 bytes
//! └─────────────────────────────────────────────┘
//! ```
//!
//! A wrong password and a tampered ciphertext are indistinguishable: both fail
//! tag verification and are reported as a bad password.
use crate::error::{KeyMaterialErrorKind, Result, TrustError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use tracing::warn;

/// Header identifying a sealed store (26 bytes with null terminator)
const HEADER: &[u8] = b"TRUSTGATE-SEALED-STORE-V1\0";

const ITERATIONS_SIZE: usize = 4;

/// Salt size for PBKDF2 key derivation (256 bits)
const SALT_SIZE: usize = 32;

/// Nonce size for AES-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Encryption key size (256 bits for AES-256)
const KEY_SIZE: usize = 32;

/// GCM authentication tag size (128 bits)
const TAG_SIZE: usize = 16;

/// Sealed stores declaring fewer iterations are rejected as malformed
pub const MIN_PBKDF2_ITERATIONS: u32 = 1_000;

const MIN_SEALED_SIZE: usize = HEADER.len() + ITERATIONS_SIZE + SALT_SIZE + NONCE_SIZE + TAG_SIZE;

/// Seal a PEM bundle with a password.
pub fn seal_store(plaintext: &[u8], password: &str, iterations: u32) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(TrustError::Config(
            "Password cannot be empty for key store sealing".to_string(),
        ));
    }

    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(TrustError::Config(format!(
            "PBKDF2 iterations must be at least {}",
            MIN_PBKDF2_ITERATIONS
        )));
    }

    if password.len() < 16 {
        warn!("Key store password is short (<16 chars), recommend 16+ characters");
    }

    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);

    let derived_key = derive_key(password, &salt, iterations);

    // Nonce reuse under one key is catastrophic for GCM
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived_key));
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| TrustError::Encryption {
            reason: format!("AES-GCM encryption failed: {}", e),
        })?;

    let mut result = Vec::with_capacity(MIN_SEALED_SIZE + plaintext.len());
    result.extend_from_slice(HEADER);
    result.extend_from_slice(&iterations.to_be_bytes());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Open a sealed store.
///
/// # Errors
///
/// - `Malformed` if the blob is truncated, has a foreign header, or declares
///   an iteration count below [`MIN_PBKDF2_ITERATIONS`]
/// - `BadPassword` if tag verification fails
pub fn open_store(sealed: &[u8], password: &str) -> Result<Vec<u8>> {
    if sealed.len() < MIN_SEALED_SIZE {
        return Err(TrustError::key_material(
            KeyMaterialErrorKind::Malformed,
            format!(
                "Sealed store too short: {} bytes (minimum {} bytes required)",
                sealed.len(),
                MIN_SEALED_SIZE
            ),
        ));
    }

    let (header, rest) = sealed.split_at(HEADER.len());
    if header != HEADER {
        return Err(TrustError::key_material(
            KeyMaterialErrorKind::Malformed,
            "Invalid sealed store header",
        ));
    }

    let (iterations, rest) = rest.split_at(ITERATIONS_SIZE);
    let iterations = u32::from_be_bytes([iterations[0], iterations[1], iterations[2], iterations[3]]);
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(TrustError::key_material(
            KeyMaterialErrorKind::Malformed,
            format!("Sealed store declares too few PBKDF2 iterations: {}", iterations),
        ));
    }

    let (salt, rest) = rest.split_at(SALT_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let derived_key = derive_key(password, salt, iterations);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived_key));
    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        TrustError::key_material(
            KeyMaterialErrorKind::BadPassword,
            "Unsealing failed - wrong password or corrupted data",
        )
    })
}

/// Returns true if `data` starts with the sealed store header.
pub fn is_sealed(data: &[u8]) -> bool {
    data.len() >= HEADER.len() && &data[..HEADER.len()] == HEADER
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
    let mut derived_key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut derived_key);
    derived_key
}
