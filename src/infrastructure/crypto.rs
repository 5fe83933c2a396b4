//! Password envelope for key blobs: XChaCha20-Poly1305 with an iterated
//! SHA-256 key schedule. Used for the host `priv_keys` blob on tasks and
//! the per-pocket master/change key blobs.

use crate::foundation::{MixerError, Result};
use bitcoin::hashes::{sha256, Hash};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KDF_ROUNDS: usize = 2048;

fn derive_key(password: &SecretString, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut state = Zeroizing::new([0u8; 32]);
    let mut material = Zeroizing::new(Vec::with_capacity(salt.len() + password.expose_secret().len()));
    material.extend_from_slice(salt);
    material.extend_from_slice(password.expose_secret().as_bytes());
    *state = sha256::Hash::hash(&material).to_byte_array();
    for _ in 1..KDF_ROUNDS {
        *state = sha256::Hash::hash(&state[..]).to_byte_array();
    }
    state
}

/// Encrypt `plaintext` under `password`. Envelope layout:
/// `version(1) || salt(16) || nonce(24) || ciphertext`, hex-encoded.
pub fn encrypt_blob(password: &SecretString, plaintext: &[u8]) -> Result<String> {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt);
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..]).map_err(|err| MixerError::crypto("key setup", err))?;
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|err| MixerError::crypto("encrypt", err))?;

    let mut envelope = Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + ciphertext.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(hex::encode(envelope))
}

pub fn decrypt_blob(password: &SecretString, blob_hex: &str) -> Result<Zeroizing<Vec<u8>>> {
    let envelope = hex::decode(blob_hex.trim())?;
    if envelope.len() < 1 + SALT_LEN + NONCE_LEN {
        return Err(MixerError::crypto("decrypt", "envelope too short"));
    }
    if envelope[0] != ENVELOPE_VERSION {
        return Err(MixerError::crypto("decrypt", format!("unknown envelope version {}", envelope[0])));
    }
    let salt = &envelope[1..1 + SALT_LEN];
    let nonce = &envelope[1 + SALT_LEN..1 + SALT_LEN + NONCE_LEN];
    let ciphertext = &envelope[1 + SALT_LEN + NONCE_LEN..];

    let key = derive_key(password, salt);
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..]).map_err(|err| MixerError::crypto("key setup", err))?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| MixerError::crypto("decrypt", "authentication failed"))?;
    Ok(Zeroizing::new(plaintext))
}
