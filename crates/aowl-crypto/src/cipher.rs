//! AES-256-GCM over [`EncryptedEnvelope`]
//!
//! A fresh 96-bit IV is drawn from the injected CSPRNG on every call. IVs
//! are never derived from counters, so the same key can be used from any
//! number of devices without coordinating nonce state.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use std::sync::Arc;

use crate::envelope::EncryptedEnvelope;
use crate::error::{CryptoError, CryptoResult};
use crate::random::{random_array, SecureRandom};
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

#[derive(Clone)]
pub struct AeadCipher {
    rng: Arc<dyn SecureRandom>,
}

impl AeadCipher {
    pub fn new(rng: Arc<dyn SecureRandom>) -> Self {
        Self { rng }
    }

    /// Encrypt `plaintext` under a 32-byte key with no associated data.
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> CryptoResult<EncryptedEnvelope> {
        let cipher = build_cipher(key)?;

        let iv: [u8; IV_SIZE] = random_array(self.rng.as_ref());
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);
        EncryptedEnvelope::from_parts(&iv, sealed, &tag)
    }

    /// Decrypt the wire form of an envelope.
    ///
    /// Any tag failure, including a wrong key, surfaces as
    /// [`CryptoError::TamperedData`].
    pub fn decrypt(&self, data: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>> {
        let envelope = EncryptedEnvelope::from_bytes(data)?;
        self.open(&envelope, key)
    }

    pub fn open(&self, envelope: &EncryptedEnvelope, key: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = build_cipher(key)?;

        let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&envelope.ciphertext);
        sealed.extend_from_slice(&envelope.tag);

        cipher
            .decrypt(Nonce::from_slice(&envelope.iv), sealed.as_ref())
            .map_err(|_| CryptoError::TamperedData)
    }
}

fn build_cipher(key: &[u8]) -> CryptoResult<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))
}
