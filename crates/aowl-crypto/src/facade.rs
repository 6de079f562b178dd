//! The single crypto surface the rest of aowl calls.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::cipher::AeadCipher;
use crate::ct;
use crate::envelope::EncryptedEnvelope;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{self, KdfParams, MasterKey};
use crate::random::{OsRandom, SecureRandom};
use crate::SALT_SIZE;

const KEY_CHECK_DOMAIN: &[u8] = b"aowl-key-check-v1";

#[derive(Clone)]
pub struct CryptoFacade {
    rng: Arc<dyn SecureRandom>,
    cipher: AeadCipher,
    params: KdfParams,
}

impl Default for CryptoFacade {
    fn default() -> Self {
        Self::new(Arc::new(OsRandom), KdfParams::default())
    }
}

impl CryptoFacade {
    pub fn new(rng: Arc<dyn SecureRandom>, params: KdfParams) -> Self {
        Self {
            cipher: AeadCipher::new(rng.clone()),
            rng,
            params,
        }
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.params
    }

    /// Fresh 16-byte KDF salt.
    pub fn generate_salt(&self) -> Vec<u8> {
        self.rng.bytes(SALT_SIZE)
    }

    /// Argon2id over password || PIN. CPU-bound for roughly a second at the
    /// default parameters; async callers should run it on a blocking thread.
    pub fn derive_key(
        &self,
        password: &SecretString,
        pin: &SecretString,
        salt: &[u8],
    ) -> CryptoResult<MasterKey> {
        let started = std::time::Instant::now();
        let key = kdf::derive_key(password, pin, salt, &self.params)?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            mem_cost_kib = self.params.mem_cost_kib,
            "derived master key"
        );
        Ok(key)
    }

    pub fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> CryptoResult<EncryptedEnvelope> {
        self.cipher.encrypt(plaintext, key)
    }

    /// Encrypt straight to the wire form.
    pub fn seal(&self, plaintext: &[u8], key: &MasterKey) -> CryptoResult<Vec<u8>> {
        Ok(self.cipher.encrypt(plaintext, key.as_bytes())?.to_bytes())
    }

    pub fn decrypt(&self, data: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>> {
        self.cipher.decrypt(data, key)
    }

    pub fn encrypt_string(&self, plaintext: &str, key: &[u8]) -> CryptoResult<EncryptedEnvelope> {
        self.encrypt(plaintext.as_bytes(), key)
    }

    pub fn decrypt_string(&self, data: &[u8], key: &[u8]) -> CryptoResult<String> {
        let bytes = self.decrypt(data, key)?;
        String::from_utf8(bytes)
            .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }

    /// Unsalted SHA-256 of the PIN. A quick-unlock convenience only.
    pub fn hash_pin(&self, pin: &SecretString) -> [u8; 32] {
        Sha256::digest(pin.expose_secret().as_bytes()).into()
    }

    pub fn verify_pin_hash(&self, pin: &SecretString, stored: &[u8]) -> bool {
        ct::bytes_eq(&self.hash_pin(pin), stored)
    }

    /// Verifier stored beside the master key so a re-derived key can be
    /// checked without touching the remote.
    pub fn key_check(&self, key: &MasterKey) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(KEY_CHECK_DOMAIN);
        hasher.update(key.as_bytes());
        hasher.finalize().into()
    }

    pub fn verify_key_check(&self, key: &MasterKey, stored: &[u8]) -> bool {
        ct::bytes_eq(&self.key_check(key), stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;

    fn facade() -> CryptoFacade {
        CryptoFacade::new(Arc::new(OsRandom), KdfParams::insecure_fast())
    }

    #[test]
    fn test_generate_salt() {
        let f = facade();
        let a = f.generate_salt();
        let b = f.generate_salt();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_and_seal() {
        let f = facade();
        let salt = f.generate_salt();
        let key = f
            .derive_key(
                &SecretString::from("hunter2"),
                &SecretString::from("123456"),
                &salt,
            )
            .unwrap();

        let sealed = f.seal(b"vault index", &key).unwrap();
        assert_eq!(f.decrypt(&sealed, key.as_bytes()).unwrap(), b"vault index");
    }

    #[test]
    fn test_string_roundtrip() {
        let f = facade();
        let key = [4u8; 32];
        let envelope = f.encrypt_string("héllo wörld", &key).unwrap();
        assert_eq!(
            f.decrypt_string(&envelope.to_bytes(), &key).unwrap(),
            "héllo wörld"
        );
    }

    #[test]
    fn test_decrypt_string_rejects_invalid_utf8() {
        let f = facade();
        let key = [4u8; 32];
        let envelope = f.encrypt(&[0xFF, 0xFE, 0xFD], &key).unwrap();
        assert!(matches!(
            f.decrypt_string(&envelope.to_bytes(), &key),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_pin_hash() {
        let f = facade();
        let stored = f.hash_pin(&SecretString::from("123456"));

        assert!(f.verify_pin_hash(&SecretString::from("123456"), &stored));
        assert!(!f.verify_pin_hash(&SecretString::from("123457"), &stored));
        assert!(!f.verify_pin_hash(&SecretString::from("123456"), &stored[..31]));
    }

    #[test]
    fn test_key_check() {
        let f = facade();
        let key = MasterKey::from_bytes([1u8; 32]);
        let other = MasterKey::from_bytes([2u8; 32]);
        let check = f.key_check(&key);

        assert!(f.verify_key_check(&key, &check));
        assert!(!f.verify_key_check(&other, &check));
        assert_ne!(&check, key.as_bytes());
    }

    #[test]
    fn test_injected_rng_drives_salts() {
        let a = CryptoFacade::new(Arc::new(SeededRandom::new(3)), KdfParams::insecure_fast());
        let b = CryptoFacade::new(Arc::new(SeededRandom::new(3)), KdfParams::insecure_fast());
        assert_eq!(a.generate_salt(), b.generate_salt());
    }
}
