//! Secure credential store seam.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Well-known credential key names
pub mod keys {
    /// KDF salt (base64)
    pub const SALT: &str = "salt";
    /// SHA-256 of the PIN (base64)
    pub const PIN_HASH: &str = "pin-hash";
    /// The derived master key (base64)
    pub const MASTER_KEY: &str = "master-key";
    /// Verifier for a re-derived master key (base64)
    pub const KEY_CHECK: &str = "key-check";
    /// Consecutive failed unlocks (decimal)
    pub const FAILED_ATTEMPTS: &str = "failed-attempts";
    /// End of the current lockout (RFC 3339)
    pub const LOCKOUT_UNTIL: &str = "lockout-until";
    /// Remote API token
    pub const REMOTE_TOKEN: &str = "remote-token";
    /// Remote repository as `owner/repo`
    pub const REMOTE_REPO: &str = "remote-repo";
    /// Last successful sync (RFC 3339)
    pub const LAST_SYNC: &str = "last-sync";

    pub const ALL: [&str; 9] = [
        SALT,
        PIN_HASH,
        MASTER_KEY,
        KEY_CHECK,
        FAILED_ATTEMPTS,
        LOCKOUT_UNTIL,
        REMOTE_TOKEN,
        REMOTE_REPO,
        LAST_SYNC,
    ];
}

pub trait SecureCredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<SecretString>>;
    fn set(&self, key: &str, value: &SecretString) -> Result<()>;
    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn get_bytes(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.get(key)? {
            Some(encoded) => {
                let bytes = STANDARD
                    .decode(encoded.expose_secret().as_bytes())
                    .with_context(|| format!("credential '{key}' is not valid base64"))?;
                Ok(Some(Zeroizing::new(bytes)))
            }
            None => Ok(None),
        }
    }

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = SecretString::from(STANDARD.encode(value));
        self.set(key, &encoded)
    }
}

/// Process-local store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, SecretString>>,
    unavailable: Mutex<bool>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, like a locked platform keychain.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) = unavailable;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("credential store unavailable");
        }
        Ok(())
    }
}

impl SecureCredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>> {
        self.check()?;
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &SecretString) -> Result<()> {
        self.check()?;
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
