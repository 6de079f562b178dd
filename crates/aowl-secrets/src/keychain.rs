//! Platform keychain credential store.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::store::SecureCredentialStore;

pub const SERVICE_NAME: &str = "aowl";

#[derive(Debug, Clone)]
pub struct KeychainStore {
    service: String,
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeychainStore {
    /// A separate service name keeps several vaults apart on one machine.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Check if the platform keychain is available.
    pub fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__aowl_probe__").is_ok()
    }

    fn entry(&self, key_name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key_name)
            .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))
    }
}

impl SecureCredentialStore for KeychainStore {
    fn get(&self, key_name: &str) -> Result<Option<SecretString>> {
        match self.entry(key_name)?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("keychain get for '{key_name}': {e}")),
        }
    }

    fn set(&self, key_name: &str, value: &SecretString) -> Result<()> {
        self.entry(key_name)?
            .set_password(value.expose_secret())
            .map_err(|e| anyhow::anyhow!("keychain store for '{key_name}': {e}"))?;
        tracing::debug!(key = key_name, "stored secret in platform keychain");
        Ok(())
    }

    fn delete(&self, key_name: &str) -> Result<()> {
        match self.entry(key_name)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(key = key_name, "deleted secret from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()), // already deleted
            Err(e) => Err(anyhow::anyhow!("keychain delete for '{key_name}': {e}")),
        }
    }
}
