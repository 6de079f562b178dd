//! aowl-secrets: credential storage and the unlock gate
//!
//! Remote token discovery chain (in order of precedence):
//!   1. `remote-token` in the credential store (platform keychain)
//!   2. $AOWL_TOKEN env var
//!   3. $GITHUB_TOKEN env var

pub mod auth;
pub mod error;
pub mod keychain;
pub mod store;

pub use auth::{validate_credentials, AuthGate, AuthState, LockoutPolicy};
pub use error::{AuthError, AuthResult};
pub use keychain::KeychainStore;
pub use store::{keys, MemoryCredentialStore, SecureCredentialStore};

use anyhow::Result;
use secrecy::SecretString;

const TOKEN_ENV_VARS: [&str; 2] = ["AOWL_TOKEN", "GITHUB_TOKEN"];

/// Token for the remote content API and where it came from
#[derive(Debug, Clone)]
pub struct RemoteCredentials {
    pub token: SecretString,
    pub source: String,
}

impl RemoteCredentials {
    /// Load the token using the full discovery chain.
    pub fn load(store: &dyn SecureCredentialStore) -> Result<Option<Self>> {
        match store.get(keys::REMOTE_TOKEN) {
            Ok(Some(token)) => {
                return Ok(Some(RemoteCredentials {
                    token,
                    source: "keychain".into(),
                }))
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("keychain token lookup failed: {e}, falling back to env"),
        }
        Ok(Self::load_from_env(|name| std::env::var(name).ok()))
    }

    fn load_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        TOKEN_ENV_VARS.iter().find_map(|name| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .map(|v| RemoteCredentials {
                    token: SecretString::from(v),
                    source: format!("env:{name}"),
                })
        })
    }

    /// Remember the token for later runs.
    pub fn save(store: &dyn SecureCredentialStore, token: &SecretString) -> Result<()> {
        store.set(keys::REMOTE_TOKEN, token)
    }
}
