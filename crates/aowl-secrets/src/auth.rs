//! PIN / password unlock with a persistent failure counter and lockout.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{watch, Mutex};

use aowl_core::config::AuthConfig;
use aowl_core::{Clock, SystemClock, VaultConfig};
use aowl_crypto::{CryptoFacade, MasterKey};
use aowl_storage::VaultBlobStore;

use crate::error::{AuthError, AuthResult};
use crate::store::{keys, SecureCredentialStore};

pub const PIN_LENGTH: usize = 6;

const VERIFIER_PLAINTEXT: &[u8] = b"aowl vault verifier v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No salt or PIN hash on this device.
    NotConfigured,
    Locked {
        failed_attempts: u32,
        lockout_until: Option<DateTime<Utc>>,
    },
    Unlocked,
    Error {
        cause: AuthError,
    },
}

impl AuthState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, AuthState::Unlocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for LockoutPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout: Duration::seconds(config.lockout_secs as i64),
        }
    }
}

/// Guards the master key behind a PIN (quick unlock) or the password
/// (full re-derivation). Failure counts and lockouts survive restarts
/// because they live in the credential store.
pub struct AuthGate {
    store: Arc<dyn SecureCredentialStore>,
    blobs: VaultBlobStore,
    crypto: CryptoFacade,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
    state_tx: watch::Sender<AuthState>,
    session: Mutex<Option<MasterKey>>,
}

impl AuthGate {
    pub fn new(
        store: Arc<dyn SecureCredentialStore>,
        blobs: VaultBlobStore,
        crypto: CryptoFacade,
        policy: LockoutPolicy,
    ) -> AuthResult<Self> {
        Self::with_clock(store, blobs, crypto, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SecureCredentialStore>,
        blobs: VaultBlobStore,
        crypto: CryptoFacade,
        policy: LockoutPolicy,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let (state_tx, _) = watch::channel(AuthState::NotConfigured);
        let gate = Self {
            store,
            blobs,
            crypto,
            clock,
            policy,
            state_tx,
            session: Mutex::new(None),
        };
        let initial = gate.resting_state()?;
        gate.state_tx.send_replace(initial);
        Ok(gate)
    }

    pub fn state(&self) -> AuthState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// The in-memory key, only while unlocked.
    pub async fn master_key(&self) -> Option<MasterKey> {
        self.session.lock().await.clone()
    }

    /// Create the vault, or join an existing one from another device.
    ///
    /// The first device writes `config.json` with a fresh salt and a
    /// verifier sealed under the derived key. Later devices reuse the stored
    /// salt and must open that verifier, so a mistyped password on a joining
    /// device is caught before anything is stored locally.
    pub async fn setup_vault(
        &self,
        password: &SecretString,
        pin: &SecretString,
    ) -> AuthResult<MasterKey> {
        let result = self.try_setup(password, pin).await;
        self.observe(result)
    }

    async fn try_setup(&self, password: &SecretString, pin: &SecretString) -> AuthResult<MasterKey> {
        validate_credentials(password, pin)?;
        let mut session = self.session.lock().await;

        let (salt, key) = self.create_or_join(password, pin).await?;

        self.store.set_bytes(keys::SALT, &salt)?;
        self.store
            .set_bytes(keys::PIN_HASH, &self.crypto.hash_pin(pin))?;
        self.persist_key(&key)?;
        self.clear_failures()?;

        *session = Some(key.clone());
        self.publish(AuthState::Unlocked);
        tracing::info!("vault set up on this device");
        Ok(key)
    }

    /// Quick unlock: check the PIN hash and hand back the cached key.
    /// Any failure drops the session key.
    pub async fn unlock_with_pin(&self, pin: &SecretString) -> AuthResult<MasterKey> {
        let mut session = self.session.lock().await;
        let result = self.cached_key(pin);
        *session = result.as_ref().ok().cloned();
        let key = self.observe(result)?;
        self.publish(AuthState::Unlocked);
        tracing::debug!("unlocked with PIN");
        Ok(key)
    }

    fn cached_key(&self, pin: &SecretString) -> AuthResult<MasterKey> {
        let pin_hash = self.require_configured()?;
        let failed = self.check_lockout(self.clock.now())?;

        if !self.crypto.verify_pin_hash(pin, &pin_hash) {
            return Err(self.register_failure(failed, AuthError::WrongPinError)?);
        }
        self.clear_failures()?;

        let Some(bytes) = self.store.get_bytes(keys::MASTER_KEY)? else {
            self.publish(AuthState::Locked {
                failed_attempts: 0,
                lockout_until: None,
            });
            return Err(AuthError::PasswordRequired);
        };
        MasterKey::from_slice(&bytes)
            .map_err(|e| AuthError::StorageError(format!("cached master key: {e}")))
    }

    /// Full unlock: re-derive the key from password and PIN and re-cache it.
    /// Any failure drops the session key.
    pub async fn unlock_with_password(
        &self,
        password: &SecretString,
        pin: &SecretString,
    ) -> AuthResult<MasterKey> {
        let mut session = self.session.lock().await;
        let result = self.verify_password(password, pin).await;
        *session = result.as_ref().ok().cloned();
        let key = self.observe(result)?;
        self.publish(AuthState::Unlocked);
        tracing::info!("unlocked with password");
        Ok(key)
    }

    /// Re-prove the password for a sensitive operation. A failure also ends
    /// the current session.
    pub async fn reauthenticate(
        &self,
        password: &SecretString,
        pin: &SecretString,
    ) -> AuthResult<MasterKey> {
        self.unlock_with_password(password, pin).await
    }

    /// Drop the in-memory key. The cached key stays in the credential store
    /// so the next unlock can use the PIN.
    pub async fn lock(&self) -> AuthResult<()> {
        *self.session.lock().await = None;
        let state = self.resting_state()?;
        self.publish(state);
        Ok(())
    }

    /// Forget every local credential. Remote data is untouched.
    pub async fn reset_vault(&self) -> AuthResult<()> {
        let mut session = self.session.lock().await;
        for key in keys::ALL {
            self.store.delete(key)?;
        }
        *session = None;
        self.publish(AuthState::NotConfigured);
        tracing::warn!("local vault credentials wiped");
        Ok(())
    }

    async fn verify_password(
        &self,
        password: &SecretString,
        pin: &SecretString,
    ) -> AuthResult<MasterKey> {
        let pin_hash = self.require_configured()?;
        let failed = self.check_lockout(self.clock.now())?;

        if !self.crypto.verify_pin_hash(pin, &pin_hash) {
            return Err(self.register_failure(failed, AuthError::WrongPinError)?);
        }

        let salt = self
            .store
            .get_bytes(keys::SALT)?
            .ok_or(AuthError::NotConfigured)?;
        let key = self.derive(password, pin, &salt).await?;

        let verified = match self.store.get_bytes(keys::KEY_CHECK)? {
            Some(check) => self.crypto.verify_key_check(&key, &check),
            None => {
                let config = self.blobs.fetch_config().await?;
                self.opens_vault(config.as_ref(), &key).await?
            }
        };
        if !verified {
            return Err(self.register_failure(failed, AuthError::WrongPasswordError)?);
        }

        self.clear_failures()?;
        self.persist_key(&key)?;
        Ok(key)
    }

    /// Salt and key for this device: a brand-new vault, or the existing
    /// one if `password` opens it.
    async fn create_or_join(
        &self,
        password: &SecretString,
        pin: &SecretString,
    ) -> AuthResult<(Vec<u8>, MasterKey)> {
        if let Some(config) = self.blobs.fetch_config().await? {
            tracing::info!("joining existing vault");
            return self.join(&config, password, pin).await;
        }

        let salt = self.crypto.generate_salt();
        let key = self.derive(password, pin, &salt).await?;
        let verifier = self
            .crypto
            .seal(VERIFIER_PLAINTEXT, &key)
            .map_err(|e| AuthError::KeyDerivationError(format!("vault verifier: {e}")))?;
        let config = VaultConfig::new(salt, self.clock.now()).with_verifier(verifier);

        match self.blobs.create_config(&config).await {
            Ok(_) => {
                tracing::info!("created new vault config");
                Ok((config.salt, key))
            }
            Err(e) if e.is_conflict() => {
                // another device created it first
                let existing = self.blobs.fetch_config().await?.ok_or(e)?;
                self.join(&existing, password, pin).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn join(
        &self,
        config: &VaultConfig,
        password: &SecretString,
        pin: &SecretString,
    ) -> AuthResult<(Vec<u8>, MasterKey)> {
        let key = self.derive(password, pin, &config.salt).await?;
        if !self.opens_vault(Some(config), &key).await? {
            tracing::warn!("setup password does not open the existing vault");
            return Err(AuthError::WrongPasswordError(self.policy.max_failed_attempts));
        }
        Ok((config.salt.clone(), key))
    }

    async fn derive(
        &self,
        password: &SecretString,
        pin: &SecretString,
        salt: &[u8],
    ) -> AuthResult<MasterKey> {
        let crypto = self.crypto.clone();
        let password = password.clone();
        let pin = pin.clone();
        let salt = salt.to_vec();
        tokio::task::spawn_blocking(move || crypto.derive_key(&password, &pin, &salt))
            .await
            .map_err(|e| AuthError::KeyDerivationError(e.to_string()))?
            .map_err(|e| AuthError::KeyDerivationError(e.to_string()))
    }

    /// Check `key` against the config's verifier. Configs written before the
    /// verifier existed fall back to the remote index, and are accepted
    /// when there is no index either.
    async fn opens_vault(&self, config: Option<&VaultConfig>, key: &MasterKey) -> AuthResult<bool> {
        if let Some(verifier) = config.and_then(|c| c.verifier.as_deref()) {
            return Ok(self
                .crypto
                .decrypt(verifier, key.as_bytes())
                .is_ok_and(|plain| plain == VERIFIER_PLAINTEXT));
        }
        match self.blobs.download_index().await? {
            Some(index) => Ok(self.crypto.decrypt(&index.content, key.as_bytes()).is_ok()),
            None => Ok(true),
        }
    }

    fn require_configured(&self) -> AuthResult<Vec<u8>> {
        match self.store.get_bytes(keys::PIN_HASH)? {
            Some(hash) if self.store.get(keys::SALT)?.is_some() => Ok(hash.to_vec()),
            _ => Err(AuthError::NotConfigured),
        }
    }

    /// Current failure count, or `LockedOutError` while a lockout runs.
    /// An expired lockout is cleared along with its counter.
    fn check_lockout(&self, now: DateTime<Utc>) -> AuthResult<u32> {
        if let Some(until) = self.lockout_until()? {
            if now < until {
                self.publish(AuthState::Locked {
                    failed_attempts: self.failed_attempts()?,
                    lockout_until: Some(until),
                });
                return Err(AuthError::LockedOutError(until - now));
            }
            tracing::info!("lockout expired");
            self.clear_failures()?;
            return Ok(0);
        }
        self.failed_attempts()
    }

    fn register_failure(
        &self,
        failed_so_far: u32,
        wrong: fn(u32) -> AuthError,
    ) -> AuthResult<AuthError> {
        let failed = failed_so_far.saturating_add(1);
        self.store.set(
            keys::FAILED_ATTEMPTS,
            &SecretString::from(failed.to_string()),
        )?;

        if failed >= self.policy.max_failed_attempts {
            let until = self.clock.now() + self.policy.lockout;
            self.store.set(
                keys::LOCKOUT_UNTIL,
                &SecretString::from(until.to_rfc3339()),
            )?;
            tracing::warn!(failed, until = %until, "too many failed unlocks, locking out");
            self.publish(AuthState::Locked {
                failed_attempts: failed,
                lockout_until: Some(until),
            });
            return Ok(AuthError::LockedOutError(self.policy.lockout));
        }

        tracing::warn!(failed, "failed unlock attempt");
        self.publish(AuthState::Locked {
            failed_attempts: failed,
            lockout_until: None,
        });
        Ok(wrong(self.policy.max_failed_attempts - failed))
    }

    fn failed_attempts(&self) -> AuthResult<u32> {
        match self.store.get(keys::FAILED_ATTEMPTS)? {
            Some(raw) => raw.expose_secret().parse().map_err(|e| {
                AuthError::StorageError(format!("corrupt failed-attempts counter: {e}"))
            }),
            None => Ok(0),
        }
    }

    fn lockout_until(&self) -> AuthResult<Option<DateTime<Utc>>> {
        match self.store.get(keys::LOCKOUT_UNTIL)? {
            Some(raw) => DateTime::parse_from_rfc3339(raw.expose_secret())
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| AuthError::StorageError(format!("corrupt lockout timestamp: {e}"))),
            None => Ok(None),
        }
    }

    fn clear_failures(&self) -> AuthResult<()> {
        self.store.delete(keys::FAILED_ATTEMPTS)?;
        self.store.delete(keys::LOCKOUT_UNTIL)?;
        Ok(())
    }

    fn persist_key(&self, key: &MasterKey) -> AuthResult<()> {
        self.store.set_bytes(keys::MASTER_KEY, key.as_bytes())?;
        self.store
            .set_bytes(keys::KEY_CHECK, &self.crypto.key_check(key))?;
        Ok(())
    }

    fn resting_state(&self) -> AuthResult<AuthState> {
        match self.require_configured() {
            Ok(_) => Ok(AuthState::Locked {
                failed_attempts: self.failed_attempts()?,
                lockout_until: self.lockout_until()?,
            }),
            Err(AuthError::NotConfigured) => Ok(AuthState::NotConfigured),
            Err(e) => Err(e),
        }
    }

    /// Infrastructure failures show up as `Error`; credential mistakes
    /// already published `Locked`.
    fn observe<T>(&self, result: AuthResult<T>) -> AuthResult<T> {
        if let Err(
            e @ (AuthError::StorageError(_)
            | AuthError::KeyDerivationError(_)
            | AuthError::RemoteError(_)),
        ) = &result
        {
            tracing::error!(error = %e, "auth failed");
            self.publish(AuthState::Error { cause: e.clone() });
        }
        result
    }

    fn publish(&self, state: AuthState) {
        self.state_tx.send_replace(state);
    }
}

/// A six-digit numeric PIN and a non-empty password.
pub fn validate_credentials(password: &SecretString, pin: &SecretString) -> AuthResult<()> {
    if password.expose_secret().is_empty() {
        return Err(AuthError::SetupValidationError(
            "password must not be empty".into(),
        ));
    }
    let pin = pin.expose_secret();
    if pin.len() != PIN_LENGTH || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AuthError::SetupValidationError(format!(
            "PIN must be exactly {PIN_LENGTH} digits"
        )));
    }
    Ok(())
}
