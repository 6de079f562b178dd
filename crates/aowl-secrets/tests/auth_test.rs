//! Unlock gate scenarios against the in-memory remote and credential store.

use std::sync::Arc;

use aowl_core::clock::ManualClock;
use aowl_core::VaultConfig;
use aowl_crypto::{CryptoFacade, KdfParams, OsRandom};
use aowl_secrets::{
    keys, AuthError, AuthGate, AuthState, LockoutPolicy, MemoryCredentialStore,
    SecureCredentialStore,
};
use aowl_storage::{MemoryStore, VaultBlobStore};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};

const PASSWORD: &str = "correct horse battery staple";
const PIN: &str = "424242";

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

fn crypto() -> CryptoFacade {
    CryptoFacade::new(Arc::new(OsRandom), KdfParams::insecure_fast())
}

struct Device {
    gate: AuthGate,
    creds: Arc<MemoryCredentialStore>,
}

fn device(remote: &Arc<MemoryStore>, clock: &Arc<ManualClock>) -> Device {
    device_with_store(remote, clock, Arc::new(MemoryCredentialStore::new()))
}

fn device_with_store(
    remote: &Arc<MemoryStore>,
    clock: &Arc<ManualClock>,
    creds: Arc<MemoryCredentialStore>,
) -> Device {
    let gate = AuthGate::with_clock(
        creds.clone(),
        VaultBlobStore::new(remote.clone()),
        crypto(),
        LockoutPolicy::default(),
        clock.clone(),
    )
    .unwrap();
    Device { gate, creds }
}

fn fixture() -> (Arc<MemoryStore>, Arc<ManualClock>) {
    (
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(t0())),
    )
}

#[tokio::test]
async fn test_setup_creates_config_and_unlocks() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    assert_eq!(dev.gate.state(), AuthState::NotConfigured);

    let key = dev
        .gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();

    assert_eq!(dev.gate.state(), AuthState::Unlocked);
    assert_eq!(
        dev.gate.master_key().await.unwrap().as_bytes(),
        key.as_bytes()
    );
    for k in [keys::SALT, keys::PIN_HASH, keys::MASTER_KEY, keys::KEY_CHECK] {
        assert!(dev.creds.contains(k), "{k} should be stored");
    }

    let config = VaultBlobStore::new(remote.clone())
        .fetch_config()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(config.created_at, t0());
    assert!(config.verifier.is_some());
    assert_eq!(
        dev.creds.get_bytes(keys::SALT).unwrap().unwrap().as_slice(),
        config.salt.as_slice()
    );
}

#[tokio::test]
async fn test_setup_rejects_bad_pin_without_touching_remote() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);

    let err = dev
        .gate
        .setup_vault(&secret(PASSWORD), &secret("12345"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SetupValidationError(_)));
    assert_eq!(remote.write_count(), 0);
    assert_eq!(dev.gate.state(), AuthState::NotConfigured);
}

#[tokio::test]
async fn test_setup_reuses_existing_salt() {
    let (remote, clock) = fixture();
    let blobs = VaultBlobStore::new(remote.clone());
    blobs
        .create_config(&VaultConfig::new(vec![9u8; 16], t0()))
        .await
        .unwrap();

    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();

    assert_eq!(
        dev.creds.get_bytes(keys::SALT).unwrap().unwrap().as_slice(),
        &[9u8; 16]
    );
    assert_eq!(remote.write_count(), 1);
}

#[tokio::test]
async fn test_second_device_joins_with_same_key() {
    let (remote, clock) = fixture();
    let first = device(&remote, &clock);
    let key = first
        .gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();

    let writes = remote.write_count();

    // nothing has been shared yet, so only the config can vouch for the key
    let second = device(&remote, &clock);
    let err = second
        .gate
        .setup_vault(&secret("wrong password"), &secret(PIN))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::WrongPasswordError(_)));
    for k in keys::ALL {
        assert!(!second.creds.contains(k), "{k} should not be stored");
    }
    assert_eq!(second.gate.state(), AuthState::NotConfigured);
    assert_eq!(remote.write_count(), writes);

    let joined = second
        .gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    assert_eq!(joined.as_bytes(), key.as_bytes());
}

#[tokio::test]
async fn test_join_without_verifier_checks_index() {
    let (remote, clock) = fixture();
    let blobs = VaultBlobStore::new(remote.clone());
    let salt = vec![9u8; 16];
    blobs
        .create_config(&VaultConfig::new(salt.clone(), t0()))
        .await
        .unwrap();
    let key = crypto()
        .derive_key(&secret(PASSWORD), &secret(PIN), &salt)
        .unwrap();
    let sealed = crypto().seal(b"{\"version\":1}", &key).unwrap();
    blobs.upload_index(&sealed, None).await.unwrap();

    let dev = device(&remote, &clock);
    let err = dev
        .gate
        .setup_vault(&secret("wrong password"), &secret(PIN))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::WrongPasswordError(_)));

    let joined = dev
        .gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    assert_eq!(joined.as_bytes(), key.as_bytes());
}

#[tokio::test]
async fn test_wrong_pin_ends_session() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    assert!(dev.gate.master_key().await.is_some());

    let err = dev.gate.unlock_with_pin(&secret("000000")).await.unwrap_err();
    assert_eq!(err, AuthError::WrongPinError(4));
    assert!(dev.gate.master_key().await.is_none());
    assert_eq!(
        dev.gate.state(),
        AuthState::Locked {
            failed_attempts: 1,
            lockout_until: None,
        }
    );

    dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap();
    assert!(dev.gate.master_key().await.is_some());

    let err = dev
        .gate
        .unlock_with_password(&secret("not it"), &secret(PIN))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::WrongPasswordError(4));
    assert!(dev.gate.master_key().await.is_none());
    assert!(!dev.gate.state().is_unlocked());
}

#[tokio::test]
async fn test_lockout_rejection_ends_session() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    assert!(dev.gate.master_key().await.is_some());

    // another process on this device tripped the lockout
    let until = t0() + Duration::minutes(15);
    dev.creds
        .set(keys::FAILED_ATTEMPTS, &secret("5"))
        .unwrap();
    dev.creds
        .set(keys::LOCKOUT_UNTIL, &secret(&until.to_rfc3339()))
        .unwrap();

    let err = dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap_err();
    assert_eq!(err, AuthError::LockedOutError(Duration::minutes(15)));
    assert!(dev.gate.master_key().await.is_none());
    assert_eq!(
        dev.gate.state(),
        AuthState::Locked {
            failed_attempts: 5,
            lockout_until: Some(until),
        }
    );
}

#[tokio::test]
async fn test_pin_lockout_after_five_failures() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    dev.gate.lock().await.unwrap();
    assert!(dev.gate.master_key().await.is_none());

    for remaining in [4, 3, 2, 1] {
        let err = dev.gate.unlock_with_pin(&secret("000000")).await.unwrap_err();
        assert_eq!(err, AuthError::WrongPinError(remaining));
    }

    let err = dev.gate.unlock_with_pin(&secret("000000")).await.unwrap_err();
    assert_eq!(err, AuthError::LockedOutError(Duration::minutes(15)));
    assert_eq!(
        dev.gate.state(),
        AuthState::Locked {
            failed_attempts: 5,
            lockout_until: Some(t0() + Duration::minutes(15)),
        }
    );

    // even the right PIN is refused, and no attempt is consumed
    clock.advance(Duration::minutes(5));
    let err = dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap_err();
    assert_eq!(err, AuthError::LockedOutError(Duration::minutes(10)));
    assert_eq!(
        dev.creds
            .get(keys::FAILED_ATTEMPTS)
            .unwrap()
            .unwrap()
            .expose_secret(),
        "5"
    );

    clock.advance(Duration::minutes(10));
    dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap();
    assert_eq!(dev.gate.state(), AuthState::Unlocked);
    assert!(!dev.creds.contains(keys::FAILED_ATTEMPTS));
    assert!(!dev.creds.contains(keys::LOCKOUT_UNTIL));
}

#[tokio::test]
async fn test_expired_lockout_resets_counter() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();

    for _ in 0..5 {
        let _ = dev.gate.unlock_with_pin(&secret("111111")).await;
    }
    clock.advance(Duration::minutes(16));

    let err = dev.gate.unlock_with_pin(&secret("111111")).await.unwrap_err();
    assert_eq!(err, AuthError::WrongPinError(4));
}

#[tokio::test]
async fn test_success_resets_counter() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();

    for _ in 0..3 {
        let _ = dev.gate.unlock_with_pin(&secret("999999")).await;
    }
    dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap();

    let err = dev.gate.unlock_with_pin(&secret("999999")).await.unwrap_err();
    assert_eq!(err, AuthError::WrongPinError(4));
}

#[tokio::test]
async fn test_lockout_survives_restart() {
    let (remote, clock) = fixture();
    let creds = Arc::new(MemoryCredentialStore::new());
    let dev = device_with_store(&remote, &clock, creds.clone());
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    for _ in 0..5 {
        let _ = dev.gate.unlock_with_pin(&secret("000000")).await;
    }
    drop(dev);

    let restarted = device_with_store(&remote, &clock, creds);
    assert_eq!(
        restarted.gate.state(),
        AuthState::Locked {
            failed_attempts: 5,
            lockout_until: Some(t0() + Duration::minutes(15)),
        }
    );
    assert!(matches!(
        restarted.gate.unlock_with_pin(&secret(PIN)).await,
        Err(AuthError::LockedOutError(_))
    ));
}

#[tokio::test]
async fn test_password_unlock_and_wrong_password_counts() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    let key = dev
        .gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    dev.gate.lock().await.unwrap();

    let err = dev
        .gate
        .unlock_with_password(&secret("not it"), &secret(PIN))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::WrongPasswordError(4));

    // a wrong PIN on the password path shares the same counter
    let err = dev
        .gate
        .unlock_with_password(&secret(PASSWORD), &secret("000000"))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::WrongPinError(3));

    let unlocked = dev
        .gate
        .unlock_with_password(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    assert_eq!(unlocked.as_bytes(), key.as_bytes());
    assert_eq!(dev.gate.state(), AuthState::Unlocked);
}

#[tokio::test]
async fn test_pin_without_cached_key_requires_password() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    dev.gate.lock().await.unwrap();
    dev.creds.delete(keys::MASTER_KEY).unwrap();

    let err = dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap_err();
    assert_eq!(err, AuthError::PasswordRequired);

    dev.gate
        .unlock_with_password(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    assert!(dev.creds.contains(keys::MASTER_KEY));

    dev.gate.lock().await.unwrap();
    dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap();
}

#[tokio::test]
async fn test_failed_reauthentication_ends_session() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    assert!(dev.gate.master_key().await.is_some());

    let err = dev
        .gate
        .reauthenticate(&secret("guess"), &secret(PIN))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::WrongPasswordError(4));
    assert!(dev.gate.master_key().await.is_none());
    assert!(!dev.gate.state().is_unlocked());
}

#[tokio::test]
async fn test_reset_wipes_local_credentials_only() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();

    dev.gate.reset_vault().await.unwrap();

    assert_eq!(dev.gate.state(), AuthState::NotConfigured);
    assert!(dev.gate.master_key().await.is_none());
    for k in keys::ALL {
        assert!(!dev.creds.contains(k), "{k} should be wiped");
    }
    assert_eq!(
        dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap_err(),
        AuthError::NotConfigured
    );
    assert!(VaultBlobStore::new(remote.clone())
        .fetch_config()
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_unavailable_store_is_storage_error() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    dev.creds.set_unavailable(true);

    assert!(matches!(
        dev.gate.unlock_with_pin(&secret(PIN)).await,
        Err(AuthError::StorageError(_))
    ));
    assert!(matches!(
        dev.gate.state(),
        AuthState::Error {
            cause: AuthError::StorageError(_)
        }
    ));

    dev.creds.set_unavailable(false);
    dev.gate.unlock_with_pin(&secret(PIN)).await.unwrap();
    assert_eq!(dev.gate.state(), AuthState::Unlocked);
}

#[tokio::test]
async fn test_state_is_observable() {
    let (remote, clock) = fixture();
    let dev = device(&remote, &clock);
    let mut rx = dev.gate.subscribe();

    dev.gate
        .setup_vault(&secret(PASSWORD), &secret(PIN))
        .await
        .unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), AuthState::Unlocked);

    dev.gate.lock().await.unwrap();
    rx.changed().await.unwrap();
    assert!(matches!(
        *rx.borrow_and_update(),
        AuthState::Locked {
            failed_attempts: 0,
            ..
        }
    ));
}
