//! Remote health check

use anyhow::Result;

use aowl_core::VAULT_PREFIX;

use crate::store::RemoteStore;

/// Verify the remote is reachable and the token is accepted by listing the
/// vault prefix.
pub async fn check_health(store: &dyn RemoteStore) -> Result<()> {
    store
        .list(VAULT_PREFIX)
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("remote health check failed: {e}"))
}

/// Returns true if the remote is reachable, false otherwise (non-panicking)
pub async fn is_healthy(store: &dyn RemoteStore) -> bool {
    check_health(store).await.is_ok()
}
