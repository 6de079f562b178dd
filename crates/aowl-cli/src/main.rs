//! aowl: encrypted vault CLI
//!
//! Vault lifecycle:
//!   setup               - create a vault, or join one from another device
//!   unlock              - re-derive the key from the password (after a reset
//!                         of the cached key or a forgotten PIN lockout)
//!   lock | reset --yes  - drop the session / wipe local credentials
//!
//! Entries:
//!   sync (list)                      - pull the index and list entries
//!   share --label L --text T|--file F [--retention P]
//!   get <id> [--out F]               - decrypt one entry
//!   delete <id>...                   - delete one or more entries
//!   retention <id> <period|never>    - change an entry's retention
//!
//! Maintenance:
//!   cleanup | gc | status | config show

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use aowl_core::config::{expand_home, AowlConfig};
use aowl_core::{EntryType, RetentionPeriod, VaultEntry};
use aowl_crypto::{CryptoFacade, KdfParams, MasterKey, OsRandom};
use aowl_secrets::{
    keychain, keys, AuthError, AuthGate, AuthState, KeychainStore, LockoutPolicy,
    RemoteCredentials, SecureCredentialStore,
};
use aowl_storage::{RemoteStorageClient, VaultBlobStore};
use aowl_sync::cache::LAST_SYNC_KEY;
use aowl_sync::{
    CleanupReport, EngineOptions, FileCache, LocalCache, SyncError, VaultSyncEngine,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "aowl",
    version,
    about = "End-to-end encrypted vault synced through a Git hosting repository"
)]
struct Cli {
    /// Path to aowl.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "AOWL_CONFIG",
        default_value = "~/.config/aowl/config.toml"
    )]
    config: PathBuf,

    /// Log format (overrides [log] format)
    #[arg(long, env = "AOWL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Keychain service name; use a different one per vault
    #[arg(long, env = "AOWL_KEYCHAIN_SERVICE", default_value = keychain::SERVICE_NAME)]
    keychain_service: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault or join an existing one
    Setup {
        /// Remote API token to remember in the keychain
        #[arg(long, env = "AOWL_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Unlock with the password and re-cache the master key
    Unlock,

    /// Pull the remote index and list entries
    #[command(alias = "list")]
    Sync,

    /// Encrypt and upload a new entry
    Share {
        #[arg(long, short = 'l')]
        label: String,
        /// Text content
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,
        /// File to upload (images are detected by extension)
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
        /// one_minute|one_hour|one_day|one_week|one_month|one_year (or 1m, 1h, 1d, 1w, 30d, 365d)
        #[arg(long, short = 'r')]
        retention: Option<RetentionPeriod>,
    },

    /// Decrypt an entry to stdout or a file
    Get {
        id: Uuid,
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Delete entries and their blobs
    Delete {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },

    /// Change how long an entry is kept
    Retention {
        id: Uuid,
        /// A retention period, or "never"
        period: String,
    },

    /// Delete expired entries now
    Cleanup,

    /// Delete blobs no index entry references
    Gc,

    /// Show auth, remote and sync status
    Status,

    /// End the session; the next command needs the PIN
    Lock,

    /// Wipe every local credential for this vault (remote data is kept)
    Reset {
        #[arg(long)]
        yes: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_home(&cli.config);
    let config = AowlConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&config.log.level, &format);

    let service = cli.keychain_service;
    let open = || Vault::open(config.clone(), &service);

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
        Commands::Setup { token } => cmd_setup(&config, &service, token).await,
        Commands::Unlock => cmd_unlock(&open()?).await,
        Commands::Sync => cmd_sync(&open()?).await,
        Commands::Share {
            label,
            text,
            file,
            retention,
        } => cmd_share(&open()?, &label, text, file.as_deref(), retention).await,
        Commands::Get { id, out } => cmd_get(&open()?, &id, out.as_deref()).await,
        Commands::Delete { ids } => cmd_delete(&open()?, &ids).await,
        Commands::Retention { id, period } => cmd_retention(&open()?, &id, &period).await,
        Commands::Cleanup => cmd_cleanup(&open()?).await,
        Commands::Gc => cmd_gc(&open()?).await,
        Commands::Status => cmd_status(&open()?).await,
        Commands::Lock => cmd_lock(&open()?).await,
        Commands::Reset { yes } => cmd_reset(&open()?, yes).await,
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Vault wiring ──────────────────────────────────────────────────────────────

struct Vault {
    config: AowlConfig,
    creds: Arc<KeychainStore>,
    blobs: VaultBlobStore,
    crypto: CryptoFacade,
    gate: AuthGate,
}

impl Vault {
    fn open(config: AowlConfig, service: &str) -> Result<Self> {
        let creds = Arc::new(KeychainStore::new(service));
        let token = RemoteCredentials::load(creds.as_ref())?.context(
            "remote token not set\n\
             Run `aowl setup --token <token>` or set AOWL_TOKEN.",
        )?;
        tracing::debug!(source = %token.source, "loaded remote token");

        let client = RemoteStorageClient::new(&config.remote, &token.token)
            .context("building remote client")?;
        let blobs = VaultBlobStore::new(Arc::new(client));
        let crypto = CryptoFacade::new(Arc::new(OsRandom), kdf_params(&config));
        let gate = AuthGate::new(
            creds.clone(),
            blobs.clone(),
            crypto.clone(),
            LockoutPolicy::from(&config.auth),
        )
        .context("reading local credentials")?;

        Ok(Self {
            config,
            creds,
            blobs,
            crypto,
            gate,
        })
    }

    fn cache(&self) -> FileCache {
        FileCache::new(expand_home(&self.config.cache.dir))
    }

    /// PIN first; fall back to the password when this device has no key.
    async fn unlock(&self) -> Result<MasterKey> {
        let pin = read_secret("AOWL_PIN", "PIN: ")?;
        match self.gate.unlock_with_pin(&pin).await {
            Ok(key) => Ok(key),
            Err(AuthError::PasswordRequired) => {
                eprintln!("No cached key on this device; password required.");
                let password = read_secret("AOWL_PASSWORD", "Password: ")?;
                let spinner = make_spinner("unlock");
                spinner.set_message("deriving key...");
                let result = self.gate.unlock_with_password(&password, &pin).await;
                spinner.finish_and_clear();
                result.context("unlocking with password")
            }
            Err(e) => Err(e).context("unlocking with PIN"),
        }
    }

    /// Unlock, build an engine, and pull the index.
    async fn synced_engine(&self, cleanup_after_sync: bool) -> Result<Arc<VaultSyncEngine>> {
        let key = self.unlock().await?;
        let mut options = EngineOptions::from_config(&self.config);
        options.cleanup_after_sync = cleanup_after_sync;

        let engine = Arc::new(VaultSyncEngine::new(
            self.blobs.clone(),
            self.crypto.clone(),
            key,
            Arc::new(self.cache()),
            options,
        ));
        engine.sync().await.context("syncing vault index")?;
        Ok(engine)
    }
}

fn kdf_params(config: &AowlConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: config.crypto.argon2_mem_cost_kib,
        time_cost: config.crypto.argon2_time_cost,
        parallelism: config.crypto.argon2_parallelism,
    }
}

/// Read a secret from `env_var`, or prompt without echo.
fn read_secret(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(SecretString::from(value));
        }
    }
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    Ok(SecretString::from(value))
}

fn read_new_secret(env_var: &str, prompt: &str) -> Result<SecretString> {
    if std::env::var(env_var).is_ok_and(|v| !v.is_empty()) {
        return read_secret(env_var, prompt);
    }
    let first = read_secret(env_var, prompt)?;
    let again = rpassword::prompt_password("Repeat: ").context("reading from terminal")?;
    if first.expose_secret() != again.as_str() {
        anyhow::bail!("entries did not match");
    }
    Ok(first)
}

/// After a conflict: pull the winner, then merge our rejected change into it.
async fn resolve_conflict(engine: &Arc<VaultSyncEngine>) -> Result<()> {
    eprintln!("Remote index changed underneath us; merging...");
    engine.sync().await.context("re-syncing after conflict")?;
    engine
        .resubmit_pending()
        .await
        .context("resubmitting after conflict")?;
    Ok(())
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `aowl setup` / `aowl unlock` ──────────────────────────────────────────────

async fn cmd_setup(config: &AowlConfig, service: &str, token: Option<String>) -> Result<()> {
    let creds = KeychainStore::new(service);
    if let Some(token) = token {
        RemoteCredentials::save(&creds, &SecretString::from(token))
            .context("saving remote token")?;
    }
    let vault = Vault::open(config.clone(), service)?;
    vault.creds.set(
        keys::REMOTE_REPO,
        &SecretString::from(format!(
            "{}/{}",
            config.remote.owner, config.remote.repo
        )),
    )?;

    let password = read_new_secret("AOWL_PASSWORD", "Vault password: ")?;
    let pin = read_new_secret("AOWL_PIN", "6-digit PIN: ")?;

    let spinner = make_spinner("setup");
    spinner.set_message("deriving key...");
    let result = vault.gate.setup_vault(&password, &pin).await;
    spinner.finish_and_clear();
    result.context("setting up vault")?;

    println!(
        "Vault ready: {}/{} ({})",
        config.remote.owner, config.remote.repo, config.remote.branch
    );
    Ok(())
}

async fn cmd_unlock(vault: &Vault) -> Result<()> {
    let password = read_secret("AOWL_PASSWORD", "Password: ")?;
    let pin = read_secret("AOWL_PIN", "PIN: ")?;

    let spinner = make_spinner("unlock");
    spinner.set_message("deriving key...");
    let result = vault.gate.unlock_with_password(&password, &pin).await;
    spinner.finish_and_clear();
    result.context("unlocking with password")?;

    println!("Unlocked; PIN unlock is available again.");
    Ok(())
}

// ── `aowl sync` ───────────────────────────────────────────────────────────────

async fn cmd_sync(vault: &Vault) -> Result<()> {
    let engine = vault.synced_engine(vault.config.retention.run_after_sync).await?;
    let entries = engine.entries().await?;

    if entries.is_empty() {
        println!("Vault is empty.");
    } else {
        print_entries(&entries);
    }

    if let Some(handle) = engine.take_cleanup_handle() {
        let report = handle.await.context("retention cleanup task")?;
        if report.expired_total > 0 {
            print_cleanup(&report);
        }
    }
    Ok(())
}

fn print_entries(entries: &[VaultEntry]) {
    println!(
        "{:<36}  {:<5}  {:>9}  {:<20}  LABEL",
        "ID", "TYPE", "SIZE", "EXPIRES"
    );
    for entry in entries {
        let expires = entry
            .expires_at()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into());
        println!(
            "{:<36}  {:<5}  {:>9}  {:<20}  {}",
            entry.id,
            entry.entry_type.to_string(),
            fmt_bytes(entry.size_bytes),
            expires,
            entry.label
        );
    }
}

// ── `aowl share` / `aowl get` ─────────────────────────────────────────────────

async fn cmd_share(
    vault: &Vault,
    label: &str,
    text: Option<String>,
    file: Option<&Path>,
    retention: Option<RetentionPeriod>,
) -> Result<()> {
    let (entry_type, mime, content) = match (text, file) {
        (Some(text), _) => (EntryType::Text, Some("text/plain".to_string()), text.into_bytes()),
        (None, Some(path)) => {
            let content = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let (entry_type, mime) = detect_type(path);
            (entry_type, Some(mime.to_string()), content)
        }
        (None, None) => anyhow::bail!("one of --text or --file is required"),
    };

    let engine = vault.synced_engine(false).await?;
    let spinner = make_spinner("share");
    spinner.set_message(format!("encrypting {}", fmt_bytes(content.len() as u64)));
    let result = engine
        .share_entry(entry_type, label, &content, mime, retention)
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(entry) => println!("Shared {} ({})", entry.id, entry.label),
        Err(SyncError::Conflict) => {
            resolve_conflict(&engine).await?;
            println!("Shared {label} (merged with concurrent changes)");
        }
        Err(e) => return Err(e).context("sharing entry"),
    }
    Ok(())
}

fn detect_type(path: &Path) -> (EntryType, &'static str) {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => (EntryType::Image, "image/png"),
        "jpg" | "jpeg" => (EntryType::Image, "image/jpeg"),
        "gif" => (EntryType::Image, "image/gif"),
        "webp" => (EntryType::Image, "image/webp"),
        "heic" => (EntryType::Image, "image/heic"),
        "md" => (EntryType::Text, "text/markdown"),
        _ => (EntryType::Text, "text/plain"),
    }
}

async fn cmd_get(vault: &Vault, id: &Uuid, out: Option<&Path>) -> Result<()> {
    let engine = vault.synced_engine(false).await?;
    let content = engine
        .read_entry(id)
        .await
        .with_context(|| format!("reading entry {id}"))?;

    match out {
        Some(path) => {
            tokio::fs::write(path, &content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {} to {}", fmt_bytes(content.len() as u64), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content).context("writing to stdout")?;
            stdout.flush()?;
        }
    }
    Ok(())
}

// ── `aowl delete` / `aowl retention` ──────────────────────────────────────────

async fn cmd_delete(vault: &Vault, ids: &[Uuid]) -> Result<()> {
    let engine = vault.synced_engine(false).await?;

    if let [id] = ids {
        match engine.delete_entry(id).await {
            Ok(()) => println!("Deleted {id}"),
            Err(SyncError::Conflict) => {
                resolve_conflict(&engine).await?;
                println!("Deleted {id} (merged with concurrent changes)");
            }
            Err(e) => return Err(e).with_context(|| format!("deleting {id}")),
        }
        return Ok(());
    }

    let report = match engine.delete_entries(ids).await {
        Ok(report) => report,
        Err(SyncError::Conflict) => {
            resolve_conflict(&engine).await?;
            println!("Deleted entries (merged with concurrent changes)");
            return Ok(());
        }
        Err(e) => return Err(e).context("deleting entries"),
    };
    println!("Deleted {} entries", report.deleted.len());
    for (id, err) in &report.failed {
        println!("  failed   {id}: {err}");
    }
    for id in &report.deferred {
        println!("  deferred {id} (rate limit)");
    }
    Ok(())
}

async fn cmd_retention(vault: &Vault, id: &Uuid, period: &str) -> Result<()> {
    let period = match period {
        "never" | "none" => None,
        other => Some(other.parse::<RetentionPeriod>()?),
    };
    let engine = vault.synced_engine(false).await?;

    match engine.change_retention(id, period).await {
        Ok(entry) => {
            let expires = entry
                .expires_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into());
            println!("{} now expires: {expires}", entry.id);
        }
        Err(SyncError::Conflict) => {
            resolve_conflict(&engine).await?;
            println!("Retention updated (merged with concurrent changes)");
        }
        Err(e) => return Err(e).with_context(|| format!("changing retention of {id}")),
    }
    Ok(())
}

// ── Maintenance ───────────────────────────────────────────────────────────────

async fn cmd_cleanup(vault: &Vault) -> Result<()> {
    let engine = vault.synced_engine(false).await?;
    let report = engine.run_retention_cleanup().await;
    print_cleanup(&report);
    match report.error {
        Some(e) => Err(e).context("retention cleanup"),
        None => Ok(()),
    }
}

fn print_cleanup(report: &CleanupReport) {
    println!("Retention cleanup:");
    println!("  expired:  {}", report.expired_total);
    println!("  deleted:  {}", report.deleted);
    println!("  failed:   {}", report.failed);
    println!("  deferred: {}", report.deferred);
}

async fn cmd_gc(vault: &Vault) -> Result<()> {
    let engine = vault.synced_engine(false).await?;
    let report = engine.collect_orphans().await.context("collecting orphans")?;

    println!("Scanned {} blobs", report.scanned);
    for name in &report.deleted {
        println!("  removed  {name}");
    }
    for (name, err) in &report.failed {
        println!("  failed   {name}: {err}");
    }
    Ok(())
}

async fn cmd_status(vault: &Vault) -> Result<()> {
    println!(
        "remote:     {} ({}/{} @ {})",
        vault.config.remote.api_url,
        vault.config.remote.owner,
        vault.config.remote.repo,
        vault.config.remote.branch
    );

    match vault.gate.state() {
        AuthState::NotConfigured => println!("auth:       not set up (run `aowl setup`)"),
        AuthState::Locked {
            failed_attempts,
            lockout_until: Some(until),
        } => println!("auth:       locked out until {until} ({failed_attempts} failures)"),
        AuthState::Locked {
            failed_attempts, ..
        } => println!("auth:       locked ({failed_attempts} failed attempts)"),
        AuthState::Unlocked => println!("auth:       unlocked"),
        AuthState::Error { cause } => println!("auth:       error: {cause}"),
    }

    match aowl_storage::check_health(vault.blobs.remote().as_ref()).await {
        Ok(()) => println!("reachable:  yes"),
        Err(e) => println!("reachable:  no ({e:#})"),
    }

    let limit = vault.blobs.rate_limit();
    if let Some(remaining) = limit.remaining {
        let reset = limit
            .reset_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "?".into());
        println!(
            "rate limit: {remaining}/{} (resets {reset})",
            limit.limit.map(|l| l.to_string()).unwrap_or_else(|| "?".into())
        );
    }

    let last_sync = vault
        .cache()
        .get(LAST_SYNC_KEY)
        .ok()
        .flatten()
        .map(|raw| String::from_utf8_lossy(&raw).into_owned())
        .unwrap_or_else(|| "never".into());
    println!("last sync:  {last_sync}");
    Ok(())
}

async fn cmd_lock(vault: &Vault) -> Result<()> {
    vault.gate.lock().await?;
    println!("Locked. The PIN unlocks the next command.");
    Ok(())
}

async fn cmd_reset(vault: &Vault, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "reset wipes this device's keys and token; remote data is kept.\n\
             Re-run with --yes to confirm."
        );
    }
    vault.gate.reset_vault().await?;

    let cache = vault.cache();
    for key in [aowl_sync::cache::INDEX_BACKUP_KEY, LAST_SYNC_KEY] {
        if let Err(e) = cache.delete(key) {
            tracing::warn!(key, "could not clear cache entry: {e:#}");
        }
    }
    println!("Local vault credentials wiped.");
    Ok(())
}

// ── `aowl config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &AowlConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    let rendered = toml::to_string_pretty(config).context("rendering config")?;
    print!("{rendered}");
    Ok(())
}

// ── Formatting ────────────────────────────────────────────────────────────────

fn fmt_bytes(n: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match n {
        n if n >= GB => format!("{:.1} GiB", n as f64 / GB as f64),
        n if n >= MB => format!("{:.1} MiB", n as f64 / MB as f64),
        n if n >= KB => format!("{:.1} KiB", n as f64 / KB as f64),
        n => format!("{n} B"),
    }
}
