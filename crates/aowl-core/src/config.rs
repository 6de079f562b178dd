use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AowlError, AowlResult};

/// Top-level configuration (loaded from aowl.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AowlConfig {
    pub remote: RemoteConfig,
    pub crypto: CryptoConfig,
    pub auth: AuthConfig,
    pub retention: RetentionConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

impl AowlConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &Path) -> AowlResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| AowlError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Git-hosting contents API coordinates and HTTP behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// API base URL (default: https://api.github.com)
    pub api_url: String,
    /// Repository owner (user or organisation)
    pub owner: String,
    /// Repository holding the vault
    pub repo: String,
    /// Branch all reads and writes target
    pub branch: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    /// Linear backoff unit: attempt N waits `base_delay_ms * N`
    pub base_delay_ms: u64,
    /// `remaining` at or below this counts as near the rate limit
    pub near_limit_threshold: u32,
    /// Refuse plaintext HTTP API URLs
    pub enforce_tls: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".into(),
            owner: String::new(),
            repo: String::new(),
            branch: "main".into(),
            timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 1000,
            near_limit_threshold: 10,
            enforce_tls: true,
        }
    }
}

/// Argon2id parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Memory cost in KiB (default: 49152 = 48 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub argon2_time_cost: u32,
    /// Parallelism (default: 2)
    pub argon2_parallelism: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 49152,
            argon2_time_cost: 3,
            argon2_parallelism: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Consecutive failures before lockout
    pub max_failed_attempts: u32,
    /// Lockout duration in seconds (default: 900 = 15 min)
    pub lockout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum expired entries deleted per cleanup run
    pub batch_limit: usize,
    /// Spawn a cleanup run after every successful sync
    pub run_after_sync: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            run_after_sync: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for the local index backup and sync markers
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/aowl/cache"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
