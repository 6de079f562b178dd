use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AowlError, AowlResult};

/// Current `config.json` schema version
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Minimum KDF salt length accepted anywhere in the vault
pub const MIN_SALT_LEN: usize = 16;

/// Kind of content an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Text,
    Image,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::Text => f.write_str("text"),
            EntryType::Image => f.write_str("image"),
        }
    }
}

/// How long an entry lives after creation. Absent means "never expires".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPeriod {
    OneMinute,
    OneHour,
    OneDay,
    OneWeek,
    /// 30 days
    OneMonth,
    /// 365 days
    OneYear,
}

impl RetentionPeriod {
    pub const ALL: [RetentionPeriod; 6] = [
        RetentionPeriod::OneMinute,
        RetentionPeriod::OneHour,
        RetentionPeriod::OneDay,
        RetentionPeriod::OneWeek,
        RetentionPeriod::OneMonth,
        RetentionPeriod::OneYear,
    ];

    pub fn as_duration(&self) -> Duration {
        match self {
            RetentionPeriod::OneMinute => Duration::minutes(1),
            RetentionPeriod::OneHour => Duration::hours(1),
            RetentionPeriod::OneDay => Duration::days(1),
            RetentionPeriod::OneWeek => Duration::weeks(1),
            RetentionPeriod::OneMonth => Duration::days(30),
            RetentionPeriod::OneYear => Duration::days(365),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPeriod::OneMinute => "one_minute",
            RetentionPeriod::OneHour => "one_hour",
            RetentionPeriod::OneDay => "one_day",
            RetentionPeriod::OneWeek => "one_week",
            RetentionPeriod::OneMonth => "one_month",
            RetentionPeriod::OneYear => "one_year",
        }
    }
}

impl fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionPeriod {
    type Err = AowlError;

    /// Accepts the serialized names (`one_day`) and short forms (`1d`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one_minute" | "1m" => Ok(RetentionPeriod::OneMinute),
            "one_hour" | "1h" => Ok(RetentionPeriod::OneHour),
            "one_day" | "1d" => Ok(RetentionPeriod::OneDay),
            "one_week" | "1w" => Ok(RetentionPeriod::OneWeek),
            "one_month" | "30d" => Ok(RetentionPeriod::OneMonth),
            "one_year" | "365d" => Ok(RetentionPeriod::OneYear),
            other => Err(AowlError::Config(format!(
                "unknown retention period '{other}' (expected one of: {})",
                RetentionPeriod::ALL.map(|p| p.as_str()).join(", ")
            ))),
        }
    }
}

/// One item in the vault catalog.
///
/// `id` never changes once assigned, and `updated_at` never precedes
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Content hash of the uploaded blob, set once the upload succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<String>,
    /// Entries written before retention existed carry no period
    #[serde(default)]
    pub retention_period: Option<RetentionPeriod>,
}

impl VaultEntry {
    /// Create a fresh entry with a random v4 id.
    pub fn new(
        entry_type: EntryType,
        label: impl Into<String>,
        mime_type: Option<String>,
        size_bytes: u64,
        retention_period: Option<RetentionPeriod>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_type,
            label: label.into(),
            mime_type,
            created_at: now,
            updated_at: now,
            size_bytes,
            remote_version: None,
            retention_period,
        }
    }

    /// Expiry instant, always measured from `created_at`.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.retention_period
            .map(|period| self.created_at + period.as_duration())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now > expires)
    }

    /// Copy with a new retention period and a bumped `updated_at`.
    pub fn with_retention(&self, period: Option<RetentionPeriod>, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.retention_period = period;
        next.touch(now);
        next
    }

    /// Bump `updated_at`, never moving it before `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    /// File name of the entry's blob under `data/`
    pub fn blob_name(&self) -> String {
        blob_name(&self.id)
    }
}

pub fn blob_name(id: &Uuid) -> String {
    format!("{id}.enc")
}

/// Plaintext per-vault parameters stored as `config.json`.
///
/// The salt is not secret; it only has to be shared by every device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(rename = "version")]
    pub schema_version: u32,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Known plaintext sealed under the vault key, so a joining device can
    /// check its password before any index exists. Older configs lack it.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub verifier: Option<Vec<u8>>,
}

impl VaultConfig {
    pub fn new(salt: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            salt,
            created_at: now,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Vec<u8>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn to_bytes(&self) -> AowlResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| AowlError::Serialization(format!("vault config: {e}")))
    }

    /// Parse `config.json`, rejecting salts shorter than [`MIN_SALT_LEN`].
    pub fn from_bytes(data: &[u8]) -> AowlResult<Self> {
        let config: VaultConfig = serde_json::from_slice(data)
            .map_err(|e| AowlError::Serialization(format!("vault config: {e}")))?;
        if config.salt.len() < MIN_SALT_LEN {
            return Err(AowlError::Serialization(format!(
                "vault config salt too short: {} bytes (minimum {MIN_SALT_LEN})",
                config.salt.len()
            )));
        }
        Ok(config)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
