pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AowlError, AowlResult};
pub use types::{EntryType, RetentionPeriod, VaultConfig, VaultEntry};

/// Remote namespace every vault object lives under
pub const VAULT_PREFIX: &str = ".aowl";
