//! aowl-crypto: client-side encryption for the aowl vault
//!
//! Everything that leaves the device is sealed in a versioned AES-256-GCM
//! envelope under a key derived from password + PIN:
//!
//! ```text
//! password || PIN ──Argon2id(salt)──► master key (256-bit)
//!                                        │
//!        plaintext ──AES-256-GCM(random 96-bit IV, no AAD)──► envelope
//!
//! envelope = [format_version u32 LE][IV 12][ciphertext N][tag 16]
//! ```
//!
//! The PIN is also hashed (SHA-256, unsalted) for quick local unlock. That
//! hash is a convenience check only; the root of trust is the derived key.

pub mod cipher;
pub mod ct;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod kdf;
pub mod random;

pub use cipher::AeadCipher;
pub use envelope::EncryptedEnvelope;
pub use error::{CryptoError, CryptoResult};
pub use facade::CryptoFacade;
pub use kdf::{derive_key, KdfParams, MasterKey};
pub use random::{OsRandom, SecureRandom, SeededRandom};

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a KDF salt produced by [`CryptoFacade::generate_salt`]
pub const SALT_SIZE: usize = 16;

/// Envelope format version written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Smallest well-formed envelope: version + IV + empty ciphertext + tag
pub const MIN_ENVELOPE_SIZE: usize = 4 + IV_SIZE + TAG_SIZE;
