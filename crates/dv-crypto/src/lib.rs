//! dv-crypto: dual-tier key management for DiaryVault
//!
//! Every user picks one tier at signup and keeps it forever:
//!
//! ```text
//! UCE (user-controlled)
//!   password ─ Argon2id(salt, params) ─> wrapping key
//!     └── wraps Master Key (256-bit random, ChaCha20-Poly1305)
//!           └── Record AEAD: ChaCha20-Poly1305 (key=master, nonce=random_96bit)
//!
//! E2E (end-to-end)
//!   X25519 keypair, secret stays on the device
//!     └── Record seal: ephemeral X25519 → HKDF-SHA256 → ChaCha20-Poly1305
//!   10 single-use recovery codes, stored as SHA-256 hashes
//! ```
//!
//! Stored record format: `base64(nonce || ciphertext || tag)`; E2E records
//! prefix the ephemeral public key. Content hashes are lowercase hex SHA-256.
//!
//! All functions are blocking and hold no shared state. Callers own I/O,
//! threading and timeouts.

pub mod cipher;
pub mod hash;
pub mod kdf;
pub mod recovery;
pub mod seal;
pub mod selftest;
pub mod session;
pub mod tier;
pub mod vault;

pub use cipher::{decrypt, encrypt, Sealed};
pub use hash::content_hash;
pub use kdf::{derive_key, generate_salt, DerivedKey};
pub use recovery::{generate_batch, hash_code, validate_and_consume, RecoveryLedger};
pub use seal::{open_self, seal_for_self, validate_public_key, KeyPair};
pub use selftest::{run_self_test, SelfTestReport};
pub use session::Session;
pub use tier::{E2eStrategy, TierRouter, TierStrategy, UceStrategy};
pub use vault::{create_vault, rewrap, unlock, MasterKey};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Minimum KDF salt length in bytes
pub const MIN_SALT_SIZE: usize = 16;

/// Salt length used for new vaults
pub const DEFAULT_SALT_SIZE: usize = 32;

/// Size of an X25519 public or private key
pub const X25519_KEY_SIZE: usize = 32;
