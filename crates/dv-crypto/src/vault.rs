//! UCE master-key vault: generate, wrap, unlock, rewrap
//!
//! The master key encrypts every record a UCE user owns. It is wrapped by
//! an Argon2id key derived from the password, so a password change only
//! re-wraps 32 bytes instead of re-encrypting the diary.
//!
//! Wrapped format: `base64([12-byte nonce][32-byte encrypted key][16-byte tag])`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dv_core::types::{KdfParams, VaultRecord};
use dv_core::{DvError, DvResult};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::cipher::{self, Sealed};
use crate::kdf::{derive_key, generate_salt, DerivedKey};
use crate::KEY_SIZE;

/// A user's 256-bit master key.
///
/// Lives only in memory for one session or request and is zeroized on drop.
/// Not `Clone`.
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn wrap(wrapping_key: &DerivedKey, master: &MasterKey) -> DvResult<String> {
    cipher::encrypt(wrapping_key.as_bytes(), master.as_bytes(), None).map(|s| s.to_base64())
}

fn unwrap(wrapping_key: &DerivedKey, wrapped_b64: &str) -> DvResult<MasterKey> {
    let sealed =
        Sealed::from_base64(wrapped_b64).map_err(|_| DvError::InvalidPasswordOrCorruptVault)?;
    let mut plaintext = cipher::decrypt(wrapping_key.as_bytes(), &sealed, None)
        .map_err(|_| DvError::InvalidPasswordOrCorruptVault)?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(DvError::InvalidPasswordOrCorruptVault);
    }

    let mut key = MasterKey {
        bytes: [0u8; KEY_SIZE],
    };
    key.bytes.copy_from_slice(&plaintext);
    Ok(key)
}

fn decode_salt(record: &VaultRecord) -> DvResult<Vec<u8>> {
    STANDARD
        .decode(&record.salt)
        .map_err(|_| DvError::InvalidPasswordOrCorruptVault)
}

/// Create a vault for a new UCE user: fresh master key, fresh salt.
///
/// Returns the durable record only; call [`unlock`] to use the key.
pub fn create_vault(
    password: &SecretString,
    params: &KdfParams,
    salt_len: usize,
) -> DvResult<VaultRecord> {
    let salt = generate_salt(salt_len)?;
    let wrapping_key = derive_key(password, &salt, params)?;
    let master = MasterKey::generate();

    let record = VaultRecord {
        wrapped_master_key: wrap(&wrapping_key, &master)?,
        salt: STANDARD.encode(&salt),
        kdf: *params,
    };
    tracing::debug!(kdf_version = params.version, salt_len, "created master-key vault");
    Ok(record)
}

/// Unwrap the master key with the user's password.
///
/// Wrong password and a corrupt record are reported identically. Only an
/// empty password is rejected as bad input, before the record is read.
pub fn unlock(password: &SecretString, record: &VaultRecord) -> DvResult<MasterKey> {
    if password.expose_secret().is_empty() {
        return Err(DvError::InvalidInput("password must not be empty".into()));
    }
    let salt = decode_salt(record)?;
    let wrapping_key = derive_key(password, &salt, &record.kdf).map_err(|e| {
        tracing::debug!(error = %e, "stored vault params rejected");
        DvError::InvalidPasswordOrCorruptVault
    })?;
    unwrap(&wrapping_key, &record.wrapped_master_key)
}

/// Re-wrap the same master key under a new password.
///
/// The salt is kept; the KDF params move to `params` so cost upgrades ride
/// along with password changes. Records encrypted before the change stay
/// readable. The caller must persist the result with a compare-and-swap
/// against `record` so concurrent changes cannot both land.
pub fn rewrap(
    old_password: &SecretString,
    new_password: &SecretString,
    record: &VaultRecord,
    params: &KdfParams,
) -> DvResult<VaultRecord> {
    let master = unlock(old_password, record)?;
    let salt = decode_salt(record)?;
    let wrapping_key = derive_key(new_password, &salt, params)?;

    Ok(VaultRecord {
        wrapped_master_key: wrap(&wrapping_key, &master)?,
        salt: record.salt.clone(),
        kdf: *params,
    })
}

/// Login check: does `password` open this vault?
pub fn verify_password(password: &SecretString, record: &VaultRecord) -> bool {
    unlock(password, record).is_ok()
}

/// Unlock, run `f`, and drop (zeroize) the master key on every exit path.
pub fn with_unlocked<T>(
    password: &SecretString,
    record: &VaultRecord,
    f: impl FnOnce(&MasterKey) -> DvResult<T>,
) -> DvResult<T> {
    let master = unlock(password, record)?;
    f(&master)
}
