//! Key derivation: Argon2id password → wrapping key

use argon2::{Algorithm, Argon2, Params, Version};
use dv_core::types::{KdfParams, KDF_VERSION};
use dv_core::{DvError, DvResult};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{KEY_SIZE, MIN_SALT_SIZE};

/// A 256-bit key derived from a password via Argon2id.
///
/// Only ever used to wrap or unwrap a master key. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// Deterministic for identical inputs. The salt must be at least 16 bytes
/// and unique per user; it is stored next to the wrapped key, not secret.
pub fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> DvResult<DerivedKey> {
    if password.expose_secret().is_empty() {
        return Err(DvError::InvalidInput("password must not be empty".into()));
    }
    if salt.len() < MIN_SALT_SIZE {
        return Err(DvError::InvalidInput(format!(
            "salt too short: {} bytes (minimum {MIN_SALT_SIZE})",
            salt.len()
        )));
    }
    if params.version != KDF_VERSION {
        return Err(DvError::InvalidInput(format!(
            "unsupported KDF params version {}",
            params.version
        )));
    }
    if !params.within_ceiling() {
        return Err(DvError::InvalidInput(format!(
            "Argon2id params above ceiling: mem={} KiB, time={}, parallelism={}",
            params.mem_cost_kib, params.time_cost, params.parallelism
        )));
    }

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| DvError::InvalidInput(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = DerivedKey {
        bytes: [0u8; KEY_SIZE],
    };
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key.bytes)
        .map_err(|e| DvError::InvalidInput(format!("Argon2id KDF failed: {e}")))?;

    Ok(key)
}

/// Generate a fresh random salt. Called once per user at signup.
pub fn generate_salt(len: usize) -> DvResult<Vec<u8>> {
    if len < MIN_SALT_SIZE {
        return Err(DvError::InvalidInput(format!(
            "salt length {len} below minimum {MIN_SALT_SIZE}"
        )));
    }
    let mut salt = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    Ok(salt)
}

#[cfg(test)]
pub(crate) fn fast_params() -> KdfParams {
    KdfParams {
        version: KDF_VERSION,
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}
