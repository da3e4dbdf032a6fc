//! E2E recovery codes
//!
//! At signup an E2E user gets a batch of single-use codes formatted
//! `XXXX-XXXX-XXXX-XXXX` (64 bits from the OS CSPRNG each). They are shown
//! once; only the SHA-256 of the normalized form (dashes stripped,
//! uppercased) is persisted. Redeeming a code flips it to used through the
//! store's compare-and-swap, so two concurrent redemptions cannot both win.

use dv_core::types::{RecoveryCodeRecord, UserId};
use dv_core::{DvError, DvResult};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::hash::sha256_hex;

/// Codes per signup batch
pub const DEFAULT_BATCH_SIZE: usize = 10;

const CODE_BYTES: usize = 8;
const GROUP_LEN: usize = 4;
const NORMALIZED_LEN: usize = CODE_BYTES * 2;

/// Persistence contract for redemption.
///
/// Implementations must make the check-and-mark atomic: among concurrent
/// calls for the same unused hash, exactly one returns `Ok(true)`.
pub trait RecoveryLedger {
    fn compare_and_consume(
        &self,
        user_id: &UserId,
        code_hash: &str,
        used_at: u64,
    ) -> DvResult<bool>;
}

/// Generate `count` fresh codes for display.
pub fn generate_batch(count: usize) -> Vec<SecretString> {
    (0..count).map(|_| generate_code()).collect()
}

fn generate_code() -> SecretString {
    let mut entropy = Zeroizing::new([0u8; CODE_BYTES]);
    rand::rngs::OsRng.fill_bytes(entropy.as_mut_slice());
    let hex_str = Zeroizing::new(hex::encode_upper(entropy.as_slice()));

    let mut formatted = String::with_capacity(NORMALIZED_LEN + 3);
    for (i, group) in hex_str.as_bytes().chunks(GROUP_LEN).enumerate() {
        if i > 0 {
            formatted.push('-');
        }
        formatted.extend(group.iter().map(|&b| b as char));
    }
    SecretString::from(formatted)
}

/// Canonical form: dashes and whitespace removed, uppercase, 16 hex chars.
///
/// Anything else is `InvalidRecoveryCode`, indistinguishable from an
/// unknown or spent code.
pub fn normalize(code: &str) -> DvResult<Zeroizing<String>> {
    let normalized: Zeroizing<String> = Zeroizing::new(
        code.chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect(),
    );
    if normalized.len() != NORMALIZED_LEN || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DvError::InvalidRecoveryCode);
    }
    Ok(normalized)
}

/// SHA-256 (lowercase hex) of the normalized code.
pub fn hash_code(code: &str) -> DvResult<String> {
    let normalized = normalize(code)?;
    Ok(sha256_hex(normalized.as_bytes()))
}

/// Hash a freshly generated batch into unused records for storage.
pub fn store_hashes(codes: &[SecretString]) -> DvResult<Vec<RecoveryCodeRecord>> {
    codes
        .iter()
        .map(|code| hash_code(code.expose_secret()).map(RecoveryCodeRecord::unused))
        .collect()
}

/// Index of the unused record whose hash equals `code_hash`.
///
/// Scans every record and compares in constant time so timing reveals
/// neither position nor whether a used record matched.
pub fn find_unused(records: &[RecoveryCodeRecord], code_hash: &str) -> Option<usize> {
    let mut found = None;
    for (i, record) in records.iter().enumerate() {
        let hash_matches: bool = record
            .code_hash
            .as_bytes()
            .ct_eq(code_hash.as_bytes())
            .into();
        if hash_matches && !record.used && found.is_none() {
            found = Some(i);
        }
    }
    found
}

/// Redeem against an in-memory slice (single-owner callers and tests).
pub fn consume_in(records: &mut [RecoveryCodeRecord], code: &str, used_at: u64) -> DvResult<()> {
    let code_hash = hash_code(code)?;
    let i = find_unused(records, &code_hash).ok_or(DvError::InvalidRecoveryCode)?;
    records[i].used = true;
    records[i].used_at = Some(used_at);
    Ok(())
}

/// Validate `code` for `user_id` and atomically mark it used.
///
/// Not found, already used and malformed all return `InvalidRecoveryCode`.
pub fn validate_and_consume<L: RecoveryLedger + ?Sized>(
    ledger: &L,
    user_id: &UserId,
    code: &str,
) -> DvResult<()> {
    let code_hash = hash_code(code)?;
    if ledger.compare_and_consume(user_id, &code_hash, unix_now())? {
        tracing::info!(user = %user_id, "recovery code redeemed");
        Ok(())
    } else {
        tracing::warn!(user = %user_id, "recovery code rejected");
        Err(DvError::InvalidRecoveryCode)
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
