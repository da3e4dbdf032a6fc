//! dv-store: the persistence contract for key material
//!
//! The crypto core never touches storage. This crate holds what it hands
//! back (public keys, wrapped master keys, recovery-code hashes) and
//! provides the two atomic operations the core relies on:
//!   - **vault compare-and-swap**: a password change lands only if the
//!     vault is still the one it was derived from
//!   - **recovery-code consume**: check-and-mark under one lock, so a code
//!     redeems once no matter how many requests race
//!
//! Two backends: [`MemoryKeyStore`] for tests and embedding, and
//! [`JsonKeyStore`], a single JSON file written through atomically under an
//! inter-process lock.

pub mod json;
pub mod memory;
mod state;

pub use json::JsonKeyStore;
pub use memory::MemoryKeyStore;
pub use state::StoredUser;

use dv_core::types::{RecoveryCodeRecord, UserId, UserKeys, VaultRecord};
use dv_core::DvResult;
use dv_crypto::RecoveryLedger;

/// Key-material store shared by request handlers.
pub trait KeyStore: RecoveryLedger + Send + Sync {
    fn get_user(&self, user_id: &UserId) -> DvResult<Option<UserKeys>>;

    /// Insert a new user. Fails if the id exists: the tier is fixed at signup.
    fn create_user(
        &self,
        keys: UserKeys,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()>;

    /// Replace the vault only if it still equals `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    fn compare_and_swap_vault(
        &self,
        user_id: &UserId,
        expected: &VaultRecord,
        new: VaultRecord,
    ) -> DvResult<bool>;

    fn recovery_codes(&self, user_id: &UserId) -> DvResult<Vec<RecoveryCodeRecord>>;

    /// Swap in a freshly generated batch (explicit user action only).
    fn replace_recovery_codes(
        &self,
        user_id: &UserId,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()>;

    fn list_users(&self) -> DvResult<Vec<UserId>>;
}
