//! In-process key store behind a single mutex.

use std::sync::{Mutex, MutexGuard};

use dv_core::types::{RecoveryCodeRecord, UserId, UserKeys, VaultRecord};
use dv_core::{DvError, DvResult};
use dv_crypto::RecoveryLedger;

use crate::state::StoreState;
use crate::KeyStore;

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    state: Mutex<StoreState>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> DvResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| DvError::Store("memory key store lock poisoned".into()))
    }
}

impl RecoveryLedger for MemoryKeyStore {
    fn compare_and_consume(
        &self,
        user_id: &UserId,
        code_hash: &str,
        used_at: u64,
    ) -> DvResult<bool> {
        Ok(self.lock()?.consume(user_id, code_hash, used_at))
    }
}

impl KeyStore for MemoryKeyStore {
    fn get_user(&self, user_id: &UserId) -> DvResult<Option<UserKeys>> {
        Ok(self.lock()?.get_user(user_id))
    }

    fn create_user(
        &self,
        keys: UserKeys,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()> {
        self.lock()?.create_user(keys, recovery_codes)
    }

    fn compare_and_swap_vault(
        &self,
        user_id: &UserId,
        expected: &VaultRecord,
        new: VaultRecord,
    ) -> DvResult<bool> {
        self.lock()?.compare_and_swap_vault(user_id, expected, new)
    }

    fn recovery_codes(&self, user_id: &UserId) -> DvResult<Vec<RecoveryCodeRecord>> {
        self.lock()?.recovery_codes(user_id)
    }

    fn replace_recovery_codes(
        &self,
        user_id: &UserId,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()> {
        self.lock()?.replace_recovery_codes(user_id, recovery_codes)
    }

    fn list_users(&self) -> DvResult<Vec<UserId>> {
        Ok(self.lock()?.list_users())
    }
}
