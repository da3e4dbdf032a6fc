//! Single-file JSON key store.
//!
//! The file on disk is the only copy of the state. Every operation takes an
//! `fs2` lock on the sidecar `<path>.lock` and reloads the file under it:
//! shared for reads, exclusive for the whole read-modify-write of a
//! mutation. A mutation writes `<path>.tmp` and renames it over the store
//! file before the lock is released, so vault CAS and code consumption are
//! atomic across handles and across processes.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use dv_core::types::{RecoveryCodeRecord, UserId, UserKeys, VaultRecord};
use dv_core::DvResult;
use dv_crypto::RecoveryLedger;
use fs2::FileExt;

use crate::state::StoreState;
use crate::KeyStore;

#[derive(Debug)]
pub struct JsonKeyStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Held for the duration of one store operation.
struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // closing the descriptor releases the lock as well
        let _ = FileExt::unlock(&self.file);
    }
}

impl JsonKeyStore {
    /// Open the store at `path`, or start empty if the file does not exist.
    ///
    /// An unreadable or unparsable store file is an error here rather than
    /// on first use.
    pub fn open(path: &Path) -> DvResult<Self> {
        let store = Self {
            path: path.to_path_buf(),
            lock_path: lock_path_for(path),
        };
        let users = store.read(|state| state.users.len())?;
        tracing::debug!(path = %path.display(), users, "key store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, exclusive: bool) -> DvResult<StoreLock> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating key store dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("opening key store lock: {}", self.lock_path.display()))?;
        restrict_permissions(&self.lock_path)?;

        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.with_context(|| format!("locking key store: {}", self.lock_path.display()))?;
        Ok(StoreLock { file })
    }

    fn load(&self) -> DvResult<StoreState> {
        if !self.path.exists() {
            return Ok(StoreState::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading key store: {}", self.path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("parsing key store: {}", self.path.display()))?;
        Ok(state)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> DvResult<T> {
        let _lock = self.lock(false)?;
        let state = self.load()?;
        Ok(f(&state))
    }

    /// Reload, apply `f`, and persist if anything changed, all under the
    /// exclusive lock. A failing `f` or write leaves the file untouched.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> DvResult<T>) -> DvResult<T> {
        let _lock = self.lock(true)?;
        let before = self.load()?;
        let mut next = before.clone();
        let out = f(&mut next)?;
        if next != before {
            write_atomic(&self.path, &next)?;
        }
        Ok(out)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn write_atomic(path: &Path, state: &StoreState) -> DvResult<()> {
    let json = serde_json::to_string_pretty(state).context("serializing key store")?;

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)
        .with_context(|| format!("writing key store temp: {}", tmp_path.display()))?;
    restrict_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming key store: {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> DvResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("chmod 600: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> DvResult<()> {
    Ok(())
}

impl RecoveryLedger for JsonKeyStore {
    fn compare_and_consume(
        &self,
        user_id: &UserId,
        code_hash: &str,
        used_at: u64,
    ) -> DvResult<bool> {
        self.mutate(|state| Ok(state.consume(user_id, code_hash, used_at)))
    }
}

impl KeyStore for JsonKeyStore {
    fn get_user(&self, user_id: &UserId) -> DvResult<Option<UserKeys>> {
        self.read(|state| state.get_user(user_id))
    }

    fn create_user(
        &self,
        keys: UserKeys,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()> {
        let user_id = keys.user_id;
        let tier = keys.tier();
        self.mutate(|state| state.create_user(keys, recovery_codes))?;
        tracing::info!(user = %user_id, %tier, "user key material stored");
        Ok(())
    }

    fn compare_and_swap_vault(
        &self,
        user_id: &UserId,
        expected: &VaultRecord,
        new: VaultRecord,
    ) -> DvResult<bool> {
        let swapped = self.mutate(|state| state.compare_and_swap_vault(user_id, expected, new))?;
        if !swapped {
            tracing::warn!(user = %user_id, "vault changed concurrently, rewrap discarded");
        }
        Ok(swapped)
    }

    fn recovery_codes(&self, user_id: &UserId) -> DvResult<Vec<RecoveryCodeRecord>> {
        self.read(|state| state.recovery_codes(user_id))?
    }

    fn replace_recovery_codes(
        &self,
        user_id: &UserId,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()> {
        self.mutate(|state| state.replace_recovery_codes(user_id, recovery_codes))
    }

    fn list_users(&self) -> DvResult<Vec<UserId>> {
        self.read(StoreState::list_users)
    }
}
