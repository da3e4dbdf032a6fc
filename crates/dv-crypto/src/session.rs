//! Per-request key context
//!
//! A `Session` is built from a user's stored key material at the start of a
//! request and dropped at its end. A UCE session owns the unlocked master
//! key, which is zeroized when the session drops, on every exit path.
//! Sessions are never shared between users or cached process-wide.

use dv_core::types::{EncryptionTier, TierCapabilities, TierKeyMaterial, UserId, UserKeys};
use dv_core::{DvError, DvResult};
use secrecy::SecretString;
use x25519_dalek::PublicKey;

use crate::seal::validate_public_key;
use crate::vault::{self, MasterKey};

pub(crate) enum SessionKeys {
    E2e { public_key: PublicKey },
    Uce { master_key: MasterKey },
}

pub struct Session {
    user_id: UserId,
    keys: SessionKeys,
}

impl Session {
    /// E2E session. Only the stored public key is involved.
    pub fn for_e2e(user: &UserKeys) -> DvResult<Self> {
        let public_key = user.public_key().ok_or_else(|| {
            DvError::InvalidInput(format!("user {} is not on the e2e tier", user.user_id))
        })?;
        Ok(Self {
            user_id: user.user_id,
            keys: SessionKeys::E2e {
                public_key: validate_public_key(public_key)?,
            },
        })
    }

    /// UCE session: unlocks the vault with `password`.
    pub fn unlock_uce(user: &UserKeys, password: &SecretString) -> DvResult<Self> {
        let record = user.vault().ok_or_else(|| {
            DvError::InvalidInput(format!("user {} is not on the uce tier", user.user_id))
        })?;
        let master_key = vault::unlock(password, record)?;
        tracing::debug!(user = %user.user_id, "uce session unlocked");
        Ok(Self::with_master_key(user.user_id, master_key))
    }

    /// Open whichever session the user's tier calls for. UCE needs the
    /// password; E2E ignores it.
    pub fn open(user: &UserKeys, password: Option<&SecretString>) -> DvResult<Self> {
        match &user.material {
            TierKeyMaterial::E2e { .. } => Self::for_e2e(user),
            TierKeyMaterial::Uce { .. } => {
                let password = password.ok_or_else(|| {
                    DvError::InvalidInput("password required to unlock a uce vault".into())
                })?;
                Self::unlock_uce(user, password)
            }
        }
    }

    /// Wrap a master key the caller already unlocked.
    pub fn with_master_key(user_id: UserId, master_key: MasterKey) -> Self {
        Self {
            user_id,
            keys: SessionKeys::Uce { master_key },
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn tier(&self) -> EncryptionTier {
        match self.keys {
            SessionKeys::E2e { .. } => EncryptionTier::E2e,
            SessionKeys::Uce { .. } => EncryptionTier::Uce,
        }
    }

    pub fn capabilities(&self) -> TierCapabilities {
        self.tier().capabilities()
    }

    pub(crate) fn keys(&self) -> &SessionKeys {
        &self.keys
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("tier", &self.tier())
            .finish_non_exhaustive()
    }
}
