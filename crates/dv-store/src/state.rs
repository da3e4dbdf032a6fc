//! Backend-independent store state and the rules every backend applies.

use std::collections::BTreeMap;

use dv_core::types::{
    EncryptionTier, RecoveryCodeRecord, TierKeyMaterial, UserId, UserKeys, VaultRecord,
};
use dv_core::{DvError, DvResult};
use dv_crypto::recovery::find_unused;
use serde::{Deserialize, Serialize};

/// Everything stored for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    pub keys: UserKeys,
    /// E2E only; always empty for UCE users
    #[serde(default)]
    pub recovery_codes: Vec<RecoveryCodeRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    pub users: BTreeMap<UserId, StoredUser>,
}

impl StoreState {
    pub fn get_user(&self, user_id: &UserId) -> Option<UserKeys> {
        self.users.get(user_id).map(|u| u.keys.clone())
    }

    pub fn create_user(
        &mut self,
        keys: UserKeys,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()> {
        if self.users.contains_key(&keys.user_id) {
            return Err(DvError::InvalidInput(format!(
                "user {} already exists",
                keys.user_id
            )));
        }
        if keys.tier() == EncryptionTier::Uce && !recovery_codes.is_empty() {
            return Err(DvError::InvalidInput(
                "recovery codes are only issued to e2e users".into(),
            ));
        }
        self.users.insert(
            keys.user_id,
            StoredUser {
                keys,
                recovery_codes,
            },
        );
        Ok(())
    }

    pub fn compare_and_swap_vault(
        &mut self,
        user_id: &UserId,
        expected: &VaultRecord,
        new: VaultRecord,
    ) -> DvResult<bool> {
        let user = self.user_mut(user_id)?;
        match &mut user.keys.material {
            TierKeyMaterial::Uce { vault } if vault == expected => {
                *vault = new;
                Ok(true)
            }
            TierKeyMaterial::Uce { .. } => Ok(false),
            TierKeyMaterial::E2e { .. } => {
                Err(DvError::InvalidInput(format!("user {user_id} has no vault")))
            }
        }
    }

    pub fn recovery_codes(&self, user_id: &UserId) -> DvResult<Vec<RecoveryCodeRecord>> {
        self.users
            .get(user_id)
            .map(|u| u.recovery_codes.clone())
            .ok_or_else(|| unknown_user(user_id))
    }

    pub fn replace_recovery_codes(
        &mut self,
        user_id: &UserId,
        recovery_codes: Vec<RecoveryCodeRecord>,
    ) -> DvResult<()> {
        let user = self.user_mut(user_id)?;
        if user.keys.tier() != EncryptionTier::E2e {
            return Err(DvError::InvalidInput(
                "recovery codes are only issued to e2e users".into(),
            ));
        }
        user.recovery_codes = recovery_codes;
        Ok(())
    }

    /// Unknown users report `false` like unknown codes do.
    pub fn consume(&mut self, user_id: &UserId, code_hash: &str, used_at: u64) -> bool {
        let Some(user) = self.users.get_mut(user_id) else {
            return false;
        };
        match find_unused(&user.recovery_codes, code_hash) {
            Some(i) => {
                let record = &mut user.recovery_codes[i];
                record.used = true;
                record.used_at = Some(used_at);
                true
            }
            None => false,
        }
    }

    pub fn list_users(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }

    fn user_mut(&mut self, user_id: &UserId) -> DvResult<&mut StoredUser> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| unknown_user(user_id))
    }
}

fn unknown_user(user_id: &UserId) -> DvError {
    DvError::InvalidInput(format!("unknown user {user_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::types::KdfParams;

    fn vault(tag: &str) -> VaultRecord {
        VaultRecord {
            wrapped_master_key: tag.into(),
            salt: "c2FsdA==".into(),
            kdf: KdfParams::default(),
        }
    }

    fn uce(tag: &str) -> UserKeys {
        UserKeys {
            user_id: UserId::new(),
            material: TierKeyMaterial::Uce { vault: vault(tag) },
            created_at: 0,
        }
    }

    fn e2e() -> UserKeys {
        UserKeys {
            user_id: UserId::new(),
            material: TierKeyMaterial::E2e {
                public_key: "AAAA".into(),
            },
            created_at: 0,
        }
    }

    #[test]
    fn test_create_is_insert_only() {
        let mut state = StoreState::default();
        let keys = uce("v1");
        state.create_user(keys.clone(), vec![]).unwrap();

        let mut flipped = e2e();
        flipped.user_id = keys.user_id;
        assert!(state.create_user(flipped, vec![]).is_err());
        assert_eq!(state.get_user(&keys.user_id).unwrap(), keys);
    }

    #[test]
    fn test_uce_user_gets_no_codes() {
        let mut state = StoreState::default();
        let codes = vec![RecoveryCodeRecord::unused("a".repeat(64))];
        assert!(state.create_user(uce("v1"), codes.clone()).is_err());

        let keys = uce("v1");
        state.create_user(keys.clone(), vec![]).unwrap();
        assert!(state.replace_recovery_codes(&keys.user_id, codes).is_err());
    }

    #[test]
    fn test_vault_cas() {
        let mut state = StoreState::default();
        let keys = uce("v1");
        let id = keys.user_id;
        state.create_user(keys, vec![]).unwrap();

        assert!(state.compare_and_swap_vault(&id, &vault("v1"), vault("v2")).unwrap());
        // a second writer still holding v1 loses
        assert!(!state.compare_and_swap_vault(&id, &vault("v1"), vault("v3")).unwrap());
        assert_eq!(state.get_user(&id).unwrap().vault(), Some(&vault("v2")));
    }

    #[test]
    fn test_vault_cas_on_e2e_user() {
        let mut state = StoreState::default();
        let keys = e2e();
        let id = keys.user_id;
        state.create_user(keys, vec![]).unwrap();
        assert!(state.compare_and_swap_vault(&id, &vault("v1"), vault("v2")).is_err());
    }

    #[test]
    fn test_consume_unknown_user() {
        let mut state = StoreState::default();
        assert!(!state.consume(&UserId::new(), &"a".repeat(64), 0));
    }

    #[test]
    fn test_serde_roundtrip_keeps_codes() {
        let mut state = StoreState::default();
        let keys = e2e();
        let id = keys.user_id;
        let hash = "b".repeat(64);
        state
            .create_user(keys, vec![RecoveryCodeRecord::unused(hash.clone())])
            .unwrap();
        assert!(state.consume(&id, &hash, 42));

        let json = serde_json::to_string(&state).unwrap();
        let back: StoreState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.recovery_codes(&id).unwrap()[0].used_at, Some(42));
    }
}
