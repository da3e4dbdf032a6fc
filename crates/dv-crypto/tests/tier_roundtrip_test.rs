//! End-to-end flows across both tiers: signup, unlock, record encryption,
//! password change, and recovery-code redemption under contention.

use std::collections::HashMap;
use std::sync::{Barrier, Mutex};

use dv_core::types::{
    Capability, KdfParams, RecoveryCodeRecord, TierKeyMaterial, UserId, UserKeys, KDF_VERSION,
};
use dv_core::{DvError, DvResult};
use dv_crypto::recovery::{self, find_unused};
use dv_crypto::{
    create_vault, rewrap, unlock, E2eStrategy, KeyPair, RecoveryLedger, Session, TierRouter,
};
use secrecy::{ExposeSecret, SecretString};

fn test_params() -> KdfParams {
    KdfParams {
        version: KDF_VERSION,
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

/// Minimal ledger with the same check-and-mark contract a real store has.
#[derive(Default)]
struct MutexLedger {
    codes: Mutex<HashMap<UserId, Vec<RecoveryCodeRecord>>>,
}

impl RecoveryLedger for MutexLedger {
    fn compare_and_consume(
        &self,
        user_id: &UserId,
        code_hash: &str,
        used_at: u64,
    ) -> DvResult<bool> {
        let mut codes = self.codes.lock().unwrap();
        let Some(records) = codes.get_mut(user_id) else {
            return Ok(false);
        };
        match find_unused(records, code_hash) {
            Some(i) => {
                records[i].used = true;
                records[i].used_at = Some(used_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[test]
fn uce_signup_to_decrypt_scenario() {
    let password = SecretString::from("Sup3r-Secret!2024");
    let vault = create_vault(&password, &test_params(), 32).unwrap();
    let user = UserKeys {
        user_id: UserId::new(),
        material: TierKeyMaterial::Uce {
            vault: vault.clone(),
        },
        created_at: 1_700_000_000,
    };

    let master = unlock(&password, &vault).unwrap();
    let session = Session::with_master_key(user.user_id, master);
    let record = TierRouter::encrypt_record(&session, "Dear diary...".as_bytes()).unwrap();
    drop(session);

    let session = Session::unlock_uce(&user, &password).unwrap();
    let plaintext = TierRouter::decrypt_record(&session, &record).unwrap();
    assert_eq!(plaintext.as_slice(), "Dear diary...".as_bytes());
}

#[test]
fn password_change_keeps_old_records_readable() {
    let old = SecretString::from("first-password");
    let new = SecretString::from("second-password");
    let mut user = UserKeys {
        user_id: UserId::new(),
        material: TierKeyMaterial::Uce {
            vault: create_vault(&old, &test_params(), 32).unwrap(),
        },
        created_at: 0,
    };

    let records: Vec<_> = {
        let session = Session::unlock_uce(&user, &old).unwrap();
        ["monday", "tuesday", "wednesday"]
            .iter()
            .map(|day| TierRouter::encrypt_record(&session, day.as_bytes()).unwrap())
            .collect()
    };

    let upgraded = KdfParams {
        time_cost: 2,
        ..test_params()
    };
    let rewrapped = rewrap(&old, &new, user.vault().unwrap(), &upgraded).unwrap();
    assert_eq!(rewrapped.kdf, upgraded);
    user.material = TierKeyMaterial::Uce { vault: rewrapped };

    assert!(matches!(
        Session::unlock_uce(&user, &old).unwrap_err(),
        DvError::InvalidPasswordOrCorruptVault
    ));
    let session = Session::unlock_uce(&user, &new).unwrap();
    for (record, day) in records.iter().zip(["monday", "tuesday", "wednesday"]) {
        let plaintext = TierRouter::decrypt_record(&session, record).unwrap();
        assert_eq!(plaintext.as_slice(), day.as_bytes());
    }
}

#[test]
fn e2e_server_never_reads_content() {
    let device = KeyPair::generate();
    let user = UserKeys {
        user_id: UserId::new(),
        material: TierKeyMaterial::E2e {
            public_key: device.public_base64(),
        },
        created_at: 0,
    };

    let session = Session::open(&user, None).unwrap();
    let record = TierRouter::encrypt_record(&session, b"imported entry").unwrap();

    for cap in [
        Capability::ServerDecrypt,
        Capability::ServerSearch,
        Capability::ServerAi,
    ] {
        let err = TierRouter::plaintext_for(&session, cap, &record).unwrap_err();
        assert!(matches!(err, DvError::TierCapability(_)));
        assert_eq!(err.public_message(), "operation not available for this account");
    }

    let opened = E2eStrategy::open_on_device(device.secret(), &record).unwrap();
    assert_eq!(opened.as_slice(), b"imported entry");
}

#[test]
fn recovery_codes_single_use_through_ledger() {
    let ledger = MutexLedger::default();
    let user_id = UserId::new();
    let codes = recovery::generate_batch(10);
    ledger
        .codes
        .lock()
        .unwrap()
        .insert(user_id, recovery::store_hashes(&codes).unwrap());

    for code in &codes {
        recovery::validate_and_consume(&ledger, &user_id, code.expose_secret()).unwrap();
        let err =
            recovery::validate_and_consume(&ledger, &user_id, code.expose_secret()).unwrap_err();
        assert!(matches!(err, DvError::InvalidRecoveryCode));
    }

    let guard = ledger.codes.lock().unwrap();
    let stored = &guard[&user_id];
    assert!(stored.iter().all(|r| r.used && r.used_at.is_some()));
}

#[test]
fn recovery_code_for_another_user_rejected() {
    let ledger = MutexLedger::default();
    let alice = UserId::new();
    let bob = UserId::new();
    let codes = recovery::generate_batch(1);
    ledger
        .codes
        .lock()
        .unwrap()
        .insert(alice, recovery::store_hashes(&codes).unwrap());

    let err = recovery::validate_and_consume(&ledger, &bob, codes[0].expose_secret()).unwrap_err();
    assert!(matches!(err, DvError::InvalidRecoveryCode));
    recovery::validate_and_consume(&ledger, &alice, codes[0].expose_secret()).unwrap();
}

#[test]
fn concurrent_redemption_has_one_winner() {
    for _ in 0..50 {
        let ledger = MutexLedger::default();
        let user_id = UserId::new();
        let codes = recovery::generate_batch(1);
        ledger
            .codes
            .lock()
            .unwrap()
            .insert(user_id, recovery::store_hashes(&codes).unwrap());

        let barrier = Barrier::new(2);
        let (ledger, barrier, user_id) = (&ledger, &barrier, &user_id);
        let code = codes[0].expose_secret();
        let results: Vec<bool> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();
                        recovery::validate_and_consume(ledger, user_id, code).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    }
}
