//! Startup self-test over both tiers
//!
//! Runs each primitive once against fresh material and reports pass/fail per
//! check. Used by `dv self-test` and suitable for a service health check.

use std::collections::BTreeMap;

use dv_core::types::{Capability, EncryptionTier, KdfParams};
use dv_core::DvResult;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::cipher;
use crate::kdf::{derive_key, generate_salt};
use crate::recovery;
use crate::seal::{self, validate_public_key, KeyPair};
use crate::vault;
use crate::DEFAULT_SALT_SIZE;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelfTestReport {
    pub checks: BTreeMap<&'static str, bool>,
    /// First error raised by a check, if any
    pub error: Option<String>,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.values().all(|ok| *ok)
    }

    fn record(&mut self, name: &'static str, result: DvResult<bool>) {
        let ok = match result {
            Ok(ok) => ok,
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(format!("{name}: {e}"));
                }
                false
            }
        };
        if !ok {
            tracing::warn!(check = name, "self-test check failed");
        }
        self.checks.insert(name, ok);
    }
}

fn check_public_key_validation() -> DvResult<bool> {
    let kp = KeyPair::generate();
    let parsed = validate_public_key(&kp.public_base64())?;
    let short_rejected = validate_public_key("dG9vIHNob3J0").is_err();
    Ok(parsed.as_bytes() == kp.public().as_bytes() && short_rejected)
}

fn check_seal_open() -> DvResult<bool> {
    let kp = KeyPair::generate();
    let sealed = seal::seal_for_self(kp.public(), b"self-test entry")?;
    let opened = seal::open_self(kp.secret(), &sealed)?;
    Ok(opened.as_slice() == b"self-test entry")
}

fn check_recovery_codes() -> DvResult<bool> {
    let codes = recovery::generate_batch(recovery::DEFAULT_BATCH_SIZE);
    let mut records = recovery::store_hashes(&codes)?;
    let code = codes[0].expose_secret();
    recovery::consume_in(&mut records, code, 0)?;
    let reuse_rejected = recovery::consume_in(&mut records, code, 0).is_err();
    Ok(codes.len() == recovery::DEFAULT_BATCH_SIZE && reuse_rejected)
}

fn check_key_derivation(params: &KdfParams) -> DvResult<bool> {
    let password = SecretString::from("self-test-password");
    let salt = generate_salt(DEFAULT_SALT_SIZE)?;
    let a = derive_key(&password, &salt, params)?;
    let b = derive_key(&password, &salt, params)?;
    Ok(a.as_bytes() == b.as_bytes())
}

fn check_encrypt_decrypt() -> DvResult<bool> {
    let key = vault::MasterKey::generate();
    let encoded = cipher::encrypt_to_string(key.as_bytes(), b"self-test entry", None)?;
    let decoded = cipher::decrypt_str(key.as_bytes(), &encoded, None)?;
    Ok(decoded.as_slice() == b"self-test entry")
}

fn check_password_verification(params: &KdfParams) -> DvResult<bool> {
    let record = vault::create_vault(
        &SecretString::from("TestPassword123!"),
        params,
        DEFAULT_SALT_SIZE,
    )?;
    let right = vault::verify_password(&SecretString::from("TestPassword123!"), &record);
    let wrong = vault::verify_password(&SecretString::from("WrongPassword123!"), &record);
    Ok(right && !wrong)
}

fn check_capability_table() -> DvResult<bool> {
    let e2e = EncryptionTier::E2e.capabilities();
    let uce = EncryptionTier::Uce.capabilities();
    Ok(Capability::ALL
        .iter()
        .all(|cap| !e2e.allows(*cap) && uce.allows(*cap)))
}

/// Run every check with the given KDF params.
pub fn run_self_test(params: &KdfParams) -> SelfTestReport {
    let mut report = SelfTestReport::default();
    report.record("e2e_public_key_validation", check_public_key_validation());
    report.record("e2e_seal_open", check_seal_open());
    report.record("e2e_recovery_codes", check_recovery_codes());
    report.record("uce_key_derivation", check_key_derivation(params));
    report.record("uce_encrypt_decrypt", check_encrypt_decrypt());
    report.record("uce_password_verification", check_password_verification(params));
    report.record("tier_capabilities", check_capability_table());

    tracing::info!(passed = report.passed(), "encryption self-test finished");
    report
}
