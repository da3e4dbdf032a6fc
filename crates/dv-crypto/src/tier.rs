//! Tier strategies and the capability router
//!
//! Two strategies, one per tier, closed over an enum so dispatch is an
//! exhaustive match. The router consults the static capability table before
//! any operation that needs server-side plaintext, so an E2E user's request
//! for search or decryption is refused before any key is touched.

use dv_core::types::{Capability, EncryptedRecord, EncryptionTier, TierCapabilities};
use dv_core::{DvError, DvResult};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::cipher;
use crate::hash::content_hash;
use crate::seal::{self, validate_public_key};
use crate::session::{Session, SessionKeys};
use crate::vault::MasterKey;

/// Reject a decrypted payload whose hash does not match the stored one.
fn check_content_hash(plaintext: &[u8], record: &EncryptedRecord) -> DvResult<()> {
    let actual = content_hash(plaintext);
    let matches: bool = actual
        .as_str()
        .as_bytes()
        .ct_eq(record.content_hash.as_str().as_bytes())
        .into();
    if matches {
        Ok(())
    } else {
        Err(DvError::DecryptionFailed)
    }
}

/// E2E: the server can seal to the owner's public key but never open.
#[derive(Debug, Clone, Copy)]
pub struct E2eStrategy {
    public_key: PublicKey,
}

impl E2eStrategy {
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    pub fn from_base64(public_key_b64: &str) -> DvResult<Self> {
        validate_public_key(public_key_b64).map(Self::new)
    }

    pub fn encrypt_record(&self, plaintext: &[u8]) -> DvResult<EncryptedRecord> {
        Ok(EncryptedRecord {
            encrypted_content: seal::seal_to_string(&self.public_key, plaintext)?,
            content_hash: content_hash(plaintext),
        })
    }

    /// Always refused: the private key never reaches the server.
    pub fn decrypt_record(&self, _record: &EncryptedRecord) -> DvResult<Zeroizing<Vec<u8>>> {
        Err(DvError::TierCapability(
            Capability::ServerDecrypt.unavailable_reason(),
        ))
    }

    /// Client-side open with the device's own secret key.
    pub fn open_on_device(
        secret: &StaticSecret,
        record: &EncryptedRecord,
    ) -> DvResult<Zeroizing<Vec<u8>>> {
        let plaintext = seal::open_str(secret, &record.encrypted_content)?;
        check_content_hash(&plaintext, record)?;
        Ok(plaintext)
    }
}

/// UCE: records are AEAD-encrypted under the unlocked master key.
#[derive(Debug, Clone, Copy)]
pub struct UceStrategy<'k> {
    master_key: &'k MasterKey,
}

impl<'k> UceStrategy<'k> {
    pub fn new(master_key: &'k MasterKey) -> Self {
        Self { master_key }
    }

    pub fn encrypt_record(&self, plaintext: &[u8]) -> DvResult<EncryptedRecord> {
        Ok(EncryptedRecord {
            encrypted_content: cipher::encrypt_to_string(
                self.master_key.as_bytes(),
                plaintext,
                None,
            )?,
            content_hash: content_hash(plaintext),
        })
    }

    pub fn decrypt_record(&self, record: &EncryptedRecord) -> DvResult<Zeroizing<Vec<u8>>> {
        let plaintext =
            cipher::decrypt_str(self.master_key.as_bytes(), &record.encrypted_content, None)?;
        check_content_hash(&plaintext, record)?;
        Ok(plaintext)
    }
}

/// The strategy for one session, borrowed from it.
#[derive(Debug, Clone, Copy)]
pub enum TierStrategy<'s> {
    E2e(E2eStrategy),
    Uce(UceStrategy<'s>),
}

impl TierStrategy<'_> {
    pub fn tier(&self) -> EncryptionTier {
        match self {
            TierStrategy::E2e(_) => EncryptionTier::E2e,
            TierStrategy::Uce(_) => EncryptionTier::Uce,
        }
    }

    pub fn capabilities(&self) -> TierCapabilities {
        self.tier().capabilities()
    }

    pub fn encrypt_record(&self, plaintext: &[u8]) -> DvResult<EncryptedRecord> {
        match self {
            TierStrategy::E2e(s) => s.encrypt_record(plaintext),
            TierStrategy::Uce(s) => s.encrypt_record(plaintext),
        }
    }

    pub fn decrypt_record(&self, record: &EncryptedRecord) -> DvResult<Zeroizing<Vec<u8>>> {
        match self {
            TierStrategy::E2e(s) => s.decrypt_record(record),
            TierStrategy::Uce(s) => s.decrypt_record(record),
        }
    }
}

/// Stateless router from a session to its strategy, gated by capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct TierRouter;

impl TierRouter {
    /// Fail fast if `tier` lacks `capability`.
    pub fn require(tier: EncryptionTier, capability: Capability) -> DvResult<()> {
        if tier.capabilities().allows(capability) {
            return Ok(());
        }
        tracing::warn!(%tier, %capability, "operation refused for tier");
        Err(DvError::TierCapability(capability.unavailable_reason()))
    }

    pub fn strategy(session: &Session) -> TierStrategy<'_> {
        match session.keys() {
            SessionKeys::E2e { public_key } => TierStrategy::E2e(E2eStrategy::new(*public_key)),
            SessionKeys::Uce { master_key } => TierStrategy::Uce(UceStrategy::new(master_key)),
        }
    }

    /// Encrypt a new or edited record. Allowed on both tiers.
    pub fn encrypt_record(session: &Session, plaintext: &[u8]) -> DvResult<EncryptedRecord> {
        let record = Self::strategy(session).encrypt_record(plaintext)?;
        tracing::debug!(user = %session.user_id(), tier = %session.tier(), "record encrypted");
        Ok(record)
    }

    /// Server-side decrypt. Refused for E2E before any decryption is tried.
    pub fn decrypt_record(
        session: &Session,
        record: &EncryptedRecord,
    ) -> DvResult<Zeroizing<Vec<u8>>> {
        Self::require(session.tier(), Capability::ServerDecrypt)?;
        Self::strategy(session).decrypt_record(record)
    }

    /// Plaintext for a server feature such as search indexing or AI.
    ///
    /// Checks the feature's capability first, then server decrypt.
    pub fn plaintext_for(
        session: &Session,
        capability: Capability,
        record: &EncryptedRecord,
    ) -> DvResult<Zeroizing<Vec<u8>>> {
        Self::require(session.tier(), capability)?;
        Self::decrypt_record(session, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seal::KeyPair;
    use dv_core::types::{TierKeyMaterial, UserId, UserKeys};

    fn uce_session() -> Session {
        Session::with_master_key(UserId::new(), MasterKey::generate())
    }

    fn e2e_session(kp: &KeyPair) -> Session {
        let user = UserKeys {
            user_id: UserId::new(),
            material: TierKeyMaterial::E2e {
                public_key: kp.public_base64(),
            },
            created_at: 0,
        };
        Session::for_e2e(&user).unwrap()
    }

    #[test]
    fn test_uce_roundtrip_through_router() {
        let session = uce_session();
        let record = TierRouter::encrypt_record(&session, b"Dear diary...").unwrap();
        assert_eq!(record.content_hash, content_hash(b"Dear diary..."));
        assert!(cipher::verify_encrypted_content(&record.encrypted_content));

        let plaintext = TierRouter::decrypt_record(&session, &record).unwrap();
        assert_eq!(plaintext.as_slice(), b"Dear diary...");
    }

    #[test]
    fn test_e2e_server_decrypt_refused_without_trying() {
        let kp = KeyPair::generate();
        let session = e2e_session(&kp);
        let mut record = TierRouter::encrypt_record(&session, b"private").unwrap();

        let err = TierRouter::decrypt_record(&session, &record).unwrap_err();
        assert!(matches!(
            err,
            DvError::TierCapability("server_decrypt_unavailable")
        ));

        // Garbage ciphertext gets the same answer: decryption never ran.
        record.encrypted_content = "%%%".into();
        let err = TierRouter::decrypt_record(&session, &record).unwrap_err();
        assert!(matches!(err, DvError::TierCapability(_)));

        let err = TierRouter::strategy(&session)
            .decrypt_record(&record)
            .unwrap_err();
        assert!(matches!(err, DvError::TierCapability(_)));
    }

    #[test]
    fn test_e2e_device_can_open() {
        let kp = KeyPair::generate();
        let session = e2e_session(&kp);
        let record = TierRouter::encrypt_record(&session, b"from the server").unwrap();
        let opened = E2eStrategy::open_on_device(kp.secret(), &record).unwrap();
        assert_eq!(opened.as_slice(), b"from the server");

        let other = KeyPair::generate();
        assert!(matches!(
            E2eStrategy::open_on_device(other.secret(), &record).unwrap_err(),
            DvError::DecryptionFailed
        ));
    }

    #[test]
    fn test_feature_gating() {
        let kp = KeyPair::generate();
        let e2e = e2e_session(&kp);
        let record = TierRouter::encrypt_record(&e2e, b"x").unwrap();
        for cap in [Capability::ServerSearch, Capability::ServerAi] {
            let err = TierRouter::plaintext_for(&e2e, cap, &record).unwrap_err();
            assert!(matches!(err, DvError::TierCapability(r) if r == cap.unavailable_reason()));
        }

        let uce = uce_session();
        let record = TierRouter::encrypt_record(&uce, b"searchable").unwrap();
        let text = TierRouter::plaintext_for(&uce, Capability::ServerSearch, &record).unwrap();
        assert_eq!(text.as_slice(), b"searchable");
    }

    #[test]
    fn test_require_matches_capability_table() {
        for tier in [EncryptionTier::E2e, EncryptionTier::Uce] {
            for cap in Capability::ALL {
                assert_eq!(
                    TierRouter::require(tier, cap).is_ok(),
                    tier.capabilities().allows(cap)
                );
            }
        }
    }

    #[test]
    fn test_hash_mismatch_is_decryption_failure() {
        let session = uce_session();
        let mut record = TierRouter::encrypt_record(&session, b"original").unwrap();
        record.content_hash = content_hash(b"something else");
        assert!(matches!(
            TierRouter::decrypt_record(&session, &record).unwrap_err(),
            DvError::DecryptionFailed
        ));
    }

    #[test]
    fn test_uce_other_master_key_fails() {
        let a = uce_session();
        let b = uce_session();
        let record = TierRouter::encrypt_record(&a, b"mine").unwrap();
        assert!(matches!(
            TierRouter::decrypt_record(&b, &record).unwrap_err(),
            DvError::DecryptionFailed
        ));
    }

    #[test]
    fn test_strategy_reports_tier() {
        let kp = KeyPair::generate();
        assert_eq!(
            TierRouter::strategy(&e2e_session(&kp)).tier(),
            EncryptionTier::E2e
        );
        let uce = uce_session();
        let strategy = TierRouter::strategy(&uce);
        assert_eq!(strategy.tier(), EncryptionTier::Uce);
        assert!(strategy.capabilities().supports_server_search);
    }
}
