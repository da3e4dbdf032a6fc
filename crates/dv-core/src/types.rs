use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DvError, DvResult};

/// Stable user identifier (UUID v4, assigned at signup)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for UserId {
    type Err = DvError;

    fn from_str(s: &str) -> DvResult<Self> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DvError::InvalidInput(format!("user id: {e}")))
    }
}

/// Encryption tier, chosen at signup and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionTier {
    /// End-to-end: the server holds only a public key and ciphertext
    E2e,
    /// User-controlled: the server holds a password-wrapped master key
    Uce,
}

impl EncryptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionTier::E2e => "e2e",
            EncryptionTier::Uce => "uce",
        }
    }

    /// Static capability set for this tier.
    pub fn capabilities(&self) -> TierCapabilities {
        match self {
            EncryptionTier::E2e => TierCapabilities {
                supports_server_search: false,
                supports_server_ai: false,
                supports_easy_recovery: false,
                auto_multi_device_sync: false,
                supports_server_decrypt: false,
            },
            EncryptionTier::Uce => TierCapabilities {
                supports_server_search: true,
                supports_server_ai: true,
                supports_easy_recovery: true,
                auto_multi_device_sync: true,
                supports_server_decrypt: true,
            },
        }
    }
}

impl fmt::Display for EncryptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EncryptionTier {
    type Err = DvError;

    fn from_str(s: &str) -> DvResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "e2e" => Ok(EncryptionTier::E2e),
            "uce" => Ok(EncryptionTier::Uce),
            other => Err(DvError::InvalidInput(format!("unknown encryption tier: {other}"))),
        }
    }
}

/// A named server-side feature gated by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ServerSearch,
    ServerAi,
    EasyRecovery,
    AutoMultiDeviceSync,
    /// Server-side plaintext access to a stored record
    ServerDecrypt,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::ServerSearch,
        Capability::ServerAi,
        Capability::EasyRecovery,
        Capability::AutoMultiDeviceSync,
        Capability::ServerDecrypt,
    ];

    /// Machine-readable reason attached to a `TierCapability` error.
    pub fn unavailable_reason(&self) -> &'static str {
        match self {
            Capability::ServerSearch => "server_search_unavailable",
            Capability::ServerAi => "server_ai_unavailable",
            Capability::EasyRecovery => "easy_recovery_unavailable",
            Capability::AutoMultiDeviceSync => "auto_multi_device_sync_unavailable",
            Capability::ServerDecrypt => "server_decrypt_unavailable",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::ServerSearch => "server_search",
            Capability::ServerAi => "server_ai",
            Capability::EasyRecovery => "easy_recovery",
            Capability::AutoMultiDeviceSync => "auto_multi_device_sync",
            Capability::ServerDecrypt => "server_decrypt",
        };
        f.write_str(name)
    }
}

/// Capability flags for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCapabilities {
    pub supports_server_search: bool,
    pub supports_server_ai: bool,
    pub supports_easy_recovery: bool,
    pub auto_multi_device_sync: bool,
    pub supports_server_decrypt: bool,
}

impl TierCapabilities {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::ServerSearch => self.supports_server_search,
            Capability::ServerAi => self.supports_server_ai,
            Capability::EasyRecovery => self.supports_easy_recovery,
            Capability::AutoMultiDeviceSync => self.auto_multi_device_sync,
            Capability::ServerDecrypt => self.supports_server_decrypt,
        }
    }
}

/// Current KDF parameter set version
pub const KDF_VERSION: u32 = 1;

/// Argon2id parameters, persisted next to the salt so later cost increases
/// never lock out existing vaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub version: u32,
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 2)
    pub time_cost: u32,
    /// Parallelism (default: 1)
    pub parallelism: u32,
}

impl KdfParams {
    pub const MIN_MEM_COST_KIB: u32 = 65536;
    pub const MIN_TIME_COST: u32 = 2;
    /// 4 GiB
    pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024;
    pub const MAX_TIME_COST: u32 = 64;
    pub const MAX_PARALLELISM: u32 = 64;

    /// Whether these params meet the production floor.
    pub fn meets_minimum(&self) -> bool {
        self.mem_cost_kib >= Self::MIN_MEM_COST_KIB
            && self.time_cost >= Self::MIN_TIME_COST
            && self.parallelism >= 1
    }

    /// Whether these params stay under the ceiling a stored record may ask
    /// the KDF to spend.
    pub fn within_ceiling(&self) -> bool {
        self.mem_cost_kib <= Self::MAX_MEM_COST_KIB
            && self.time_cost <= Self::MAX_TIME_COST
            && self.parallelism <= Self::MAX_PARALLELISM
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            version: KDF_VERSION,
            mem_cost_kib: 65536,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Durable UCE vault: the wrapped master key plus everything needed to
/// re-derive the wrapping key except the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    /// base64(nonce || encrypted master key || tag)
    pub wrapped_master_key: String,
    /// base64 key derivation salt
    pub salt: String,
    pub kdf: KdfParams,
}

/// Tier-specific key material. Exactly one variant exists per user, so the
/// E2E and UCE fields can never both be populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "lowercase")]
pub enum TierKeyMaterial {
    E2e {
        /// base64 X25519 public key (32 bytes)
        public_key: String,
    },
    Uce {
        vault: VaultRecord,
    },
}

impl TierKeyMaterial {
    pub fn tier(&self) -> EncryptionTier {
        match self {
            TierKeyMaterial::E2e { .. } => EncryptionTier::E2e,
            TierKeyMaterial::Uce { .. } => EncryptionTier::Uce,
        }
    }
}

/// Key-bearing view of a user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeys {
    pub user_id: UserId,
    pub material: TierKeyMaterial,
    /// Unix timestamp of signup
    pub created_at: u64,
}

impl UserKeys {
    pub fn tier(&self) -> EncryptionTier {
        self.material.tier()
    }

    pub fn vault(&self) -> Option<&VaultRecord> {
        match &self.material {
            TierKeyMaterial::Uce { vault } => Some(vault),
            TierKeyMaterial::E2e { .. } => None,
        }
    }

    pub fn public_key(&self) -> Option<&str> {
        match &self.material {
            TierKeyMaterial::E2e { public_key } => Some(public_key),
            TierKeyMaterial::Uce { .. } => None,
        }
    }
}

/// Stored form of one recovery code. The plaintext code is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCodeRecord {
    /// Lowercase hex SHA-256 of the normalized code
    pub code_hash: String,
    pub used: bool,
    /// Unix timestamp of redemption
    #[serde(default)]
    pub used_at: Option<u64>,
}

impl RecoveryCodeRecord {
    pub fn unused(code_hash: String) -> Self {
        Self {
            code_hash,
            used: false,
            used_at: None,
        }
    }
}

/// Lowercase hex SHA-256 of a record's plaintext (exactly 64 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub const LEN: usize = 64;

    /// Render a raw SHA-256 digest.
    pub fn from_sha256(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DvError;

    fn try_from(s: String) -> DvResult<Self> {
        let valid = s.len() == Self::LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(DvError::InvalidInput(format!(
                "content hash must be {} lowercase hex chars",
                Self::LEN
            )));
        }
        Ok(Self(s))
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encrypted diary entry or media payload as handed to the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Opaque base64 ciphertext
    pub encrypted_content: String,
    pub content_hash: ContentHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("E2E".parse::<EncryptionTier>().unwrap(), EncryptionTier::E2e);
        assert_eq!("uce".parse::<EncryptionTier>().unwrap(), EncryptionTier::Uce);
        assert!("plain".parse::<EncryptionTier>().is_err());
        assert_eq!(EncryptionTier::Uce.to_string(), "uce");
    }

    #[test]
    fn test_e2e_has_no_server_capabilities() {
        let caps = EncryptionTier::E2e.capabilities();
        for cap in Capability::ALL {
            assert!(!caps.allows(cap), "E2E must not allow {cap}");
        }
    }

    #[test]
    fn test_uce_has_all_capabilities() {
        let caps = EncryptionTier::Uce.capabilities();
        for cap in Capability::ALL {
            assert!(caps.allows(cap), "UCE must allow {cap}");
        }
    }

    #[test]
    fn test_content_hash_validation() {
        let ok = "a".repeat(64);
        assert!(ContentHash::try_from(ok).is_ok());
        assert!(ContentHash::try_from("a".repeat(63)).is_err());
        assert!(ContentHash::try_from("A".repeat(64)).is_err());
        assert!(ContentHash::try_from("g".repeat(64)).is_err());
    }

    #[test]
    fn test_key_material_serializes_with_tier_tag() {
        let keys = UserKeys {
            user_id: UserId::new(),
            material: TierKeyMaterial::E2e {
                public_key: "AAAA".into(),
            },
            created_at: 0,
        };
        let json = serde_json::to_value(&keys).unwrap();
        assert_eq!(json["material"]["tier"], "e2e");
        assert_eq!(keys.tier(), EncryptionTier::E2e);
        assert!(keys.vault().is_none());
    }

    #[test]
    fn test_default_kdf_params_meet_minimum() {
        assert!(KdfParams::default().meets_minimum());
        let weak = KdfParams {
            time_cost: 1,
            ..KdfParams::default()
        };
        assert!(!weak.meets_minimum());
    }

    #[test]
    fn test_kdf_params_ceiling() {
        assert!(KdfParams::default().within_ceiling());
        let at_ceiling = KdfParams {
            mem_cost_kib: KdfParams::MAX_MEM_COST_KIB,
            ..KdfParams::default()
        };
        assert!(at_ceiling.within_ceiling());
        let huge = KdfParams {
            mem_cost_kib: KdfParams::MAX_MEM_COST_KIB + 1,
            ..KdfParams::default()
        };
        assert!(!huge.within_ceiling());
    }

    #[test]
    fn test_content_hash_from_digest_is_lowercase_hex() {
        let hash = ContentHash::from_sha256([0xAB; 32]);
        assert_eq!(hash.as_str(), "ab".repeat(32));
        assert!(ContentHash::try_from(hash.as_str().to_string()).is_ok());
    }
}
