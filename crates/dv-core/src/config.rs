use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DvError, DvResult};
use crate::types::{KdfParams, KDF_VERSION};

/// Top-level configuration (loaded from diaryvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DvConfig {
    pub crypto: CryptoConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Key derivation and recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 2)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 1)
    pub argon2_parallelism: u32,
    /// Upper bound on a single KDF call; expiry fails the request (default: 5)
    pub kdf_timeout_secs: u64,
    /// Recovery codes issued to E2E users at signup (default: 10)
    pub recovery_code_count: usize,
    /// Salt length in bytes for new vaults (default: 32)
    pub salt_len: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            kdf_timeout_secs: 5,
            recovery_code_count: 10,
            salt_len: 32,
        }
    }
}

impl CryptoConfig {
    /// KDF parameters new vaults are created (and rewrapped) with.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            version: KDF_VERSION,
            mem_cost_kib: self.argon2_mem_cost_kib,
            time_cost: self.argon2_time_cost,
            parallelism: self.argon2_parallelism,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON key store path
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/diaryvault/keys.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl DvConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(content: &str) -> DvResult<Self> {
        let config: DvConfig =
            toml::from_str(content).map_err(|e| DvError::Config(format!("parsing: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> DvResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject settings that would silently weaken key derivation.
    pub fn validate(&self) -> DvResult<()> {
        let c = &self.crypto;
        if !c.kdf_params().meets_minimum() {
            return Err(DvError::Config(format!(
                "Argon2id params below floor: mem={} KiB (min {}), time={} (min {}), parallelism={}",
                c.argon2_mem_cost_kib,
                KdfParams::MIN_MEM_COST_KIB,
                c.argon2_time_cost,
                KdfParams::MIN_TIME_COST,
                c.argon2_parallelism
            )));
        }
        if !c.kdf_params().within_ceiling() {
            return Err(DvError::Config(format!(
                "Argon2id params above ceiling: mem={} KiB (max {}), time={} (max {}), parallelism={} (max {})",
                c.argon2_mem_cost_kib,
                KdfParams::MAX_MEM_COST_KIB,
                c.argon2_time_cost,
                KdfParams::MAX_TIME_COST,
                c.argon2_parallelism,
                KdfParams::MAX_PARALLELISM
            )));
        }
        if c.salt_len < 16 {
            return Err(DvError::Config(format!(
                "salt_len must be at least 16 bytes, got {}",
                c.salt_len
            )));
        }
        if c.recovery_code_count == 0 {
            return Err(DvError::Config("recovery_code_count must be positive".into()));
        }
        if c.kdf_timeout_secs == 0 {
            return Err(DvError::Config("kdf_timeout_secs must be positive".into()));
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(DvError::Config(format!(
                "logging.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}
