use thiserror::Error;

pub type DvResult<T> = Result<T, DvError>;

/// Error taxonomy for the key-management core.
///
/// `DecryptionFailed`, `InvalidPasswordOrCorruptVault` and `InvalidRecoveryCode`
/// carry no detail: wrong key, tampered ciphertext, unknown code
/// and spent code must all look the same to a caller.
#[derive(Debug, Error)]
pub enum DvError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid password or corrupt vault")]
    InvalidPasswordOrCorruptVault,

    #[error("invalid recovery code")]
    InvalidRecoveryCode,

    #[error("tier capability error: {0}")]
    TierCapability(&'static str),

    #[error("key derivation timed out after {0}s")]
    KdfTimeout(u64),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DvError {
    /// Message safe to show an end user. Never names the internal variant.
    pub fn public_message(&self) -> &'static str {
        match self {
            DvError::InvalidPasswordOrCorruptVault | DvError::InvalidRecoveryCode => {
                "invalid credentials"
            }
            DvError::DecryptionFailed | DvError::InvalidKey(_) => "unable to decrypt",
            DvError::TierCapability(_) => "operation not available for this account",
            DvError::InvalidInput(_) => "invalid request",
            DvError::KdfTimeout(_)
            | DvError::Store(_)
            | DvError::Config(_)
            | DvError::Io(_)
            | DvError::Other(_) => "internal error",
        }
    }

    /// Crypto failures are terminal; nothing in this taxonomy is worth retrying
    /// except a transient store error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DvError::Store(_) | DvError::Io(_))
    }
}
