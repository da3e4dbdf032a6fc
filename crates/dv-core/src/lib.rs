pub mod config;
pub mod error;
pub mod types;

pub use error::{DvError, DvResult};
pub use types::{Capability, EncryptionTier, TierCapabilities, UserId};
