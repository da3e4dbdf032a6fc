//! X25519 self-sealing for the E2E tier
//!
//! A record is sealed to the owner's own public key with a fresh ephemeral
//! keypair, so anyone holding only the public key (the server, or another
//! of the user's devices) can write, and only the device secret can read.
//!
//! Sealed format (base64 of the concatenation):
//! ```text
//! [32 bytes: ephemeral X25519 public key][12 bytes: nonce][N bytes: ciphertext][16 bytes: tag]
//! key = HKDF-SHA256(ikm = X25519(eph, owner), salt = eph_pub || owner_pub, info = "diaryvault-e2e-seal-v1")
//! ```
//!
//! The secret key is a client-side value. Nothing in the server path accepts
//! one; see `tier::E2eStrategy`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dv_core::{DvError, DvResult};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::cipher::{self, Sealed};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE, X25519_KEY_SIZE};

const SEAL_INFO: &[u8] = b"diaryvault-e2e-seal-v1";

/// A device's X25519 keypair. The secret half zeroizes itself on drop.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from a stored device secret.
    pub fn from_secret_bytes(bytes: &[u8]) -> DvResult<Self> {
        let secret = parse_secret_key(bytes)?;
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// base64 public key, the only half the server persists.
    pub fn public_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Raw secret for the device keystore.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; X25519_KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Parse and length-check a base64 X25519 public key.
pub fn validate_public_key(public_key_b64: &str) -> DvResult<PublicKey> {
    let decoded = STANDARD
        .decode(public_key_b64.trim())
        .map_err(|e| DvError::InvalidKey(format!("public key is not base64: {e}")))?;
    let bytes: [u8; X25519_KEY_SIZE] = decoded.as_slice().try_into().map_err(|_| {
        DvError::InvalidKey(format!(
            "public key must be {X25519_KEY_SIZE} bytes, got {}",
            decoded.len()
        ))
    })?;
    Ok(PublicKey::from(bytes))
}

/// Length-check a raw X25519 secret key.
pub fn parse_secret_key(bytes: &[u8]) -> DvResult<StaticSecret> {
    let mut raw: Zeroizing<[u8; X25519_KEY_SIZE]> = Zeroizing::new([0u8; X25519_KEY_SIZE]);
    if bytes.len() != X25519_KEY_SIZE {
        return Err(DvError::InvalidKey(format!(
            "secret key must be {X25519_KEY_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    raw.copy_from_slice(bytes);
    Ok(StaticSecret::from(*raw))
}

fn derive_seal_key(
    shared: &[u8; X25519_KEY_SIZE],
    ephemeral_public: &PublicKey,
    owner_public: &PublicKey,
) -> DvResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut salt = [0u8; 2 * X25519_KEY_SIZE];
    salt[..X25519_KEY_SIZE].copy_from_slice(ephemeral_public.as_bytes());
    salt[X25519_KEY_SIZE..].copy_from_slice(owner_public.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(SEAL_INFO, &mut okm[..])
        .map_err(|e| DvError::Other(anyhow::anyhow!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Seal `plaintext` so only the holder of `owner`'s secret key can open it.
pub fn seal_for_self(owner: &PublicKey, plaintext: &[u8]) -> DvResult<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(owner);
    if !shared.was_contributory() {
        return Err(DvError::InvalidKey("public key is a low-order point".into()));
    }

    let key = derive_seal_key(shared.as_bytes(), &ephemeral_public, owner)?;
    let sealed = cipher::encrypt(&key, plaintext, None)?;

    let body = sealed.to_bytes();
    let mut out = Vec::with_capacity(X25519_KEY_SIZE + body.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Open a blob produced by [`seal_for_self`].
///
/// Wrong secret, truncation and tampering all yield `DecryptionFailed`.
pub fn open_self(secret: &StaticSecret, sealed: &[u8]) -> DvResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < X25519_KEY_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(DvError::DecryptionFailed);
    }
    let (eph_bytes, body) = sealed.split_at(X25519_KEY_SIZE);
    let mut eph = [0u8; X25519_KEY_SIZE];
    eph.copy_from_slice(eph_bytes);
    let ephemeral_public = PublicKey::from(eph);
    let owner_public = PublicKey::from(secret);

    let shared = secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(DvError::DecryptionFailed);
    }

    let key = derive_seal_key(shared.as_bytes(), &ephemeral_public, &owner_public)
        .map_err(|_| DvError::DecryptionFailed)?;
    cipher::decrypt(&key, &Sealed::from_bytes(body)?, None)
}

/// Seal and encode for storage.
pub fn seal_to_string(owner: &PublicKey, plaintext: &[u8]) -> DvResult<String> {
    seal_for_self(owner, plaintext).map(|blob| STANDARD.encode(blob))
}

/// Decode and open the output of [`seal_to_string`].
pub fn open_str(secret: &StaticSecret, encoded: &str) -> DvResult<Zeroizing<Vec<u8>>> {
    let blob = STANDARD
        .decode(encoded.trim())
        .map_err(|_| DvError::DecryptionFailed)?;
    open_self(secret, &blob)
}
