//! ChaCha20-Poly1305 record encryption
//!
//! Stored format (base64 of the concatenation):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! Nonces are always drawn here from the OS CSPRNG; callers cannot supply
//! one. Every decrypt failure, whatever the cause, is `DecryptionFailed`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use dv_core::{DvError, DvResult};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// An AEAD output split into its three stored parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl Sealed {
    /// `nonce || ciphertext || tag`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len() + TAG_SIZE);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn from_bytes(data: &[u8]) -> DvResult<Self> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(DvError::DecryptionFailed);
        }
        let (nonce, rest) = data.split_at(NONCE_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

        let mut sealed = Sealed {
            nonce: [0u8; NONCE_SIZE],
            ciphertext: ciphertext.to_vec(),
            tag: [0u8; TAG_SIZE],
        };
        sealed.nonce.copy_from_slice(nonce);
        sealed.tag.copy_from_slice(tag);
        Ok(sealed)
    }

    /// The `encrypted_content` string stored by the persistence layer.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> DvResult<Self> {
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|_| DvError::DecryptionFailed)?;
        Self::from_bytes(&data)
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: Option<&[u8]>) -> DvResult<Sealed> {
    let cipher = ChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(
            Nonce::from_slice(&nonce_bytes),
            aad.unwrap_or_default(),
            &mut buffer,
        )
        .map_err(|_| DvError::InvalidInput("plaintext too large for a single record".into()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt and authenticate. The plaintext buffer is zeroized on drop.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    sealed: &Sealed,
    aad: Option<&[u8]>,
) -> DvResult<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(key.into());

    let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.nonce),
            aad.unwrap_or_default(),
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        )
        .map_err(|_| DvError::DecryptionFailed)?;

    Ok(buffer)
}

/// Encrypt and encode as `base64(nonce || ciphertext || tag)`.
pub fn encrypt_to_string(
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
    aad: Option<&[u8]>,
) -> DvResult<String> {
    encrypt(key, plaintext, aad).map(|sealed| sealed.to_base64())
}

/// Decode and decrypt the output of [`encrypt_to_string`].
pub fn decrypt_str(
    key: &[u8; KEY_SIZE],
    encoded: &str,
    aad: Option<&[u8]>,
) -> DvResult<Zeroizing<Vec<u8>>> {
    let sealed = Sealed::from_base64(encoded)?;
    decrypt(key, &sealed, aad)
}

/// Shape check without a key: valid base64 holding at least a nonce and a tag.
pub fn verify_encrypted_content(encoded: &str) -> bool {
    Sealed::from_base64(encoded).is_ok()
}
