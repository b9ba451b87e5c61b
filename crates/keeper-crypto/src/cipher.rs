//! Field-level XChaCha20-Poly1305 encryption/decryption
//!
//! Sealed value format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! Fields are sealed without AAD: the cipher does not know which field or
//! record it protects. Binary payload segments are sealed with
//! ```text
//! AAD = object_id (8, BE) || generation (8, BE) || segment_index (8, BE)
//! ```
//! so segments cannot be reordered, moved between objects, or mixed between
//! two uploads to the same object.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::CryptoError;
use crate::keys::FieldKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Length of the sealed form of a `plain_len`-byte value.
pub const fn sealed_len(plain_len: usize) -> usize {
    NONCE_SIZE + plain_len + TAG_SIZE
}

/// Stateless authenticated cipher shared by every request.
#[derive(Debug, Clone)]
pub struct FieldCipher {
    key: FieldKey,
}

impl FieldCipher {
    pub fn new(key: FieldKey) -> Self {
        Self { key }
    }

    /// Build a cipher from a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        FieldKey::from_hex(hex_key).map(Self::new)
    }

    /// Seal one field value. Every call uses a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.seal(plaintext, &[])
    }

    /// Open one field value sealed by [`FieldCipher::encrypt`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.open(sealed, &[])
    }

    /// Seal one binary payload segment bound to its object, the upload
    /// generation it belongs to and its position.
    pub fn seal_segment(
        &self,
        object_id: i64,
        generation: i64,
        index: u64,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.seal(plaintext, &segment_aad(object_id, generation, index))
    }

    /// Open a segment sealed by [`FieldCipher::seal_segment`].
    pub fn open_segment(
        &self,
        object_id: i64,
        generation: i64,
        index: u64,
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.open(sealed, &segment_aad(object_id, generation, index))
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);
        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

fn segment_aad(object_id: i64, generation: i64, index: u64) -> [u8; 24] {
    let mut aad = [0u8; 24];
    aad[..8].copy_from_slice(&object_id.to_be_bytes());
    aad[8..16].copy_from_slice(&generation.to_be_bytes());
    aad[16..].copy_from_slice(&index.to_be_bytes());
    aad
}
