//! Field key handling: hex provisioning, generation, zeroize-on-drop

use rand::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::KEY_SIZE;

/// A 256-bit symmetric key protecting every sensitive field. Zeroized on drop.
#[derive(Clone)]
pub struct FieldKey {
    bytes: [u8; KEY_SIZE],
}

impl FieldKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Parse a key from 64 hex characters.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let mut decoded = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not hex: {e}")))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "wrong size: {len} bytes (expected {KEY_SIZE})"
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// Generate a random key (tests and key provisioning tooling).
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FieldKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
