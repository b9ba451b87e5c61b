//! keeper-crypto: server-side secret protection for Keeper
//!
//! Three independent primitives, all keyed from process configuration:
//! ```text
//! Field key (256-bit, provisioned)
//!   ├── Field AEAD: XChaCha20-Poly1305 (nonce=random_192bit, no AAD)
//!   └── Segment AEAD: XChaCha20-Poly1305 (nonce=random_192bit, AAD=object_id||segment_idx)
//! Password pepper → Argon2id PHC hashes (random per-hash salt)
//! Token secret    → HS256 compact tokens {sub, iat, exp}
//! ```

pub mod cipher;
pub mod error;
pub mod keys;
pub mod password;
pub mod token;

pub use cipher::{sealed_len, FieldCipher};
pub use error::CryptoError;
pub use keys::FieldKey;
pub use password::{CredentialVerifier, HashParams};
pub use token::TokenService;

/// Size of a field key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
