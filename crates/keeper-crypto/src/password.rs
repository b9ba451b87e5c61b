//! Credential hashing: Argon2id with a process-wide pepper
//!
//! Each hash carries its own random salt in PHC form. The pepper is passed to
//! Argon2 as its secret input and never stored alongside the hash.

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

use crate::error::CryptoError;

/// Argon2id cost parameters
#[derive(Debug, Clone)]
pub struct HashParams {
    /// Memory cost in KiB (default: 19456 = 19 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 2)
    pub time_cost: u32,
    /// Parallelism (default: 1)
    pub parallelism: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Hashes and checks account passwords.
pub struct CredentialVerifier {
    pepper: SecretString,
    params: Params,
    /// Hash of a random password; checked against when the account does not
    /// exist so both login failures cost the same.
    dummy_hash: String,
}

impl CredentialVerifier {
    pub fn new(pepper: &str, params: &HashParams) -> Result<Self, CryptoError> {
        let params = Params::new(
            params.mem_cost_kib,
            params.time_cost,
            params.parallelism,
            None,
        )
        .map_err(|e| CryptoError::Hash(format!("invalid Argon2id params: {e}")))?;

        let mut verifier = Self {
            pepper: SecretString::from(pepper.to_owned()),
            params,
            dummy_hash: String::new(),
        };
        let filler = SaltString::generate(&mut OsRng);
        verifier.dummy_hash = verifier.hash(filler.as_str())?;
        Ok(verifier)
    }

    fn argon2(&self) -> Result<Argon2<'_>, CryptoError> {
        Argon2::new_with_secret(
            self.pepper.expose_secret().as_bytes(),
            Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
        .map_err(|e| CryptoError::Hash(e.to_string()))
    }

    /// Hash a password, returning a PHC string with an embedded random salt.
    pub fn hash(&self, password: &str) -> Result<String, CryptoError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CryptoError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// True iff `password` matches `stored_hash`. Malformed hashes never match.
    pub fn check(&self, stored_hash: &str, password: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        match self.argon2() {
            Ok(argon2) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    /// Burn one verification for a login name that has no account.
    /// Always returns false.
    pub fn check_unknown(&self, password: &str) -> bool {
        let _ = self.check(&self.dummy_hash, password);
        false
    }
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("pepper", &"[REDACTED]")
            .field("params", &self.params)
            .finish()
    }
}
