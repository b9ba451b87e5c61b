//! Identity tokens: compact HS256 JWS carrying the user id
//!
//! ```text
//! base64url(header) "." base64url(claims) "." base64url(HMAC-SHA256(secret, header "." claims))
//! ```
//! Only `alg = HS256` is accepted. Tokens are stateless; there is no revocation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// Issues and validates identity tokens under one process-wide secret.
pub struct TokenService {
    secret: SecretString,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: SecretString::from(secret.to_owned()),
            ttl,
        }
    }

    /// Issue a token for `user_id` expiring `ttl` from now.
    pub fn issue(&self, user_id: &str) -> Result<String, CryptoError> {
        self.issue_at(user_id, unix_now())
    }

    /// Return the user id carried by a valid, unexpired token.
    pub fn validate(&self, token: &str) -> Result<String, CryptoError> {
        self.validate_at(token, unix_now())
    }

    fn issue_at(&self, user_id: &str, now: u64) -> Result<String, CryptoError> {
        let header = Header {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        };
        let claims = Claims {
            sub: user_id.to_owned(),
            iat: now,
            exp: now.saturating_add(self.ttl.as_secs()),
        };

        let header = serde_json::to_vec(&header).map_err(|_| CryptoError::EncryptFailed)?;
        let claims = serde_json::to_vec(&claims).map_err(|_| CryptoError::EncryptFailed)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    fn validate_at(&self, token: &str, now: u64) -> Result<String, CryptoError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::InvalidToken);
        };

        let header: Header = decode_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(CryptoError::InvalidToken);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| CryptoError::InvalidToken)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CryptoError::InvalidToken)?;

        let claims: Claims = decode_json(claims_b64)?;
        if claims.exp <= now || claims.sub.is_empty() {
            return Err(CryptoError::InvalidToken);
        }
        Ok(claims.sub)
    }

    fn mac(&self) -> Result<HmacSha256, CryptoError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| CryptoError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| CryptoError::InvalidToken)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
