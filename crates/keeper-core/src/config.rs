use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{KeeperError, KeeperResult};

/// Development token secret, rejected at startup unless
/// `auth.allow_insecure_defaults` is set.
pub const DEV_TOKEN_SECRET: &str = "keeper-dev-token-secret";

/// Development password pepper, see [`DEV_TOKEN_SECRET`].
pub const DEV_PASSWORD_SALT: &str = "keeper-dev-password-salt";

/// Development field key (hex, 256-bit), see [`DEV_TOKEN_SECRET`].
pub const DEV_FIELD_KEY: &str = "6b65657065722d6465762d6669656c642d6b65792d6e6f742d666f722d70726f";

/// Top-level daemon configuration (loaded from keeper.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub crypto: CryptoConfig,
}

impl KeeperConfig {
    /// Parse a TOML document; an empty document yields all defaults.
    pub fn from_toml(content: &str) -> KeeperResult<Self> {
        toml::from_str(content).map_err(|e| KeeperError::Config(e.to_string()))
    }

    /// True if any secret still holds its built-in development value
    pub fn uses_insecure_defaults(&self) -> bool {
        self.auth.token_secret == DEV_TOKEN_SECRET
            || self.auth.password_salt == DEV_PASSWORD_SALT
            || self.crypto.field_key == DEV_FIELD_KEY
    }

    /// Reject configurations the daemon cannot safely start with.
    pub fn validate(&self) -> KeeperResult<()> {
        if self.auth.token_secret.is_empty() {
            return Err(KeeperError::Config("auth.token_secret must not be empty".into()));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(KeeperError::Config("auth.token_ttl_secs must be positive".into()));
        }
        if self.crypto.field_key.len() != 64
            || !self.crypto.field_key.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(KeeperError::Config(
                "crypto.field_key must be 64 hex characters (256-bit key)".into(),
            ));
        }
        if self.storage.max_connections == 0 {
            return Err(KeeperError::Config("storage.max_connections must be positive".into()));
        }
        if self.uses_insecure_defaults() && !self.auth.allow_insecure_defaults {
            return Err(KeeperError::Config(
                "built-in development secrets in use; set auth.token_secret, auth.password_salt \
                 and crypto.field_key, or auth.allow_insecure_defaults = true for local testing"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP listen address for gRPC (default: 127.0.0.1:28000)
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlx database URL (default: sqlite://keeper.db)
    pub database_url: String,
    /// Connection pool upper bound (default: 3)
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret used to sign identity tokens
    pub token_secret: String,
    /// Token lifetime in seconds (default: 3600)
    pub token_ttl_secs: u64,
    /// Process-wide password pepper mixed into every credential hash
    pub password_salt: String,
    /// Argon2id memory cost in KiB (default: 19456 = 19 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 2)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 1)
    pub argon2_parallelism: u32,
    /// Permit the built-in development secrets (default: false)
    pub allow_insecure_defaults: bool,
}

/// Field encryption configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// 256-bit symmetric key as 64 hex characters
    pub field_key: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("password_salt", &"[REDACTED]")
            .field("argon2_mem_cost_kib", &self.argon2_mem_cost_kib)
            .field("argon2_time_cost", &self.argon2_time_cost)
            .field("argon2_parallelism", &self.argon2_parallelism)
            .field("allow_insecure_defaults", &self.allow_insecure_defaults)
            .finish()
    }
}

impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("field_key", &"[REDACTED]")
            .finish()
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:28000".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://keeper.db".into(),
            max_connections: 3,
            acquire_timeout_secs: 30,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: DEV_TOKEN_SECRET.into(),
            token_ttl_secs: 3600,
            password_salt: DEV_PASSWORD_SALT.into(),
            argon2_mem_cost_kib: 19 * 1024,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            allow_insecure_defaults: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            field_key: DEV_FIELD_KEY.into(),
        }
    }
}
