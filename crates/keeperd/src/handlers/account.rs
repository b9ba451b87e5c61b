//! Ping, registration, login and the per-user summary

use std::sync::Arc;

use keeper_core::proto::{ListResponse, PingResponse, TokenResponse};
use keeper_core::UserId;
use keeper_storage::{Storage, StorageError};
use tracing::{info, warn};

use super::AppContext;
use crate::error::ServiceError;

pub struct AccountHandler<S> {
    ctx: Arc<AppContext<S>>,
}

impl<S: Storage> AccountHandler<S> {
    pub fn new(ctx: Arc<AppContext<S>>) -> Self {
        Self { ctx }
    }

    pub async fn ping(&self) -> Result<PingResponse, ServiceError> {
        self.ctx.store.ping().await?;
        Ok(PingResponse {
            message: "pong".into(),
        })
    }

    /// Create an account and return a token for it. The uniqueness check is the
    /// insert itself.
    pub async fn register(&self, login: String, password: String) -> Result<TokenResponse, ServiceError> {
        let ctx = self.ctx.clone();
        let hash = tokio::task::spawn_blocking(move || ctx.verifier.hash(&password))
            .await
            .map_err(|e| ServiceError::Internal(format!("hash task: {e}")))??;

        self.ctx.store.write_user(&login, &hash).await?;
        info!(user = %login, "account registered");
        self.issue(&login)
    }

    /// Both an unknown login and a wrong password are `Unauthenticated`, and
    /// both cost one hash verification.
    pub async fn login(&self, login: String, password: String) -> Result<TokenResponse, ServiceError> {
        let stored = match self.ctx.store.read_user(&login).await {
            Ok(user) => Some(user.passwd_hash),
            Err(StorageError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let ctx = self.ctx.clone();
        let verified = tokio::task::spawn_blocking(move || match stored {
            Some(hash) => ctx.verifier.check(&hash, &password),
            None => ctx.verifier.check_unknown(&password),
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("verify task: {e}")))?;

        if !verified {
            warn!(user = %login, "login failed");
            return Err(ServiceError::Unauthenticated);
        }
        info!(user = %login, "login succeeded");
        self.issue(&login)
    }

    pub async fn list(&self, user: &UserId) -> Result<ListResponse, ServiceError> {
        let counts = self.ctx.store.counts(user.as_str()).await?;
        Ok(ListResponse {
            passwords_count: counts.passwords,
            cards_count: counts.cards,
            notes_count: counts.notes,
            binaries_count: counts.binaries,
        })
    }

    fn issue(&self, login: &str) -> Result<TokenResponse, ServiceError> {
        let token = self.ctx.tokens.issue(login)?;
        Ok(TokenResponse { token })
    }
}
