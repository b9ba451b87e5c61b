//! Identity layer: bearer token → [`UserId`] in the request extensions
//!
//! Runs in front of the tonic router, so a rejected call never reaches a
//! handler. Calls listed in [`PUBLIC_METHODS`] pass through untouched.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use keeper_core::{UserId, TOKEN_METADATA_KEY};
use keeper_crypto::TokenService;
use tonic::codegen::http::{HeaderMap, Request, Response};
use tonic::Status;
use tower::{Layer, Service};

use crate::error::UNAUTHENTICATED;

/// gRPC paths reachable without a token
pub const PUBLIC_METHODS: &[&str] = &[
    "/keeper.v1.Keeper/Ping",
    "/keeper.v1.Keeper/Register",
    "/keeper.v1.Keeper/Login",
];

pub fn is_public(path: &str) -> bool {
    PUBLIC_METHODS.contains(&path)
}

/// Resolve the caller from the `token` metadata entry.
pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> Result<UserId, Status> {
    let token = headers
        .get(TOKEN_METADATA_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Status::unauthenticated(UNAUTHENTICATED))?;

    tokens
        .validate(token)
        .map(UserId::new)
        .map_err(|_| Status::unauthenticated(UNAUTHENTICATED))
}

#[derive(Clone)]
pub struct AuthLayer {
    tokens: Arc<TokenService>,
}

impl AuthLayer {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            tokens: self.tokens.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    tokens: Arc<TokenService>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if !is_public(req.uri().path()) {
            match authenticate(&self.tokens, req.headers()) {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                }
                Err(status) => {
                    tracing::debug!(path = %req.uri().path(), "rejected unauthenticated call");
                    let response = status.into_http::<ResBody>();
                    return Box::pin(async move { Ok(response) });
                }
            }
        }
        Box::pin(self.inner.call(req))
    }
}
