//! Request handlers. The caller identity arrives as an argument, already
//! authenticated by the identity layer.

pub mod account;
pub mod binary;
pub mod entity;

use std::sync::Arc;

use keeper_crypto::{CredentialVerifier, FieldCipher, TokenService};

use crate::metrics::Metrics;

pub use account::AccountHandler;
pub use binary::BinaryHandler;
pub use entity::{Cards, EntityHandler, EntityKind, Notes, Passwords};

/// Collaborators shared by every handler, built once at startup.
pub struct AppContext<S> {
    pub store: Arc<S>,
    pub cipher: FieldCipher,
    pub verifier: CredentialVerifier,
    pub tokens: Arc<TokenService>,
    pub metrics: Metrics,
}
