//! keeperd: multi-tenant secret vault daemon
//!
//! Wiring, outermost first:
//! ```text
//! TCP → RequestLogLayer → AuthLayer → KeeperServer
//!     → Validate → handler (account | entity<kind> | binary)
//!     → FieldCipher / CredentialVerifier / TokenService → Storage
//! ```

pub mod auth;
pub mod daemon;
pub mod error;
pub mod grpc;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod validate;

pub use error::ServiceError;
pub use handlers::AppContext;
