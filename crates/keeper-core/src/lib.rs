pub mod config;
pub mod error;
pub mod types;

pub use error::{KeeperError, KeeperResult};
pub use types::{SecretKind, UserId};

/// Generated gRPC types and service traits (from keeper.proto)
pub mod proto {
    tonic::include_proto!("keeper.v1");
}

/// Metadata key carrying the bearer token on authenticated calls
pub const TOKEN_METADATA_KEY: &str = "token";

/// Maximum plaintext bytes carried by one download message
pub const CHUNK_SIZE: usize = 4096;
