//! Storage health check

use crate::Storage;

/// Returns true if the database answers a ping (non-panicking)
pub async fn is_healthy<S: Storage>(store: &S) -> bool {
    match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "storage health check failed");
            false
        }
    }
}
