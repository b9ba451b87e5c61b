//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  Liveness probe (always 200 if process is running)
//!   GET /readyz   Readiness probe (200 if the database answers a ping)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use keeper_storage::Storage;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RpcLabels {
    pub method: String,
    pub code: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MethodLabels {
    pub method: String,
}

type DurationFamily = Family<MethodLabels, Histogram, fn() -> Histogram>;

fn duration_histogram() -> Histogram {
    // 1ms .. ~16s
    Histogram::new(exponential_buckets(0.001, 2.0, 15))
}

/// Service-level counters. Cloning shares the underlying metrics.
#[derive(Clone)]
pub struct Metrics {
    requests: Family<RpcLabels, Counter>,
    duration: DurationFamily,
    upload_bytes: Counter,
    download_bytes: Counter,
}

impl Metrics {
    /// Create the metrics and register them under the `keeper_` prefix.
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self {
            requests: Family::default(),
            duration: Family::new_with_constructor(duration_histogram),
            upload_bytes: Counter::default(),
            download_bytes: Counter::default(),
        };
        registry.register(
            "keeper_rpc_requests",
            "RPC calls by method and gRPC status code",
            metrics.requests.clone(),
        );
        registry.register(
            "keeper_rpc_duration_seconds",
            "RPC latency by method",
            metrics.duration.clone(),
        );
        registry.register(
            "keeper_upload_bytes",
            "Plaintext payload bytes accepted by BinaryUpload",
            metrics.upload_bytes.clone(),
        );
        registry.register(
            "keeper_download_bytes",
            "Plaintext payload bytes sent by BinaryDownload",
            metrics.download_bytes.clone(),
        );
        metrics
    }

    /// Metrics attached to a throwaway registry (tests, metrics disabled).
    pub fn unregistered() -> Self {
        Self::register(&mut Registry::default())
    }

    pub fn observe_rpc(&self, method: &str, code: &str, elapsed: Duration) {
        self.requests
            .get_or_create(&RpcLabels {
                method: method.to_owned(),
                code: code.to_owned(),
            })
            .inc();
        self.duration
            .get_or_create(&MethodLabels {
                method: method.to_owned(),
            })
            .observe(elapsed.as_secs_f64());
    }

    pub fn add_upload_bytes(&self, n: u64) {
        self.upload_bytes.inc_by(n);
    }

    pub fn add_download_bytes(&self, n: u64) {
        self.download_bytes.inc_by(n);
    }
}

/// Shared state for the HTTP endpoints
pub struct HealthState<S> {
    pub registry: Arc<Registry>,
    pub store: Arc<S>,
}

impl<S> Clone for HealthState<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            store: self.store.clone(),
        }
    }
}

pub fn router<S: Storage>(state: HealthState<S>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler::<S>))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler::<S>))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve<S: Storage>(addr: String, state: HealthState<S>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler<S: Storage>(State(state): State<HealthState<S>>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if the database is reachable, 503 otherwise.
async fn readyz_handler<S: Storage>(State(state): State<HealthState<S>>) -> impl IntoResponse {
    if keeper_storage::is_healthy(state.store.as_ref()).await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable")
    }
}
