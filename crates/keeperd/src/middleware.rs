//! Request logging and RPC metrics
//!
//! Logs the method on entry and the gRPC status plus latency on exit. Bodies
//! are never logged.

use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use tonic::codegen::http::{HeaderMap, Request, Response};
use tower::{Layer, Service};

use crate::metrics::Metrics;

/// Short method name from a gRPC path: `/keeper.v1.Keeper/CardRead` → `CardRead`.
pub fn method_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Status code carried in the response headers. Errors returned before the
/// first message travel as trailers-only responses and are visible here; a
/// missing header means the call completed (or will complete) normally.
fn grpc_code(headers: &HeaderMap) -> String {
    let code = headers
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i32>().ok())
        .map(tonic::Code::from)
        .unwrap_or(tonic::Code::Ok);
    format!("{code:?}")
}

#[derive(Clone)]
pub struct RequestLogLayer {
    metrics: Metrics,
}

impl RequestLogLayer {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLog {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestLog<S> {
    inner: S,
    metrics: Metrics,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLog<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = method_name(req.uri().path()).to_owned();
        let metrics = self.metrics.clone();
        let started = Instant::now();
        tracing::info!(method = %method, "rpc started");

        let fut = self.inner.call(req);
        Box::pin(async move {
            let result = fut.await;
            let elapsed = started.elapsed();
            let code = match &result {
                Ok(response) => grpc_code(response.headers()),
                Err(_) => "TransportError".to_owned(),
            };
            metrics.observe_rpc(&method, &code, elapsed);
            tracing::info!(
                method = %method,
                code = %code,
                elapsed_ms = elapsed.as_millis() as u64,
                "rpc finished"
            );
            result
        })
    }
}
