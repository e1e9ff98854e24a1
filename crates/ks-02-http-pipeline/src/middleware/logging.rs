//! Request logging middleware.
//!
//! Wraps the rest of the chain in an `http_request` span and logs one line
//! per completed request. A W3C `traceparent` header is linked as the
//! span's parent trace.

use super::{Middleware, Next};
use crate::context::{HttpContext, HttpRequest};
use crate::error::PipelineResult;
use async_trait::async_trait;
use ks_01_container::Container;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument, Span};

/// Logs method, path, status and latency for every request.
#[derive(Debug, Clone, Default)]
pub struct RequestLoggingMiddleware;

impl RequestLoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for RequestLoggingMiddleware {
    async fn handle(
        &self,
        container: &Container<'_>,
        ctx: &mut HttpContext,
        next: Next<'_>,
    ) -> PipelineResult<()> {
        let span = info_span!(
            "http_request",
            http.method = %ctx.request.method(),
            http.target = %ctx.request.path(),
            otel.kind = "server",
            http.status_code = tracing::field::Empty,
        );
        if let Some(parent) = extract_trace_context(&ctx.request) {
            span.follows_from(&parent);
        }

        let started = Instant::now();
        let result = next.run(container, ctx).instrument(span.clone()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = ctx.response.status().map(|s| s.as_u16());
        if let Some(code) = status {
            span.record("http.status_code", code);
        }
        let upgrade = ctx.response.is_upgrade();

        span.in_scope(|| match &result {
            Ok(()) => info!(status = ?status, latency_ms, upgrade, "request completed"),
            Err(e) => warn!(error = %e, latency_ms, "request failed"),
        });

        result
    }
}

/// Span for the caller's trace, from `traceparent: version-trace_id-parent_id-flags`.
fn extract_trace_context(request: &HttpRequest) -> Option<Span> {
    let traceparent = request.header("traceparent")?;

    let parts: Vec<&str> = traceparent.split('-').collect();
    if parts.len() != 4 {
        return None;
    }

    Some(info_span!(
        "parent_trace",
        trace_id = parts[1],
        parent_span_id = parts[2]
    ))
}
