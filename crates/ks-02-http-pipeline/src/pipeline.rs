//! # Pipeline
//!
//! Immutable ordered middleware chain plus the request error hook.
//!
//! ```text
//! axum request
//!      │
//!      ▼
//! child container ◄── root container
//!      │
//!      ▼
//! HttpContext ──► m1 ──► m2 ──► … ──► (no-op)
//!      │
//!      ├── Ok           → response (404 when untouched)
//!      ├── Err          → onRequestError hook → response (500 when unset)
//!      └── panic        → Panicked error → hook → response
//! ```
//!
//! Every dispatched request produces exactly one response, and the error
//! hook runs at most once per request.

use crate::context::HttpContext;
use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::middleware::{Middleware, Next};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use ks_01_container::Container;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Default cap on buffered request bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Called once for a request whose chain failed.
///
/// The hook owns the response at that point: it may clear, set a status and
/// write a body. Status left unset becomes 500.
pub trait RequestErrorHook: Send + Sync {
    fn on_request_error(&self, ctx: &mut HttpContext, error: &PipelineError);
}

impl<F> RequestErrorHook for F
where
    F: Fn(&mut HttpContext, &PipelineError) + Send + Sync,
{
    fn on_request_error(&self, ctx: &mut HttpContext, error: &PipelineError) {
        self(ctx, error)
    }
}

/// Logs the error and writes a body that leaks no internal type names.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHook;

impl RequestErrorHook for DefaultErrorHook {
    fn on_request_error(&self, ctx: &mut HttpContext, error: &PipelineError) {
        ctx.response.reset();

        let written = match error {
            PipelineError::Validation(e) => {
                warn!(error = %e, "request rejected by validation");
                ctx.response.set_status(StatusCode::BAD_REQUEST);
                ctx.response.write_json(&json!({
                    "error": "validation",
                    "type": e.type_name,
                    "field": e.field,
                    "message": e.message,
                }))
            }
            e if e.is_client_error() => {
                warn!(error = %e, "bad request");
                ctx.response.set_status(StatusCode::BAD_REQUEST);
                ctx.response.write_json(&json!({ "error": "bad_request" }))
            }
            e => {
                error!(
                    error = %e,
                    method = %ctx.request.method(),
                    path = %ctx.request.path(),
                    "request failed"
                );
                ctx.response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                ctx.response
                    .write_json(&json!({ "error": "internal_server_error" }))
            }
        };

        if let Err(e) = written {
            error!(error = %e, "failed to render error response");
        }
    }
}

/// Builder for [`Pipeline`]. Registration order is execution order.
pub struct PipelineBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
    error_hook: Arc<dyn RequestErrorHook>,
    max_body_bytes: usize,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
            error_hook: Arc::new(DefaultErrorHook),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Append a middleware.
    #[must_use]
    pub fn use_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware.
    #[must_use]
    pub fn use_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Replace the request error hook.
    #[must_use]
    pub fn on_request_error<H: RequestErrorHook + 'static>(mut self, hook: H) -> Self {
        self.error_hook = Arc::new(hook);
        self
    }

    #[must_use]
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn build(self) -> Pipeline {
        debug!(
            middleware = ?self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            "pipeline built"
        );
        Pipeline {
            middleware: self.middleware,
            error_hook: self.error_hook,
            max_body_bytes: self.max_body_bytes,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }
}

/// Ordered middleware chain; immutable once built.
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
    error_hook: Arc<dyn RequestErrorHook>,
    max_body_bytes: usize,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run one request through the chain in a child scope of `root`.
    pub async fn dispatch(&self, root: &Container<'_>, request: Request<Body>) -> Response {
        let started = Instant::now();

        let mut ctx = match HttpContext::from_axum(request, self.max_body_bytes).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "request rejected before pipeline");
                self.metrics.record_rejection();
                self.metrics
                    .record_request(started.elapsed().as_millis() as u64);
                return (StatusCode::PAYLOAD_TOO_LARGE, "request body rejected").into_response();
            }
        };

        let scope = root.new_child();
        let outcome = AssertUnwindSafe(Next::new(&self.middleware).run(&scope, &mut ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                self.metrics.record_panic();
                Err(PipelineError::Panicked(panic_message(panic.as_ref())))
            });

        let fallback = match outcome {
            Ok(()) if ctx.response.is_untouched() => {
                self.metrics.record_not_found();
                StatusCode::NOT_FOUND
            }
            Ok(()) => StatusCode::OK,
            Err(e) => {
                self.metrics.record_failure();
                self.report(&mut ctx, &e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        self.metrics
            .record_request(started.elapsed().as_millis() as u64);
        ctx.response.into_response(fallback)
    }

    /// Hand the failure to the hook; a panicking hook still yields a 500.
    fn report(&self, ctx: &mut HttpContext, error: &PipelineError) {
        let hook = &self.error_hook;
        let reported =
            std::panic::catch_unwind(AssertUnwindSafe(|| hook.on_request_error(ctx, error)));
        if let Err(panic) = reported {
            error!(
                panic = %panic_message(panic.as_ref()),
                "request error hook panicked"
            );
            ctx.response.reset();
            ctx.response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineResult;
    use async_trait::async_trait;
    use ks_01_container::ContainerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ===== TEST FIXTURES =====

    struct Hello;

    #[async_trait]
    impl Middleware for Hello {
        async fn handle(
            &self,
            _container: &Container<'_>,
            ctx: &mut HttpContext,
            _next: Next<'_>,
        ) -> PipelineResult<()> {
            ctx.response.write_text("hello");
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Middleware for Failing {
        async fn handle(
            &self,
            _container: &Container<'_>,
            ctx: &mut HttpContext,
            _next: Next<'_>,
        ) -> PipelineResult<()> {
            ctx.response.write_text("partial");
            Err(ContainerError::unresolved::<String>().into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Middleware for Panicking {
        async fn handle(
            &self,
            _container: &Container<'_>,
            _ctx: &mut HttpContext,
            _next: Next<'_>,
        ) -> PipelineResult<()> {
            panic!("middleware exploded");
        }
    }

    /// Registers a per-request value in the scoped container.
    struct ScopeWriter;

    struct RequestId(u32);

    #[async_trait]
    impl Middleware for ScopeWriter {
        async fn handle(
            &self,
            container: &Container<'_>,
            ctx: &mut HttpContext,
            next: Next<'_>,
        ) -> PipelineResult<()> {
            container.register_instance(RequestId(7))?;
            next.run(container, ctx).await
        }
    }

    struct ScopeReader;

    #[async_trait]
    impl Middleware for ScopeReader {
        async fn handle(
            &self,
            container: &Container<'_>,
            ctx: &mut HttpContext,
            _next: Next<'_>,
        ) -> PipelineResult<()> {
            let id = container.resolve::<RequestId>()?;
            ctx.response.write_text(&id.0.to_string());
            Ok(())
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ===== TESTS =====

    #[tokio::test]
    async fn test_written_response_defaults_to_ok() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder().use_middleware(Hello).build();

        let response = pipeline.dispatch(&root, get("/")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "hello");
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_not_found() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder().build();

        let response = pipeline.dispatch(&root, get("/")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(pipeline.metrics().snapshot().requests_not_found, 1);
    }

    #[tokio::test]
    async fn test_error_goes_to_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let root = Container::new_root();
        let pipeline = Pipeline::builder()
            .use_middleware(Failing)
            .on_request_error(move |ctx: &mut HttpContext, e: &PipelineError| {
                seen.fetch_add(1, Ordering::SeqCst);
                assert!(matches!(e, PipelineError::Dependency(_)));
                ctx.response.clear();
                ctx.response.set_status(StatusCode::SERVICE_UNAVAILABLE);
            })
            .build();

        let response = pipeline.dispatch(&root, get("/")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_hook_hides_internals() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder().use_middleware(Failing).build();

        let response = pipeline.dispatch(&root, get("/")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(!body.contains("String"));
        assert!(!body.contains("partial"));
        assert_eq!(pipeline.metrics().snapshot().requests_failed, 1);
    }

    #[tokio::test]
    async fn test_unset_status_after_error_is_500() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder()
            .use_middleware(Failing)
            .on_request_error(|ctx: &mut HttpContext, _: &PipelineError| ctx.response.clear())
            .build();

        let response = pipeline.dispatch(&root, get("/")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder()
            .use_middleware(Panicking)
            .on_request_error(|ctx: &mut HttpContext, e: &PipelineError| {
                assert!(matches!(e, PipelineError::Panicked(m) if m.contains("exploded")));
                ctx.response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            })
            .build();

        let response = pipeline.dispatch(&root, get("/")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(pipeline.metrics().snapshot().requests_panicked, 1);

        // The pipeline keeps serving.
        let again = pipeline.dispatch(&root, get("/")).await;
        assert_eq!(again.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_panicking_hook_still_responds() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder()
            .use_middleware(Failing)
            .on_request_error(|_: &mut HttpContext, _: &PipelineError| panic!("hook exploded"))
            .build();

        let response = pipeline.dispatch(&root, get("/")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_request_scope_is_isolated() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder()
            .use_middleware(ScopeWriter)
            .use_middleware(ScopeReader)
            .build();

        // A second request registers the same slot again without conflict.
        for _ in 0..2 {
            let response = pipeline.dispatch(&root, get("/")).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, "7");
        }
        assert!(!root.contains::<RequestId>());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let root = Container::new_root();
        let pipeline = Pipeline::builder().max_body_bytes(4).use_middleware(Hello).build();

        let request = Request::builder()
            .uri("/")
            .body(Body::from("too large"))
            .unwrap();
        let response = pipeline.dispatch(&root, request).await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(pipeline.metrics().snapshot().requests_rejected, 1);
    }
}
