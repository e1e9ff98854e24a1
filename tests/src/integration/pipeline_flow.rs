//! # Pipeline Flows
//!
//! Requests driven through a fully built [`Host`] router:
//!
//! 1. **Request scope**: middleware registers a per-request service in the
//!    child container; the controller built for that request sees it, the
//!    next request does not.
//! 2. **API binding and validation** through the default error hook.
//! 3. **Error containment**: unresolved dependencies and panics become 500
//!    without leaking type names.
//! 4. **Static files** and the 404 terminal response.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use host_runtime::chat::chat_api;
    use host_runtime::{Host, HostConfig};
    use ks_01_container::{Container, ContainerResult, Dependencies, Injectable, InjectionPoint};
    use ks_02_http_pipeline::{
        ApiMiddleware, HttpContext, Middleware, Next, PipelineError, PipelineResult,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Per-request identity, registered by middleware in the request scope.
    struct RequestId(Uuid);

    struct RequestIdMiddleware;

    #[async_trait]
    impl Middleware for RequestIdMiddleware {
        async fn handle(
            &self,
            container: &Container<'_>,
            ctx: &mut HttpContext,
            next: Next<'_>,
        ) -> PipelineResult<()> {
            let id = Uuid::new_v4();
            container.register_instance(RequestId(id))?;
            ctx.response.set_header("x-request-id", &id.to_string())?;
            next.run(container, ctx).await
        }

        fn name(&self) -> &'static str {
            "request-id"
        }
    }

    struct WhoAmI {
        request_id: Arc<RequestId>,
    }

    impl Injectable for WhoAmI {
        fn injection_points() -> Vec<InjectionPoint> {
            vec![InjectionPoint::of::<RequestId>()]
        }

        fn construct(deps: &Dependencies) -> ContainerResult<Self> {
            Ok(Self {
                request_id: deps.get::<RequestId>()?,
            })
        }
    }

    trait Ledger: Send + Sync {}

    struct NeedsLedger;

    impl Injectable for NeedsLedger {
        fn injection_points() -> Vec<InjectionPoint> {
            vec![InjectionPoint::of::<dyn Ledger>()]
        }

        fn construct(deps: &Dependencies) -> ContainerResult<Self> {
            deps.get::<dyn Ledger>()?;
            Ok(Self)
        }
    }

    struct Exploding;

    #[async_trait]
    impl Middleware for Exploding {
        async fn handle(
            &self,
            container: &Container<'_>,
            ctx: &mut HttpContext,
            next: Next<'_>,
        ) -> PipelineResult<()> {
            if ctx.request.path() == "/explode" {
                panic!("middleware exploded");
            }
            next.run(container, ctx).await
        }

        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    fn config() -> HostConfig {
        let mut config = HostConfig::default();
        config.static_files.enabled = false;
        config.http.max_body_bytes = 1024;
        config
    }

    fn router() -> Router {
        let api = ApiMiddleware::new("/api/debug")
            .action("whoami", |who: WhoAmI, _: ()| async move {
                PipelineResult::Ok(who.request_id.0.to_string())
            })
            .action("ledger", |_: NeedsLedger, _: ()| async move {
                PipelineResult::Ok(Value::Null)
            });

        Host::builder(config())
            .with_middleware(RequestIdMiddleware)
            .with_middleware(Exploding)
            .with_middleware(api)
            .with_middleware(chat_api())
            .build()
            .unwrap()
            .router()
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, request_id, body.to_vec())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    // =============================================================================
    // REQUEST SCOPE
    // =============================================================================

    #[tokio::test]
    async fn test_request_scoped_service_reaches_controller() {
        let router = router();

        let (status, header, body) = call(&router, get("/api/debug/whoami")).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(Some(body.as_str().unwrap().to_string()), header);

        let (_, second, _) = call(&router, get("/api/debug/whoami")).await;
        assert_ne!(header, second, "each request gets its own scope");
    }

    // =============================================================================
    // API BINDING AND VALIDATION
    // =============================================================================

    #[tokio::test]
    async fn test_chat_send_binds_json_body() {
        let router = router();

        let (status, _, body) = call(
            &router,
            post_json("/api/chat/send", json!({"user": "ada", "text": "hello"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"delivered": 0}));
    }

    #[tokio::test]
    async fn test_chat_send_binds_query_case_insensitively() {
        let router = router();
        let (status, _, _) = call(&router, get("/API/Chat/SEND?user=ada&text=hi")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_validation_failure_names_type_and_field() {
        let router = router();

        let (status, _, body) = call(
            &router,
            post_json("/api/chat/send", json!({"user": "ada", "text": "   "})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({
                "error": "validation",
                "type": "SendMessage",
                "field": "text",
                "message": "must not be empty"
            })
        );
    }

    #[tokio::test]
    async fn test_missing_parameter_names_field() {
        let router = router();

        let (status, _, body) = call(&router, get("/api/chat/send?user=ada")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "binding");
        assert_eq!(body["field"], "text");
    }

    // =============================================================================
    // ERROR CONTAINMENT
    // =============================================================================

    #[tokio::test]
    async fn test_unresolved_dependency_is_500_without_type_names() {
        let router = router();

        let (status, _, body) = call(&router, get("/api/debug/ledger")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let text = String::from_utf8(body).unwrap();
        assert!(!text.contains("Ledger"), "leaked: {text}");
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_next_request_served() {
        let router = router();

        let (status, _, _) = call(&router, get("/explode")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _, _) = call(&router, get("/api/chat/stats")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_error_hook_controls_exposure() {
        let router = Host::builder(config())
            .with_middleware(ApiMiddleware::new("/api").action(
                "ledger",
                |_: NeedsLedger, _: ()| async move { PipelineResult::Ok(Value::Null) },
            ))
            .on_request_error(|ctx: &mut HttpContext, error: &PipelineError| {
                let status = if matches!(error, PipelineError::Dependency(_)) {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                ctx.response.reset();
                ctx.response.set_status(status);
                ctx.response.write_text("try again later");
            })
            .build()
            .unwrap()
            .router();

        let (status, _, body) = call(&router, get("/api/ledger")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, b"try again later");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let router = router();
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat/send")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(vec![b' '; 4096]))
            .unwrap();

        let (status, _, _) = call(&router, request).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    // =============================================================================
    // STATIC FILES AND TERMINAL RESPONSE
    // =============================================================================

    #[tokio::test]
    async fn test_static_files_after_api() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>chat</h1>").unwrap();

        let mut config = config();
        config.static_files.enabled = true;
        config.static_files.root = dir.path().to_path_buf();
        let host = tokio_test::assert_ok!(Host::builder(config).with_middleware(chat_api()).build());
        let router = host.router();

        let (status, _, body) = call(&router, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>chat</h1>");

        let (status, _, body) = call(&router, get("/missing.css")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());

        let (status, _, _) = call(&router, get("/../etc/passwd")).await;
        assert_ne!(status, StatusCode::OK);
    }
}
