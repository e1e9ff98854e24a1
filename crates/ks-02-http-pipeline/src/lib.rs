//! # HTTP Pipeline
//!
//! Per-request processing for the host: every request gets a child scope of
//! the root container, an [`HttpContext`] facade, and a ride through an
//! ordered chain of [`Middleware`].
//!
//! ## Building a pipeline
//!
//! ```ignore
//! let pipeline = Pipeline::builder()
//!     .use_middleware(RequestLoggingMiddleware::new())
//!     .use_middleware(ApiMiddleware::new("/api/chat").action("send", send))
//!     .use_middleware(StaticFilesMiddleware::new("./public"))
//!     .on_request_error(DefaultErrorHook)
//!     .build();
//!
//! let response = pipeline.dispatch(&root, request).await;
//! ```
//!
//! ## Guarantees
//!
//! | Situation                         | Outcome                                  |
//! |-----------------------------------|------------------------------------------|
//! | chain completes, response written | status as set, else 200                  |
//! | chain completes, nothing written  | 404                                      |
//! | middleware returns `Err`          | error hook once, status as set, else 500 |
//! | middleware panics                 | `Panicked` error to the hook, then as above |

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod context;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod pipeline;

pub use api::{ApiMiddleware, ApiParams, BindError, ParamKind, ParamSpec, Validate};
pub use context::{CookieOptions, HttpContext, HttpRequest, HttpResponse};
pub use error::{PipelineError, PipelineResult, ValidationError};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use middleware::{Middleware, Next, RequestLoggingMiddleware, StaticFilesMiddleware};
pub use pipeline::{
    DefaultErrorHook, Pipeline, PipelineBuilder, RequestErrorHook, DEFAULT_MAX_BODY_BYTES,
};

/// Re-exported so middleware crates can name the container without a direct dependency.
pub use ks_01_container::Container;
