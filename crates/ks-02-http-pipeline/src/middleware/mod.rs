//! # Middleware
//!
//! A middleware receives the request's scoped container, the context and a
//! single-use continuation:
//!
//! ```text
//! ┌──────────┐  next.run  ┌──────────┐  next.run  ┌──────────┐
//! │ logging  │ ─────────► │  api     │ ─────────► │  static  │ ──► (no-op)
//! └──────────┘            └──────────┘            └──────────┘
//! ```
//!
//! Not calling `next.run` short-circuits the rest of the chain. `Next` is
//! consumed by `run`, so the continuation cannot be invoked twice.

pub mod logging;
pub mod static_files;

pub use logging::RequestLoggingMiddleware;
pub use static_files::StaticFilesMiddleware;

use crate::context::HttpContext;
use crate::error::PipelineResult;
use async_trait::async_trait;
use ks_01_container::Container;
use std::sync::Arc;

/// One stage of the request pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request, optionally delegating to the rest of the chain.
    async fn handle(
        &self,
        container: &Container<'_>,
        ctx: &mut HttpContext,
        next: Next<'_>,
    ) -> PipelineResult<()>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The remainder of the chain after the current middleware.
#[must_use = "dropping `Next` without running it short-circuits the pipeline"]
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { remaining: chain }
    }

    /// Continuation that does nothing; for driving a middleware in isolation.
    pub fn terminal() -> Next<'static> {
        Next { remaining: &[] }
    }

    /// Number of middleware still ahead.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Invoke the next middleware. The end of the chain is a no-op.
    pub async fn run(self, container: &Container<'_>, ctx: &mut HttpContext) -> PipelineResult<()> {
        match self.remaining.split_first() {
            Some((head, rest)) => head.handle(container, ctx, Next::new(rest)).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;

    // ===== TEST FIXTURES =====

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Recording {
        label: &'static str,
        log: Arc<Log>,
        call_next: bool,
    }

    #[async_trait]
    impl Middleware for Recording {
        async fn handle(
            &self,
            container: &Container<'_>,
            ctx: &mut HttpContext,
            next: Next<'_>,
        ) -> PipelineResult<()> {
            self.log.push(format!("{}:before", self.label));
            if self.call_next {
                next.run(container, ctx).await?;
            }
            self.log.push(format!("{}:after", self.label));
            Ok(())
        }
    }

    async fn context() -> HttpContext {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        HttpContext::from_axum(req, 16).await.unwrap()
    }

    fn recording(label: &'static str, log: &Arc<Log>, call_next: bool) -> Arc<dyn Middleware> {
        Arc::new(Recording {
            label,
            log: Arc::clone(log),
            call_next,
        })
    }

    // ===== TESTS =====

    #[tokio::test]
    async fn test_chain_runs_in_order_and_unwinds() {
        let log = Arc::new(Log::default());
        let chain = vec![recording("a", &log, true), recording("b", &log, true)];
        let root = Container::new_root();
        let mut ctx = context().await;

        Next::new(&chain).run(&root, &mut ctx).await.unwrap();

        assert_eq!(log.entries(), ["a:before", "b:before", "b:after", "a:after"]);
    }

    #[tokio::test]
    async fn test_not_calling_next_short_circuits() {
        let log = Arc::new(Log::default());
        let chain = vec![
            recording("a", &log, true),
            recording("gate", &log, false),
            recording("never", &log, true),
        ];
        let root = Container::new_root();
        let mut ctx = context().await;

        Next::new(&chain).run(&root, &mut ctx).await.unwrap();

        assert!(!log.entries().iter().any(|e| e.starts_with("never")));
    }

    #[tokio::test]
    async fn test_terminal_is_noop() {
        let root = Container::new_root();
        let mut ctx = context().await;
        let next = Next::terminal();
        assert_eq!(next.remaining(), 0);
        next.run(&root, &mut ctx).await.unwrap();
        assert!(ctx.response.is_untouched());
    }
}
