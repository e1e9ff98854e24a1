//! Static file middleware.
//!
//! Serves `GET`/`HEAD` requests from a directory. Missing files fall through
//! to the next middleware; traversal attempts are answered with 400.

use super::{Middleware, Next};
use crate::context::HttpContext;
use crate::error::PipelineResult;
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use ks_01_container::Container;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Serves files below `root`, with `index` for directory requests.
#[derive(Debug, Clone)]
pub struct StaticFilesMiddleware {
    root: PathBuf,
    index: String,
}

impl StaticFilesMiddleware {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: "index.html".to_string(),
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a request path, or `None` when it tries to escape `root`.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = request_path.trim_start_matches('/');
        let escapes = relative
            .split(['/', '\\'])
            .any(|segment| segment == ".." || segment.contains(':'));
        if escapes {
            return None;
        }

        let mut path = self.root.clone();
        path.extend(relative.split('/').filter(|s| !s.is_empty() && *s != "."));
        Some(path)
    }
}

#[async_trait]
impl Middleware for StaticFilesMiddleware {
    async fn handle(
        &self,
        container: &Container<'_>,
        ctx: &mut HttpContext,
        next: Next<'_>,
    ) -> PipelineResult<()> {
        let method = ctx.request.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return next.run(container, ctx).await;
        }

        let Some(mut path) = self.resolve(ctx.request.path()) else {
            debug!(path = %ctx.request.path(), "rejected static path");
            ctx.response.set_status(StatusCode::BAD_REQUEST);
            ctx.response.write_text("invalid path");
            return Ok(());
        };

        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            path.push(&self.index);
        }

        let is_file = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %e, "static lookup failed");
                }
                false
            }
        };
        if !is_file {
            return next.run(container, ctx).await;
        }

        let bytes = tokio::fs::read(&path).await?;

        ctx.response.set_status(StatusCode::OK);
        ctx.response.set_content_type(guess_content_type(&path))?;
        if method == Method::GET {
            ctx.response.write_bytes(&bytes);
        }
        ctx.response.end();
        Ok(())
    }
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
