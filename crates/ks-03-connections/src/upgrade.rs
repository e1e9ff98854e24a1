//! Websocket upgrade middleware.
//!
//! Claims upgrade requests on one path, runs the registry's accept check and
//! hands accepted sockets to [`ConnectionRegistry::serve`]. Everything else
//! passes through to the next middleware.

use crate::frame::axum_transport;
use crate::handler::ConnectionHandler;
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use ks_01_container::Container;
use ks_02_http_pipeline::{HttpContext, Middleware, Next, PipelineResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cap on a single inbound websocket message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Routes websocket upgrades on `path` into a [`ConnectionRegistry`].
pub struct WebSocketMiddleware {
    path: String,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ConnectionHandler>,
    max_message_size: usize,
}

impl WebSocketMiddleware {
    pub fn new(
        path: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            path: path.into(),
            registry,
            handler,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Middleware for WebSocketMiddleware {
    async fn handle(
        &self,
        container: &Container<'_>,
        ctx: &mut HttpContext,
        next: Next<'_>,
    ) -> PipelineResult<()> {
        if ctx.request.path() != self.path || !ctx.request.is_websocket_upgrade() {
            return next.run(container, ctx).await;
        }

        if !self.registry.accepts(&ctx.request) {
            debug!(remote_addr = ?ctx.request.remote_addr(), "upgrade vetoed by accept check");
            ctx.response.set_status(StatusCode::FORBIDDEN);
            ctx.response.write_text("connection rejected");
            ctx.response.end();
            return Ok(());
        }

        let remote_addr = ctx.request.remote_addr();
        let upgrade = match WebSocketUpgrade::from_request_parts(ctx.request.parts_mut(), &()).await
        {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                warn!(error = %rejection, "websocket handshake rejected");
                ctx.response.upgrade_with(rejection.into_response());
                return Ok(());
            }
        };

        let registry = Arc::clone(&self.registry);
        let handler = Arc::clone(&self.handler);
        let response = upgrade
            .max_message_size(self.max_message_size)
            .on_upgrade(move |socket| async move {
                let (sink, stream) = axum_transport(socket);
                registry.serve(sink, stream, handler, remote_addr).await;
            });

        ctx.response.upgrade_with(response);
        Ok(())
    }
}
