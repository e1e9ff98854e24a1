//! # Host
//!
//! Wires configuration, the root container, the middleware pipeline and the
//! websocket event bus into one axum server.
//!
//! ```text
//! accept loop ──► catch-all handler ──► Pipeline::dispatch(root, request)
//!                                          │
//!     RequestLogging ─► WebSocket(event bus) ─► app middleware ─► StaticFiles
//! ```
//!
//! The root container holds, as instance bindings, the [`HostConfig`], the
//! [`ConnectionRegistry`] and the [`EventBusServer`], so controllers can
//! inject any of them.

use crate::config::HostConfig;
use anyhow::{bail, Context, Result};
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use ks_01_container::{Injectable, InjectionPoint, RootContainer};
use ks_02_http_pipeline::{
    Middleware, Pipeline, PipelineBuilder, RequestErrorHook, RequestLoggingMiddleware,
    StaticFilesMiddleware,
};
use ks_03_connections::{ConnectionHandler, ConnectionRegistry, WebSocketMiddleware};
use ks_04_event_bus::EventBusServer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

type DependencyCheck = Box<dyn Fn(&RootContainer) -> (&'static str, Vec<InjectionPoint>)>;

/// Builder for [`Host`].
pub struct HostBuilder {
    config: HostConfig,
    root: RootContainer,
    registry: Arc<ConnectionRegistry>,
    event_bus: Arc<EventBusServer>,
    pipeline: PipelineBuilder,
    checks: Vec<DependencyCheck>,
}

impl HostBuilder {
    pub fn new(config: HostConfig) -> Self {
        let registry = Arc::new(
            ConnectionRegistry::new().with_outbound_buffer(config.websocket.outbound_buffer),
        );
        let event_bus = Arc::new(EventBusServer::new());

        let mut pipeline = Pipeline::builder()
            .use_middleware(RequestLoggingMiddleware::new())
            .max_body_bytes(config.http.max_body_bytes);

        if config.event_bus.enabled {
            let handler: Arc<dyn ConnectionHandler> = Arc::clone(&event_bus) as _;
            pipeline = pipeline.use_middleware(
                WebSocketMiddleware::new(
                    config.websocket.path.clone(),
                    Arc::clone(&registry),
                    handler,
                )
                .with_max_message_size(config.websocket.max_message_size),
            );
        }

        Self {
            config,
            root: RootContainer::new_root(),
            registry,
            event_bus,
            pipeline,
            checks: Vec::new(),
        }
    }

    /// Root container, for registering application services.
    pub fn container(&self) -> &RootContainer {
        &self.root
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBusServer> {
        &self.event_bus
    }

    /// Append application middleware, after the websocket endpoint and
    /// before static files.
    #[must_use]
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.pipeline = self.pipeline.use_middleware(middleware);
        self
    }

    #[must_use]
    pub fn on_request_error<H: RequestErrorHook + 'static>(mut self, hook: H) -> Self {
        self.pipeline = self.pipeline.on_request_error(hook);
        self
    }

    /// Fail [`build`](Self::build) unless `T` can be constructed from root
    /// registrations.
    #[must_use]
    pub fn require<T: Injectable>(mut self) -> Self {
        self.checks.push(Box::new(|root| {
            (std::any::type_name::<T>(), root.missing_dependencies::<T>())
        }));
        self
    }

    pub fn build(self) -> Result<Host> {
        self.config.validate().context("invalid host configuration")?;

        let root = self.root;
        root.register_instance(self.config.clone())
            .context("registering host configuration")?;
        root.register_shared(Arc::clone(&self.registry))
            .context("registering connection registry")?;
        root.register_shared(Arc::clone(&self.event_bus))
            .context("registering event bus")?;

        for check in &self.checks {
            let (type_name, missing) = check(&root);
            if !missing.is_empty() {
                let names: Vec<&str> = missing.iter().map(|p| p.capability_name()).collect();
                bail!("{type_name} has unregistered dependencies: {}", names.join(", "));
            }
        }

        let mut pipeline = self.pipeline;
        if self.config.static_files.enabled {
            pipeline = pipeline.use_middleware(
                StaticFilesMiddleware::new(self.config.static_files.root.clone())
                    .with_index(self.config.static_files.index.clone()),
            );
        }
        let pipeline = pipeline.build();

        info!(
            middleware = pipeline.len(),
            websocket_path = %self.config.websocket.path,
            event_bus = self.config.event_bus.enabled,
            "host built"
        );

        Ok(Host {
            config: self.config,
            root: Arc::new(root),
            pipeline: Arc::new(pipeline),
            registry: self.registry,
            event_bus: self.event_bus,
        })
    }
}

#[derive(Clone)]
struct HostState {
    root: Arc<RootContainer>,
    pipeline: Arc<Pipeline>,
}

/// A configured host, ready to serve.
pub struct Host {
    config: HostConfig,
    root: Arc<RootContainer>,
    pipeline: Arc<Pipeline>,
    registry: Arc<ConnectionRegistry>,
    event_bus: Arc<EventBusServer>,
}

impl Host {
    pub fn builder(config: HostConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn root(&self) -> &Arc<RootContainer> {
        &self.root
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBusServer> {
        &self.event_bus
    }

    /// Router sending every request through the pipeline.
    pub fn router(&self) -> Router {
        let state = HostState {
            root: Arc::clone(&self.root),
            pipeline: Arc::clone(&self.pipeline),
        };
        Router::new().fallback(dispatch).with_state(state)
    }

    /// Bind the configured HTTP address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.http_addr();
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))
    }

    /// Serve until Ctrl+C.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, ctrl_c()).await
    }

    /// Serve until `signal` completes, then close open connections and
    /// drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().context("listener has no local address")?;
        info!(%addr, "host listening");

        let registry = Arc::clone(&self.registry);
        let shutdown = async move {
            signal.await;
            let ids = registry.connection_ids();
            info!(connections = ids.len(), "shutting down");
            for id in ids {
                registry.close(&id);
            }
        };

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("http server failed")?;

        info!("host stopped");
        Ok(())
    }
}

async fn dispatch(State(state): State<HostState>, request: Request) -> Response {
    state.pipeline.dispatch(&state.root, request).await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c, shutting down");
    }
}
