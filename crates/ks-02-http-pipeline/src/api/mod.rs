//! # API Middleware
//!
//! Routes `<prefix>/<action>` to a registered action. Action names match
//! case-insensitively. For a matched action:
//!
//! 1. declared parameters are bound from query, form, then JSON body
//!    (400 naming the field on failure);
//! 2. the parameter object validates itself (400 naming type and field);
//! 3. the controller is constructed from the request's scoped container;
//! 4. the handler runs and its result is written as JSON.
//!
//! Unmatched paths fall through to the next middleware.

mod params;

pub use params::{bind, ApiParams, BindError, ParamKind, ParamSpec, Validate};

use crate::context::HttpContext;
use crate::error::{PipelineError, PipelineResult, ValidationError};
use crate::middleware::{Middleware, Next};
use async_trait::async_trait;
use axum::http::StatusCode;
use ks_01_container::{Container, Injectable};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Type-erased API action.
#[async_trait]
trait ApiAction: Send + Sync {
    fn parameters(&self) -> &[ParamSpec];

    async fn invoke(
        &self,
        container: &Container<'_>,
        args: Map<String, Value>,
    ) -> PipelineResult<Value>;
}

struct TypedAction<C, P, R, F> {
    parameters: Vec<ParamSpec>,
    handler: F,
    _marker: PhantomData<fn() -> (C, P, R)>,
}

#[async_trait]
impl<C, P, R, F, Fut> ApiAction for TypedAction<C, P, R, F>
where
    C: Injectable,
    P: ApiParams,
    R: Serialize + Send + 'static,
    F: Fn(C, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<R>> + Send + 'static,
{
    fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    async fn invoke(
        &self,
        container: &Container<'_>,
        args: Map<String, Value>,
    ) -> PipelineResult<Value> {
        let params: P = match serde_json::from_value(Value::Object(args)) {
            Ok(params) => params,
            // Unit-like parameter types deserialize from null, not `{}`.
            Err(e) if self.parameters.is_empty() => serde_json::from_value(Value::Null)
                .map_err(|_| PipelineError::BadRequest(format!("invalid parameters: {e}")))?,
            Err(e) => return Err(PipelineError::BadRequest(format!("invalid parameters: {e}"))),
        };
        params.validate()?;

        let controller = container.construct::<C>()?;
        let output = (self.handler)(controller, params).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Middleware exposing controller actions under a path prefix.
pub struct ApiMiddleware {
    prefix: String,
    actions: HashMap<String, Arc<dyn ApiAction>>,
}

impl ApiMiddleware {
    /// Serve actions under `prefix`, e.g. `/api/chat`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = format!("/{}", prefix.trim_matches('/'));
        Self {
            prefix,
            actions: HashMap::new(),
        }
    }

    /// Register `handler` as action `name`.
    ///
    /// The controller `C` is built per request from the scoped container;
    /// the parameter object `P` is bound from the request and validated
    /// before the controller is touched.
    #[must_use]
    pub fn action<C, P, R, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        C: Injectable,
        P: ApiParams,
        R: Serialize + Send + 'static,
        F: Fn(C, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<R>> + Send + 'static,
    {
        let action = TypedAction::<C, P, R, F> {
            parameters: P::parameters(),
            handler,
            _marker: PhantomData,
        };
        self.actions
            .insert(name.to_ascii_lowercase(), Arc::new(action));
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registered action names, lowercased.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Action name for a request path under this prefix.
    fn match_action(&self, path: &str) -> Option<&Arc<dyn ApiAction>> {
        let rest = strip_prefix_ignore_case(path, &self.prefix)?;
        let name = rest.strip_prefix('/')?.trim_end_matches('/');
        if name.is_empty() || name.contains('/') {
            return None;
        }
        self.actions.get(&name.to_ascii_lowercase())
    }
}

#[async_trait]
impl Middleware for ApiMiddleware {
    async fn handle(
        &self,
        container: &Container<'_>,
        ctx: &mut HttpContext,
        next: Next<'_>,
    ) -> PipelineResult<()> {
        let Some(action) = self.match_action(ctx.request.path()).cloned() else {
            return next.run(container, ctx).await;
        };

        let args = match bind(&ctx.request, action.parameters())? {
            Ok(args) => args,
            Err(e) => {
                debug!(field = e.field(), error = %e, "api binding failed");
                ctx.response.set_status(StatusCode::BAD_REQUEST);
                ctx.response.write_json(&json!({
                    "error": "binding",
                    "field": e.field(),
                    "message": e.to_string(),
                }))?;
                return Ok(());
            }
        };

        match action.invoke(container, args).await {
            Ok(output) => {
                if ctx.response.status().is_none() {
                    ctx.response.set_status(StatusCode::OK);
                }
                ctx.response.write_json(&output)?;
                Ok(())
            }
            Err(PipelineError::Validation(e)) => {
                debug!(model = %e.type_name, field = %e.field, "api validation failed");
                write_validation_error(ctx, &e)
            }
            Err(e) => Err(e),
        }
    }
}

fn write_validation_error(ctx: &mut HttpContext, error: &ValidationError) -> PipelineResult<()> {
    ctx.response.set_status(StatusCode::BAD_REQUEST);
    ctx.response.write_json(&json!({
        "error": "validation",
        "type": error.type_name,
        "field": error.field,
        "message": error.message,
    }))?;
    Ok(())
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &path[prefix.len()..])
}
