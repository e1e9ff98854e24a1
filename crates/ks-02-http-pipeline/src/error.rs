//! Pipeline error types.
//!
//! Everything a middleware or handler can fail with funnels into
//! [`PipelineError`], which the pipeline hands to the `onRequestError` hook.

use ks_01_container::ContainerError;
use serde::Serialize;
use thiserror::Error;

/// Failure raised while processing one request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Building the request's object graph failed.
    #[error("dependency resolution failed: {0}")]
    Dependency(#[from] ContainerError),

    /// A request model rejected itself.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The client sent something unusable.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// JSON (de)serialisation failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request body could not be read.
    #[error("request body error: {0}")]
    Body(String),

    /// A header name or value was not valid HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Filesystem or socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A middleware panicked; the panic was contained at the pipeline boundary.
    #[error("middleware panicked: {0}")]
    Panicked(String),

    /// Anything else a handler wants to surface.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the client is at fault (maps to a 4xx by default).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::BadRequest(_) | Self::Body(_))
    }
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// A request model's self-check failed.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{type_name}.{field}: {message}")]
pub struct ValidationError {
    /// Short name of the model type that failed.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Offending field.
    pub field: String,
    /// Human readable reason.
    pub message: String,
}

impl ValidationError {
    /// Validation failure on `field` of model `T`.
    pub fn new<T: ?Sized>(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: short_type_name::<T>().to_string(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
