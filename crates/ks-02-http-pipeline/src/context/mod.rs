//! # HttpContext
//!
//! Per-request facade handed to every middleware: the parsed request, the
//! response under construction and a typed item bag for passing values
//! between middleware. One context per request, discarded after the
//! response is sent.

mod request;
mod response;

pub use request::HttpRequest;
pub use response::{CookieOptions, HttpResponse};

use crate::error::PipelineResult;
use axum::body::Body;
use axum::http::Request;
use std::any::Any;
use std::collections::HashMap;

/// Request, response and per-request items.
#[derive(Debug)]
pub struct HttpContext {
    pub request: HttpRequest,
    pub response: HttpResponse,
    items: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl HttpContext {
    #[must_use]
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: HttpResponse::default(),
            items: HashMap::new(),
        }
    }

    /// Buffer an axum request into a fresh context.
    pub async fn from_axum(request: Request<Body>, max_body_bytes: usize) -> PipelineResult<Self> {
        Ok(Self::new(HttpRequest::from_axum(request, max_body_bytes).await?))
    }

    /// Store a value for later middleware; replaces any previous value under `key`.
    pub fn insert_item<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.items.insert(key.into(), Box::new(value));
    }

    /// Typed lookup; `None` when absent or stored under a different type.
    pub fn item<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.items.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn item_mut<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.items.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove_item(&mut self, key: &str) -> bool {
        self.items.remove(key).is_some()
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }
}
