//! Read-side of the per-request facade.

use crate::error::{PipelineError, PipelineResult};
use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, UPGRADE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Request, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Incoming request: method, target, headers, cookies, query, form and body.
///
/// The head is kept as axum [`Parts`] so transport extractors (websocket
/// upgrade) can still run against it after the pipeline has started.
#[derive(Debug)]
pub struct HttpRequest {
    parts: Parts,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    cookies: HashMap<String, String>,
    json: OnceLock<Result<Value, String>>,
}

impl HttpRequest {
    /// Buffer the body (bounded by `max_body_bytes`) and parse the head.
    pub async fn from_axum(request: Request<Body>, max_body_bytes: usize) -> PipelineResult<Self> {
        let (parts, body) = request.into_parts();

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > max_body_bytes) {
            return Err(PipelineError::Body(format!(
                "body exceeds {max_body_bytes} bytes"
            )));
        }

        let body = axum::body::to_bytes(body, max_body_bytes)
            .await
            .map_err(|e| PipelineError::Body(e.to_string()))?;

        Ok(Self::from_parts(parts, body))
    }

    /// Build from an already buffered body.
    #[must_use]
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let query = parts
            .uri
            .query()
            .map(|q| parse_urlencoded(q.as_bytes()))
            .unwrap_or_default();

        let form = if is_form(&parts.headers) {
            parse_urlencoded(&body)
        } else {
            Vec::new()
        };

        let cookies = parse_cookies(&parts.headers);

        Self {
            parts,
            body,
            remote_addr,
            query,
            form,
            cookies,
            json: OnceLock::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Path component of the target, e.g. `/api/chat/send`.
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query_string(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// First query value for `key`.
    pub fn query(&self, key: &str) -> Option<&str> {
        lookup(&self.query, key)
    }

    /// All query pairs in arrival order.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// First urlencoded form value for `key`.
    pub fn form(&self, key: &str) -> Option<&str> {
        lookup(&self.form, key)
    }

    /// Query value, falling back to the form field of the same name.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.query(key).or_else(|| self.form(key))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Header value as text; `None` when absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> PipelineResult<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| PipelineError::BadRequest(format!("body is not utf-8: {e}")))
    }

    /// Body parsed as JSON; parsed once and cached.
    pub fn json(&self) -> PipelineResult<&Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(&self.body).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| PipelineError::BadRequest(format!("invalid json body: {e}")))
    }

    /// Body deserialized into `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        let value = self.json()?.clone();
        serde_json::from_value(value)
            .map_err(|e| PipelineError::BadRequest(format!("unexpected json body: {e}")))
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// `Connection: upgrade` plus `Upgrade: websocket`.
    pub fn is_websocket_upgrade(&self) -> bool {
        let connection_upgrade = self
            .header(CONNECTION.as_str())
            .is_some_and(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            });
        let upgrade_websocket = self
            .header(UPGRADE.as_str())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
        connection_upgrade && upgrade_websocket
    }

    /// Request head for transport-level extractors.
    pub fn parts_mut(&mut self) -> &mut Parts {
        &mut self.parts
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
}

fn parse_urlencoded(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
