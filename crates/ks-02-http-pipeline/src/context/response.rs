//! Write-side of the per-request facade.

use crate::error::{PipelineError, PipelineResult};
use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::BytesMut;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Attributes for a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<Duration>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Some("/".to_string()),
            domain: None,
            max_age: None,
            http_only: true,
            secure: false,
            same_site: Some("Lax".to_string()),
        }
    }
}

impl CookieOptions {
    fn render(&self, name: &str, value: &str) -> String {
        let mut cookie = format!("{name}={value}");
        if let Some(path) = &self.path {
            cookie.push_str(&format!("; Path={path}"));
        }
        if let Some(domain) = &self.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if let Some(same_site) = &self.same_site {
            cookie.push_str(&format!("; SameSite={same_site}"));
        }
        cookie
    }
}

/// Outgoing response under construction.
///
/// Status stays unset until someone sets it; the pipeline picks the final
/// status when the chain completes (200 if anything was written, 404 if the
/// chain left the response untouched, 500 after an error).
#[derive(Debug, Default)]
pub struct HttpResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    buffer: BytesMut,
    stream: Option<Body>,
    written: bool,
    ended: bool,
    upgrade: Option<Response>,
}

impl HttpResponse {
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = Some(status);
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Replace a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> PipelineResult<&mut Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| PipelineError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| PipelineError::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn set_content_type(&mut self, content_type: &str) -> PipelineResult<&mut Self> {
        self.set_header(CONTENT_TYPE.as_str(), content_type)
    }

    /// Append a `Set-Cookie` header.
    pub fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        options: &CookieOptions,
    ) -> PipelineResult<&mut Self> {
        let rendered = options.render(name, value);
        let value = HeaderValue::try_from(rendered)
            .map_err(|e| PipelineError::InvalidHeader(format!("cookie {name}: {e}")))?;
        self.headers.append(SET_COOKIE, value);
        Ok(self)
    }

    /// Expire a cookie on the client.
    pub fn delete_cookie(&mut self, name: &str) -> PipelineResult<&mut Self> {
        let options = CookieOptions {
            max_age: Some(Duration::ZERO),
            ..CookieOptions::default()
        };
        self.set_cookie(name, "", &options)
    }

    /// Append raw bytes to the buffered body.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        if self.refuse_write() {
            return self;
        }
        self.buffer.extend_from_slice(bytes);
        self.written = true;
        self
    }

    /// Append text; defaults the content type to `text/plain`.
    pub fn write_text(&mut self, text: &str) -> &mut Self {
        if self.refuse_write() {
            return self;
        }
        self.default_content_type("text/plain; charset=utf-8");
        self.write_bytes(text.as_bytes())
    }

    /// Replace the body with `value` serialised as JSON.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> PipelineResult<&mut Self> {
        if self.refuse_write() {
            return Ok(self);
        }
        let encoded = serde_json::to_vec(value)?;
        self.buffer.clear();
        self.default_content_type("application/json");
        Ok(self.write_bytes(&encoded))
    }

    /// Stream the body instead of buffering it; discards buffered writes.
    pub fn write_stream(&mut self, body: Body) -> &mut Self {
        if self.refuse_write() {
            return self;
        }
        self.buffer.clear();
        self.stream = Some(body);
        self.written = true;
        self
    }

    /// Mark the response complete; later writes are ignored.
    pub fn end(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Whether any body has been written.
    pub fn has_body(&self) -> bool {
        self.written
    }

    /// Nothing set, nothing written.
    pub fn is_untouched(&self) -> bool {
        self.status.is_none() && !self.written && self.upgrade.is_none()
    }

    /// Drop the buffered and streaming body and reopen for writing.
    /// Status and headers are kept.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.stream = None;
        self.written = false;
        self.ended = false;
    }

    /// [`HttpResponse::clear`] plus status and headers.
    pub fn reset(&mut self) {
        self.clear();
        self.status = None;
        self.headers.clear();
    }

    /// Hand the connection to a protocol upgrade; `response` is sent verbatim.
    pub fn upgrade_with(&mut self, response: Response) {
        self.upgrade = Some(response);
        self.ended = true;
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    /// Buffered body so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Produce the wire response; `fallback` applies when no status was set.
    pub fn into_response(self, fallback: StatusCode) -> Response {
        if let Some(upgrade) = self.upgrade {
            return upgrade;
        }

        let body = match self.stream {
            Some(stream) => stream,
            None => Body::from(Bytes::from(self.buffer)),
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status.unwrap_or(fallback);
        *response.headers_mut() = self.headers;
        response
    }

    fn refuse_write(&self) -> bool {
        if self.ended {
            debug!("write after end ignored");
        }
        self.ended
    }

    fn default_content_type(&mut self, content_type: &'static str) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_response_is_untouched() {
        let response = HttpResponse::default();
        assert!(response.is_untouched());
        assert_eq!(response.status(), None);
        let wire = response.into_response(StatusCode::NOT_FOUND);
        assert_eq!(wire.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_write_text_sets_default_content_type() {
        let mut response = HttpResponse::default();
        response.write_text("hello ").write_text("world");
        assert_eq!(response.content_type(), Some("text/plain; charset=utf-8"));
        assert_eq!(response.buffered(), b"hello world");
        assert!(!response.is_untouched());
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let mut response = HttpResponse::default();
        response.set_content_type("text/html").unwrap();
        response.write_text("<p>hi</p>");
        assert_eq!(response.content_type(), Some("text/html"));
    }

    #[test]
    fn test_write_json_replaces_buffer() {
        let mut response = HttpResponse::default();
        response.write_text("partial");
        response.write_json(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(response.buffered(), br#"{"ok":true}"#);
    }

    #[test]
    fn test_clear_keeps_status_and_headers() {
        let mut response = HttpResponse::default();
        response.set_status(StatusCode::CREATED);
        response.set_header("x-trace", "1").unwrap();
        response.write_text("body");
        response.end();

        response.clear();
        assert!(!response.has_body());
        assert!(!response.is_ended());
        assert_eq!(response.status(), Some(StatusCode::CREATED));
        assert!(response.headers().contains_key("x-trace"));

        response.reset();
        assert!(response.is_untouched());
        assert!(response.headers().is_empty());
    }

    #[test]
    fn test_writes_after_end_are_ignored() {
        let mut response = HttpResponse::default();
        response.write_text("done");
        response.end();
        response.write_text(" and more");
        response.write_json(&serde_json::json!([1])).unwrap();
        assert_eq!(response.buffered(), b"done");
    }

    #[test]
    fn test_cookie_rendering() {
        let mut response = HttpResponse::default();
        response
            .set_cookie("session", "abc", &CookieOptions::default())
            .unwrap();
        response.delete_cookie("old").unwrap();

        let cookies: Vec<_> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0], "session=abc; Path=/; HttpOnly; SameSite=Lax");
        assert!(cookies[1].contains("Max-Age=0"));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut response = HttpResponse::default();
        assert!(matches!(
            response.set_header("bad header", "x"),
            Err(PipelineError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_explicit_status_survives_fallback() {
        let mut response = HttpResponse::default();
        response.set_status(StatusCode::ACCEPTED);
        let wire = response.into_response(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(wire.status(), StatusCode::ACCEPTED);
    }
}
