//! Parameter declarations and request binding for API actions.
//!
//! Each declared parameter is looked up by name in the query string, then
//! the urlencoded form, then the JSON body object, and coerced to its
//! declared kind. The bound values form a JSON object that is deserialized
//! into the action's parameter type.

use crate::context::HttpRequest;
use crate::error::{PipelineError, PipelineResult, ValidationError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt;
use thiserror::Error;

/// Wire type a parameter is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    Float,
    Bool,
    /// Any JSON value; text input is parsed as JSON when it can be.
    Json,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// One named parameter of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Self-check run on bound parameters before the controller is built.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Parameter object of an API action.
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct SendMessage { room: String, text: String }
///
/// impl ApiParams for SendMessage {
///     fn parameters() -> Vec<ParamSpec> {
///         vec![
///             ParamSpec::required("room", ParamKind::String),
///             ParamSpec::required("text", ParamKind::String),
///         ]
///     }
/// }
///
/// impl Validate for SendMessage {
///     fn validate(&self) -> Result<(), ValidationError> {
///         if self.text.trim().is_empty() {
///             return Err(ValidationError::new::<Self>("text", "must not be empty"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait ApiParams: DeserializeOwned + Validate + Send + 'static {
    fn parameters() -> Vec<ParamSpec>;
}

/// Actions that take no parameters.
impl Validate for () {}

impl ApiParams for () {
    fn parameters() -> Vec<ParamSpec> {
        Vec::new()
    }
}

/// A parameter could not be bound from the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("missing required parameter '{field}'")]
    Missing { field: String },

    #[error("parameter '{field}' is not a valid {expected}")]
    Coercion { field: String, expected: ParamKind },
}

impl BindError {
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field } | Self::Coercion { field, .. } => field,
        }
    }
}

enum Raw<'a> {
    Text(&'a str),
    Json(&'a Value),
}

/// Bind `specs` from `request` into a JSON object.
///
/// Returns the outer `Err` for an unreadable body, the inner `Err` for a
/// parameter the client got wrong.
pub fn bind(
    request: &HttpRequest,
    specs: &[ParamSpec],
) -> PipelineResult<Result<Map<String, Value>, BindError>> {
    let body = json_body(request)?;
    let mut bound = Map::with_capacity(specs.len());

    for spec in specs {
        let raw = request
            .query(&spec.name)
            .or_else(|| request.form(&spec.name))
            .map(Raw::Text)
            .or_else(|| body.and_then(|b| b.get(&spec.name)).map(Raw::Json));

        let Some(raw) = raw else {
            if spec.required {
                return Ok(Err(BindError::Missing {
                    field: spec.name.clone(),
                }));
            }
            continue;
        };

        match coerce(raw, spec.kind) {
            Some(value) => {
                bound.insert(spec.name.clone(), value);
            }
            None => {
                return Ok(Err(BindError::Coercion {
                    field: spec.name.clone(),
                    expected: spec.kind,
                }))
            }
        }
    }

    Ok(Ok(bound))
}

/// JSON body object, when the request declares one.
fn json_body(request: &HttpRequest) -> PipelineResult<Option<&Map<String, Value>>> {
    if !request.is_json() || request.body().is_empty() {
        return Ok(None);
    }
    match request.json()? {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(PipelineError::BadRequest(
            "json body must be an object".to_string(),
        )),
    }
}

fn coerce(raw: Raw<'_>, kind: ParamKind) -> Option<Value> {
    match raw {
        Raw::Text(text) => coerce_text(text, kind),
        Raw::Json(value) => coerce_json(value, kind),
    }
}

fn coerce_text(text: &str, kind: ParamKind) -> Option<Value> {
    let trimmed = text.trim();
    match kind {
        ParamKind::String => Some(Value::String(text.to_string())),
        ParamKind::Int => trimmed.parse::<i32>().ok().map(Value::from),
        ParamKind::Long => trimmed.parse::<i64>().ok().map(Value::from),
        ParamKind::Float => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ParamKind::Bool => parse_bool(trimmed).map(Value::Bool),
        ParamKind::Json => {
            Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
        }
    }
}

fn coerce_json(value: &Value, kind: ParamKind) -> Option<Value> {
    match (kind, value) {
        (ParamKind::Json, v) => Some(v.clone()),
        (_, Value::String(text)) => coerce_text(text, kind),
        (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ParamKind::Int, Value::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::from),
        (ParamKind::Long, Value::Number(n)) => n.as_i64().map(Value::from),
        (ParamKind::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (ParamKind::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
        _ => None,
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
