//! # Wire Envelope
//!
//! ```text
//! {"Type":"UpdateList","Data":["chat.message","chat.leave"]}
//! {"Type":"Emit","Data":{"ActionName":"chat.message","Data":{"text":"hi"}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Event bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Data")]
pub enum Envelope {
    /// Replace the sender's subscription set.
    UpdateList(Vec<String>),
    /// Deliver `data` to every subscriber of `action_name`.
    Emit(Emit),
}

/// Payload of [`Envelope::Emit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emit {
    #[serde(rename = "ActionName")]
    pub action_name: String,
    #[serde(rename = "Data", default)]
    pub data: Value,
}

/// An inbound message that is not a valid envelope.
#[derive(Debug, Error)]
#[error("malformed envelope: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl Envelope {
    pub fn update_list<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::UpdateList(actions.into_iter().map(Into::into).collect())
    }

    pub fn emit(action_name: impl Into<String>, data: Value) -> Self {
        Self::Emit(Emit {
            action_name: action_name.into(),
            data,
        })
    }

    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> String {
        // Envelope holds only strings and JSON values, which always serialise.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Action names match case-insensitively.
pub(crate) fn normalize_action(action: &str) -> String {
    action.to_lowercase()
}
