//! # Chat Demo
//!
//! A small application on top of the host: an API controller that publishes
//! chat messages into the event bus, which relays them to every websocket
//! client subscribed to `chat.message`.
//!
//! | Endpoint                 | Parameters             | Result                 |
//! |--------------------------|------------------------|------------------------|
//! | `POST /api/chat/send`    | `user`, `text`         | `{"delivered": n}`     |
//! | `GET  /api/chat/stats`   | none                   | connection counters    |

use ks_01_container::{ContainerResult, Dependencies, Injectable, InjectionPoint};
use ks_02_http_pipeline::{
    ApiMiddleware, ApiParams, ParamKind, ParamSpec, PipelineResult, Validate, ValidationError,
};
use ks_03_connections::ConnectionRegistry;
use ks_04_event_bus::EventBusServer;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Action name chat messages are published under.
pub const CHAT_MESSAGE: &str = "chat.message";

/// Longest accepted message text, in characters.
pub const MAX_TEXT_CHARS: usize = 500;

/// Per-request chat controller.
pub struct ChatController {
    bus: Arc<EventBusServer>,
    registry: Arc<ConnectionRegistry>,
}

impl Injectable for ChatController {
    fn injection_points() -> Vec<InjectionPoint> {
        vec![
            InjectionPoint::of::<EventBusServer>(),
            InjectionPoint::of::<ConnectionRegistry>(),
        ]
    }

    fn construct(deps: &Dependencies) -> ContainerResult<Self> {
        Ok(Self {
            bus: deps.get::<EventBusServer>()?,
            registry: deps.get::<ConnectionRegistry>()?,
        })
    }
}

impl ChatController {
    pub fn send(&self, message: SendMessage) -> SendReceipt {
        let delivered = self.bus.publish(
            CHAT_MESSAGE,
            json!({ "user": message.user, "text": message.text }),
        );
        debug!(user = %message.user, delivered, "chat message published");
        SendReceipt { delivered }
    }

    pub fn stats(&self) -> ChatStats {
        ChatStats {
            connections: self.registry.connection_count(),
            subscribers: self.bus.subscriber_count(CHAT_MESSAGE),
        }
    }
}

/// Parameters of `send`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub user: String,
    pub text: String,
}

impl Validate for SendMessage {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.user.trim().is_empty() {
            return Err(ValidationError::new::<Self>("user", "must not be empty"));
        }
        if self.text.trim().is_empty() {
            return Err(ValidationError::new::<Self>("text", "must not be empty"));
        }
        if self.text.chars().count() > MAX_TEXT_CHARS {
            return Err(ValidationError::new::<Self>(
                "text",
                format!("must be at most {MAX_TEXT_CHARS} characters"),
            ));
        }
        Ok(())
    }
}

impl ApiParams for SendMessage {
    fn parameters() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("user", ParamKind::String),
            ParamSpec::required("text", ParamKind::String),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct SendReceipt {
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct ChatStats {
    pub connections: usize,
    pub subscribers: usize,
}

/// API middleware serving the chat actions under `/api/chat`.
pub fn chat_api() -> ApiMiddleware {
    ApiMiddleware::new("/api/chat")
        .action("send", |chat: ChatController, message: SendMessage| async move {
            PipelineResult::Ok(chat.send(message))
        })
        .action("stats", |chat: ChatController, _: ()| async move {
            PipelineResult::Ok(chat.stats())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(user: &str, text: &str) -> SendMessage {
        SendMessage {
            user: user.into(),
            text: text.into(),
        }
    }

    #[test]
    fn test_validation() {
        assert!(message("ada", "hi").validate().is_ok());

        let err = message(" ", "hi").validate().unwrap_err();
        assert_eq!(err.field, "user");

        let err = message("ada", &"x".repeat(MAX_TEXT_CHARS + 1)).validate().unwrap_err();
        assert_eq!(err.field, "text");
        assert_eq!(err.type_name, "SendMessage");
    }

    #[test]
    fn test_chat_api_actions() {
        let api = chat_api();
        let mut names: Vec<&str> = api.action_names().collect();
        names.sort();
        assert_eq!(names, vec!["send", "stats"]);
    }

    #[test]
    fn test_send_without_subscribers_delivers_nothing() {
        let chat = ChatController {
            bus: Arc::new(EventBusServer::new()),
            registry: Arc::new(ConnectionRegistry::new()),
        };
        assert_eq!(chat.send(message("ada", "hello")).delivered, 0);
        assert_eq!(chat.stats().subscribers, 0);
    }
}
