//! Command channel adapter.
//!
//! Bridges a publish/subscribe transport to registry operations:
//! - on connect: publish presence `{"app": <name>, "active": true}`, then
//!   subscribe to every topic in the `CommandTable`
//! - on message: known topic → JSON object with an `app` field → not our own
//!   app → route
//! - on disconnect: status line only; reconnecting is the transport's job
//!
//! The routing table is built once and handed to the adapter. The adapter
//! itself never touches controllers directly.

pub mod mqtt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::consumer::StatusSink;
use crate::error::PayloadError;
use crate::registry::ControllerRegistry;

pub const DEFAULT_RECORD_START_TOPIC: &str = "flame/avsim/cam/mapi_record_start";
pub const DEFAULT_RECORD_STOP_TOPIC: &str = "flame/avsim/cam/mapi_record_stop";
pub const DEFAULT_REQUEST_ACTIVE_TOPIC: &str = "flame/avsim/mapi_request_active";
pub const DEFAULT_PRESENCE_TOPIC: &str = "flame/avsim/manager";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTopics {
    pub record_start: String,
    pub record_stop: String,
    pub request_active: String,
    /// Outbound presence notifications.
    pub presence: String,
}

impl Default for CommandTopics {
    fn default() -> Self {
        Self {
            record_start: DEFAULT_RECORD_START_TOPIC.to_string(),
            record_stop: DEFAULT_RECORD_STOP_TOPIC.to_string(),
            request_active: DEFAULT_REQUEST_ACTIVE_TOPIC.to_string(),
            presence: DEFAULT_PRESENCE_TOPIC.to_string(),
        }
    }
}

/// Inbound command body. Only `app` is interpreted; the rest is kept for
/// handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandPayload {
    pub app: String,
    pub fields: Map<String, Value>,
}

impl CommandPayload {
    pub fn parse(bytes: &[u8]) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|err| PayloadError::Malformed(err.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(PayloadError::NotAnObject);
        };
        let app = match fields.remove("app") {
            Some(Value::String(app)) => app,
            Some(other) => other.to_string(),
            None => return Err(PayloadError::MissingApp),
        };
        Ok(Self { app, fields })
    }
}

/// Outbound presence notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub app: String,
    pub active: bool,
}

impl Presence {
    pub fn active(app: &str) -> Self {
        Self {
            app: app.to_string(),
            active: true,
        }
    }
}

pub type Handler = Arc<dyn Fn(&CommandPayload) + Send + Sync>;

#[derive(Clone)]
pub enum Route {
    Handler(Handler),
    /// Reply with presence without touching the registry.
    Presence,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Handler(_) => f.write_str("Route::Handler"),
            Route::Presence => f.write_str("Route::Presence"),
        }
    }
}

/// Topic → route mapping, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct CommandTable {
    routes: BTreeMap<String, Route>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<F>(mut self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CommandPayload) + Send + Sync + 'static,
    {
        self.routes.insert(topic.into(), Route::Handler(Arc::new(handler)));
        self
    }

    pub fn with_presence(mut self, topic: impl Into<String>) -> Self {
        self.routes.insert(topic.into(), Route::Presence);
        self
    }

    /// `record_start` → `start_all`, `record_stop` → `stop_all`,
    /// `request_active` → presence reply.
    pub fn for_registry(registry: Arc<ControllerRegistry>, topics: &CommandTopics) -> Self {
        let start = Arc::clone(&registry);
        let stop = registry;
        Self::new()
            .with_handler(topics.record_start.clone(), move |payload: &CommandPayload| {
                log::info!("record start requested by {}", payload.app);
                let report = start.start_all();
                for (camera_id, reason) in &report.failed {
                    log::warn!("camera {} did not start recording: {}", camera_id, reason);
                }
            })
            .with_handler(topics.record_stop.clone(), move |payload: &CommandPayload| {
                log::info!("record stop requested by {}", payload.app);
                stop.stop_all();
            })
            .with_presence(topics.request_active.clone())
    }

    pub fn route(&self, topic: &str) -> Option<&Route> {
        self.routes.get(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Outbound half of the transport.
pub trait Publisher: Send + Sync {
    /// Fire-and-forget publish (QoS 0).
    fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;

    fn subscribe(&self, topic: &str) -> anyhow::Result<()>;

    fn is_connected(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    UnknownTopic,
    Payload(PayloadError),
    /// Sent by this application instance.
    OwnMessage,
}

/// What the adapter did with an inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    Presence,
    Dropped(DropReason),
}

pub struct CommandAdapter {
    app_name: String,
    topics: CommandTopics,
    table: CommandTable,
    publisher: Arc<dyn Publisher>,
    status: Arc<dyn StatusSink>,
}

impl CommandAdapter {
    pub fn new(
        app_name: impl Into<String>,
        topics: CommandTopics,
        table: CommandTable,
        publisher: Arc<dyn Publisher>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            topics,
            table,
            publisher,
            status,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Announce presence, then subscribe to every command topic.
    pub fn on_connect(&self, reason: &str) {
        self.notify_active();
        for topic in self.table.topics() {
            if let Err(err) = self.publisher.subscribe(topic) {
                log::warn!("failed to subscribe to {}: {:#}", topic, err);
            }
        }
        self.status
            .on_status(&format!("Connected to Broker({})", reason));
    }

    pub fn on_disconnect(&self, reason: &str) {
        self.status
            .on_status(&format!("Disconnected to Broker({})", reason));
    }

    pub fn on_message(&self, topic: &str, payload: &[u8]) -> Disposition {
        let Some(route) = self.table.route(topic) else {
            log::warn!("Unknown MAPI was called : {}", topic);
            return Disposition::Dropped(DropReason::UnknownTopic);
        };
        let payload = match CommandPayload::parse(payload) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("dropping message on {}: {}", topic, err);
                return Disposition::Dropped(DropReason::Payload(err));
            }
        };
        if payload.app == self.app_name {
            log::debug!("ignoring own message on {}", topic);
            return Disposition::Dropped(DropReason::OwnMessage);
        }

        match route {
            Route::Handler(handler) => {
                handler(&payload);
                Disposition::Handled
            }
            Route::Presence => {
                self.notify_active();
                Disposition::Presence
            }
        }
    }

    /// Publish presence, or just report it when the transport is down.
    pub fn notify_active(&self) {
        if !self.publisher.is_connected() {
            self.status.on_status("Notified");
            return;
        }
        let presence = Presence::active(&self.app_name);
        let body = match serde_json::to_vec(&presence) {
            Ok(body) => body,
            Err(err) => {
                log::warn!("failed to encode presence: {}", err);
                return;
            }
        };
        if let Err(err) = self.publisher.publish(&self.topics.presence, body) {
            log::warn!("failed to publish presence: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_requires_an_object_with_app() {
        assert_eq!(
            CommandPayload::parse(br#"{"app":"console","camera":0}"#)
                .expect("parse")
                .app,
            "console"
        );
        assert!(matches!(
            CommandPayload::parse(b"not json"),
            Err(PayloadError::Malformed(_))
        ));
        assert_eq!(
            CommandPayload::parse(b"[1,2]"),
            Err(PayloadError::NotAnObject)
        );
        assert_eq!(
            CommandPayload::parse(br#"{"active":true}"#),
            Err(PayloadError::MissingApp)
        );
    }

    #[test]
    fn presence_serializes_like_the_manager_expects() {
        let body = serde_json::to_string(&Presence::active("avsim-cam")).expect("serialize");
        assert_eq!(body, r#"{"app":"avsim-cam","active":true}"#);
    }

    #[test]
    fn table_lists_registered_topics() {
        let table = CommandTable::new()
            .with_handler("b/start", |_: &CommandPayload| {})
            .with_presence("a/active");
        assert_eq!(table.topics().collect::<Vec<_>>(), vec!["a/active", "b/start"]);
        assert!(matches!(table.route("a/active"), Some(Route::Presence)));
        assert!(table.route("c").is_none());
    }
}
