//! JSON envelope codec.
//!
//! Every frame on the wire is a JSON object carrying a string `type`
//! discriminator. [`Envelope`] keeps the object as-is so that events the
//! session does not model are still logged, re-emitted and relayed verbatim.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite::Message;

use super::base::{RealtimeError, RealtimeResult};

/// One discrete JSON-tagged message unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// An envelope with only a `type` field.
    pub fn new(event_type: &str) -> Self {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(event_type.to_string()));
        Self(map)
    }

    /// Wrap a JSON value, rejecting anything that is not a typed object.
    pub fn from_value(value: Value) -> RealtimeResult<Self> {
        match value {
            Value::Object(map) => match map.get("type") {
                Some(Value::String(_)) => Ok(Self(map)),
                _ => Err(RealtimeError::ProtocolError(
                    "envelope without string 'type'".to_string(),
                )),
            },
            other => Err(RealtimeError::ProtocolError(format!(
                "envelope is not an object: {other}"
            ))),
        }
    }

    /// Parse a text frame.
    pub fn from_text(text: &str) -> RealtimeResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RealtimeError::ProtocolError(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Serialize a typed event into an envelope.
    pub fn from_event<T: Serialize>(event: &T) -> RealtimeResult<Self> {
        Self::from_value(serde_json::to_value(event)?)
    }

    /// Decode into a typed event.
    pub fn decode<T: DeserializeOwned>(&self) -> RealtimeResult<T> {
        T::deserialize(Value::Object(self.0.clone()))
            .map_err(|e| RealtimeError::ProtocolError(format!("{}: {e}", self.event_type())))
    }

    /// The `type` discriminator.
    pub fn event_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    /// Field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Response id carried either flat (`response_id`) or nested (`response.id`).
    pub fn response_id(&self) -> Option<&str> {
        self.0
            .get("response_id")
            .and_then(Value::as_str)
            .or_else(|| self.0.get("response")?.get("id")?.as_str())
    }

    /// The id used to pair this envelope with the request it acknowledges.
    pub fn correlation_id(&self) -> Option<&str> {
        match self.event_type() {
            "conversation.item.create" | "conversation.item.created" => {
                self.0.get("item")?.get("id")?.as_str()
            }
            "conversation.item.delete"
            | "conversation.item.deleted"
            | "input_audio_buffer.committed" => self.0.get("item_id")?.as_str(),
            t if t.starts_with("response.") => self.response_id(),
            _ => None,
        }
    }

    /// `metadata.correlation_id` of a response-bearing envelope.
    pub fn response_correlation(&self) -> Option<&str> {
        let response = self.0.get("response")?;
        response.get("metadata")?.get("correlation_id")?.as_str()
    }

    /// Serialize to JSON text.
    pub fn to_text(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Serialize to a websocket text frame.
    pub fn to_message(&self) -> Message {
        Message::Text(self.to_text().into())
    }

    /// Unwrap into the underlying JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_text())
    }
}
