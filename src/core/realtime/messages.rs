//! Realtime API WebSocket message types.
//!
//! Client events are built from these types and sent as JSON envelopes. Server
//! events are decoded from received envelopes on demand; the read loop itself
//! only relies on the `type` discriminator, so unknown server events pass
//! through untouched.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - conversation.item.create - Add item to conversation
//! - conversation.item.delete - Delete conversation item
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events consumed by the session:
//! - session.created / session.updated
//! - conversation.item.created / conversation.item.deleted
//! - input_audio_buffer.committed
//! - response.created
//! - response.audio.delta / response.text.delta / response.audio_transcript.delta
//! - response.done / response.cancelled
//! - connection.complete (relay handshake)
//! - error

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent with `session.update`.
///
/// Defaults: `modalities = ["text", "audio"]`, `tool_choice = "none"`,
/// `voice = "sage"`, pcm16 audio both ways, no turn detection (manual turns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    pub modalities: Vec<String>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration; `None` serializes as `null` (manual turns)
    pub turn_detection: Option<TurnDetection>,

    /// Tool definitions
    pub tools: Vec<ToolDef>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum response output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: None,
            voice: Some("sage".to_string()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: None,
            turn_detection: None,
            tools: Vec::new(),
            tool_choice: Some("none".to_string()),
            temperature: None,
            max_response_output_tokens: None,
        }
    }
}

impl SessionConfig {
    /// Text-only configuration with the given instructions.
    pub fn text(instructions: impl Into<String>) -> Self {
        Self {
            modalities: vec!["text".to_string()],
            instructions: Some(instructions.into()),
            ..Default::default()
        }
    }

    /// Check the parameters the upstream rejects outright.
    pub fn validate(&self) -> Result<(), String> {
        if self.modalities.is_empty() {
            return Err("modalities must not be empty".to_string());
        }
        if let Some(m) = self
            .modalities
            .iter()
            .find(|m| m.as_str() != "text" && m.as_str() != "audio")
        {
            return Err(format!("unsupported modality '{m}'"));
        }
        if let Some(t) = self.temperature
            && !(0.6..=1.2).contains(&t)
        {
            return Err(format!("temperature {t} outside 0.6..=1.2"));
        }
        Ok(())
    }
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    /// Specific number of tokens
    Number(i32),
    /// Infinite tokens
    Infinite(String), // "inf"
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether to create response on turn end
        #[serde(default, skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether to interrupt on speech
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// Semantic VAD
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
        /// Whether to create response on turn end
        #[serde(default, skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether to interrupt on speech
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
}

/// Tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolDef {
    /// A function tool.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: function_type(),
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A message item with a single content part.
    pub fn message(id: impl Into<String>, role: &str, part: ContentPart) -> Self {
        Self {
            id: Some(id.into()),
            item_type: "message".to_string(),
            status: None,
            role: Some(role.to_string()),
            content: Some(vec![part]),
            call_id: None,
            name: None,
            arguments: None,
            output: None,
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    /// Text content of the given part type.
    pub fn text(content_type: &str, text: impl Into<String>) -> Self {
        Self {
            content_type: content_type.to_string(),
            text: Some(text.into()),
            audio: None,
            transcript: None,
        }
    }

    /// `input_audio` content from raw PCM bytes.
    pub fn input_audio(pcm: &[u8]) -> Self {
        Self {
            content_type: "input_audio".to_string(),
            text: None,
            audio: Some(BASE64_STANDARD.encode(pcm)),
            transcript: None,
        }
    }
}

// =============================================================================
// Response Options
// =============================================================================

/// Which conversation a response reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationScope {
    /// The session's default conversation; generations are serialized
    #[default]
    Auto,
    /// Out-of-band response; may run concurrently with others
    None,
}

/// Options sent with `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseOptions {
    /// Response modalities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Instructions for this response only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Voice for audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Output audio format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    /// Tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    /// Tool choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Max output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<MaxTokens>,
    /// Conversation to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationScope>,
    /// Metadata echoed back on the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Input items to use instead of the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<ConversationItem>>,
}

impl ResponseOptions {
    /// Whether generation with these options bypasses the per-session lock.
    #[inline]
    pub fn is_out_of_band(&self) -> bool {
        self.conversation == Some(ConversationScope::None)
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the realtime API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Delete a conversation item
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete {
        /// Item ID
        item_id: String,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        response: ResponseOptions,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Build an audio append event from raw PCM bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }
}

// =============================================================================
// Server Payloads (received from server)
// =============================================================================

/// Error reported by the server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error code
    pub code: Option<String>,
    /// Human readable message
    pub message: String,
    /// Client event that caused the error
    pub event_id: Option<String>,
}

/// Session object carried by `session.created` / `session.updated`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSession {
    /// Server-assigned session id
    #[serde(default)]
    pub id: String,
    /// Model serving the session
    #[serde(default)]
    pub model: String,
    /// Server-side expiry (unix seconds)
    #[serde(default)]
    pub expires_at: Option<u64>,
    /// Configuration as acknowledged by the server
    #[serde(flatten)]
    pub config: SessionConfig,
}

/// Response object carried by `response.created` / `response.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Server-assigned response id
    pub id: String,
    /// Response status (in_progress, completed, cancelled, failed, incomplete)
    #[serde(default)]
    pub status: String,
    /// Extra status information, e.g. the failure reason
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
    /// Output items; a completed response without them yields no transcript
    #[serde(default)]
    pub output: Option<Vec<ConversationItem>>,
    /// Token usage
    #[serde(default)]
    pub usage: Option<ResponseUsage>,
    /// Metadata echoed from `response.create`
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Response {
    /// Rebuild a response from a `response` object that failed to decode,
    /// keeping every field that parses on its own.
    ///
    /// A missing or non-string status is read as `completed`.
    pub fn salvage(value: Option<&serde_json::Value>, id: &str) -> Self {
        let field = |key: &str| value.and_then(|v| v.get(key)).filter(|v| !v.is_null());
        Self {
            id: field("id")
                .and_then(|v| v.as_str())
                .unwrap_or(id)
                .to_string(),
            status: field("status")
                .and_then(|v| v.as_str())
                .unwrap_or("completed")
                .to_string(),
            status_details: field("status_details").cloned(),
            output: field("output").and_then(|v| serde_json::from_value(v.clone()).ok()),
            usage: field("usage").and_then(|v| serde_json::from_value(v.clone()).ok()),
            metadata: field("metadata").cloned(),
        }
    }
}

/// Token usage reported on `response.done`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseUsage {
    /// Total tokens
    pub total_tokens: u64,
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Input breakdown
    pub input_token_details: InputTokenDetails,
    /// Output breakdown
    pub output_token_details: TokenDetails,
}

/// Input token breakdown, including the cached share.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InputTokenDetails {
    /// Cached tokens
    pub cached_tokens: u64,
    /// Text tokens (gross)
    pub text_tokens: u64,
    /// Audio tokens (gross)
    pub audio_tokens: u64,
    /// Cached share by modality
    pub cached_tokens_details: TokenDetails,
}

/// Token counts by modality.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenDetails {
    /// Text tokens
    pub text_tokens: u64,
    /// Audio tokens
    pub audio_tokens: u64,
}

/// Typed view of the server events the session acts on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session object
        session: RemoteSession,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session object
        session: RemoteSession,
    },

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// The created item
        item: ConversationItem,
    },

    /// Conversation item deleted
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted {
        /// Deleted item id
        item_id: String,
    },

    /// Input audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        /// Item created from the buffer
        item_id: String,
    },

    /// Response generation started
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response object
        response: Response,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response object
        response: Response,
    },

    /// Response cancelled
    #[serde(rename = "response.cancelled")]
    ResponseCancelled {
        /// Response id, when reported flat
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Audio data chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Owning response
        response_id: String,
        /// Base64 audio
        delta: String,
    },

    /// Text chunk
    #[serde(rename = "response.text.delta")]
    TextDelta {
        /// Owning response
        response_id: String,
        /// Text fragment
        delta: String,
    },

    /// Transcript chunk for audio output
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Owning response
        response_id: String,
        /// Transcript fragment
        delta: String,
    },

    /// Relay handshake
    #[serde(rename = "connection.complete")]
    ConnectionComplete,

    /// Any other event
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Decode base64 audio from an audio delta.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

/// Number of PCM bytes a base64 audio delta decodes to.
pub fn decoded_audio_len(delta: &str) -> usize {
    let padding = delta.bytes().rev().take_while(|b| *b == b'=').count();
    (delta.len() / 4 * 3).saturating_sub(padding)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_serialization() {
        let event = ClientEvent::InputAudioBufferCommit;
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("input_audio_buffer.commit"));
    }

    #[test]
    fn test_audio_append() {
        let data = vec![0u8, 1, 2, 3];
        let event = ClientEvent::audio_append(&data);
        match event {
            ClientEvent::InputAudioBufferAppend { audio } => {
                let decoded = BASE64_STANDARD.decode(&audio).unwrap();
                assert_eq!(decoded, data);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_session_update_defaults() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::default(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "sage");
        assert_eq!(value["session"]["tool_choice"], "none");
        assert_eq!(value["session"]["modalities"], json!(["text", "audio"]));
        assert!(value["session"]["turn_detection"].is_null());
        assert!(value["session"].get("temperature").is_none());
    }

    #[test]
    fn test_session_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig::text("hi").validate().is_ok());

        let config = SessionConfig {
            modalities: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            modalities: vec!["video".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            temperature: Some(2.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_turn_detection_serialization() {
        let config = SessionConfig {
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(0.5),
                prefix_padding_ms: None,
                silence_duration_ms: Some(500),
                create_response: Some(true),
                interrupt_response: None,
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["turn_detection"]["type"], "server_vad");
        assert_eq!(value["turn_detection"]["silence_duration_ms"], 500);
    }

    #[test]
    fn test_response_create_serialization() {
        let event = ClientEvent::ResponseCreate {
            response: ResponseOptions {
                conversation: Some(ConversationScope::None),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "response.create");
        assert_eq!(value["response"]["conversation"], "none");
    }

    #[test]
    fn test_item_create_serialization() {
        let item = ConversationItem::message(
            "item-1-1700000000000",
            "user",
            ContentPart::text("input_text", "Hello"),
        );
        let value = serde_json::to_value(ClientEvent::ConversationItemCreate { item }).unwrap();
        assert_eq!(value["item"]["id"], "item-1-1700000000000");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["content"][0]["type"], "input_text");
        assert_eq!(value["item"]["content"][0]["text"], "Hello");
    }

    #[test]
    fn test_server_event_error() {
        let json = r#"{
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "message": "Test error"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "Test error");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_server_event_unknown_type() {
        let json = r#"{"type": "rate_limits.updated", "rate_limits": []}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::Other));
    }

    #[test]
    fn test_response_done_with_usage() {
        let json = json!({
            "type": "response.done",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [{
                    "id": "item_1",
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "text", "text": "OK."}]
                }],
                "usage": {
                    "total_tokens": 30,
                    "input_tokens": 20,
                    "output_tokens": 10,
                    "input_token_details": {
                        "cached_tokens": 5,
                        "text_tokens": 20,
                        "audio_tokens": 0,
                        "cached_tokens_details": {"text_tokens": 5, "audio_tokens": 0}
                    },
                    "output_token_details": {"text_tokens": 10, "audio_tokens": 0}
                }
            }
        });
        let event: ServerEvent = serde_json::from_value(json).unwrap();
        match event {
            ServerEvent::ResponseDone { response } => {
                assert_eq!(response.id, "resp_1");
                let usage = response.usage.unwrap();
                assert_eq!(usage.input_token_details.cached_tokens_details.text_tokens, 5);
                assert_eq!(usage.output_token_details.text_tokens, 10);
                assert_eq!(response.output.unwrap().len(), 1);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_response_without_output() {
        let json = json!({"type": "response.done", "response": {"id": "resp_2", "status": "failed"}});
        match serde_json::from_value::<ServerEvent>(json).unwrap() {
            ServerEvent::ResponseDone { response } => {
                assert!(response.output.is_none());
                assert!(response.usage.is_none());
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_salvage_keeps_parseable_fields() {
        let raw = json!({
            "id": "resp_3",
            "output": "garbled",
            "usage": {"input_tokens": 7, "output_tokens": 3, "total_tokens": 10}
        });
        assert!(serde_json::from_value::<Response>(raw.clone()).is_err());

        let response = Response::salvage(Some(&raw), "resp_fallback");
        assert_eq!(response.id, "resp_3");
        assert_eq!(response.status, "completed");
        assert!(response.output.is_none());
        assert_eq!(response.usage.unwrap().input_tokens, 7);

        let empty = Response::salvage(None, "resp_fallback");
        assert_eq!(empty.id, "resp_fallback");
        assert!(empty.usage.is_none());
    }

    #[test]
    fn test_remote_session_flattens_config() {
        let json = json!({
            "type": "session.updated",
            "session": {
                "id": "sess_1",
                "object": "realtime.session",
                "model": "gpt-4o-realtime-preview-2024-12-17",
                "modalities": ["text"],
                "instructions": "Always reply: OK.",
                "voice": "sage",
                "turn_detection": null,
                "tools": [],
                "tool_choice": "none"
            }
        });
        match serde_json::from_value::<ServerEvent>(json).unwrap() {
            ServerEvent::SessionUpdated { session } => {
                assert_eq!(session.id, "sess_1");
                assert_eq!(session.config.modalities, vec!["text".to_string()]);
                assert_eq!(
                    session.config.instructions.as_deref(),
                    Some("Always reply: OK.")
                );
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_decoded_audio_len() {
        let pcm = vec![0u8; 4800];
        let encoded = BASE64_STANDARD.encode(&pcm);
        assert_eq!(decoded_audio_len(&encoded), 4800);

        let encoded = BASE64_STANDARD.encode([1u8, 2, 3, 4]);
        assert_eq!(decoded_audio_len(&encoded), 4);
        assert_eq!(ServerEvent::decode_audio_delta(&encoded).unwrap(), vec![1, 2, 3, 4]);
    }
}
