//! Conversation items and the input audio buffer.
//!
//! Each item gets a locally assigned id before it is sent. The call returns
//! once a `conversation.item.created` carrying that same id arrives, so
//! acknowledgments may come back in any order relative to other pending
//! operations. An item whose creation fails is dropped from the local record.

use serde::Serialize;
use std::fmt;
use tracing::debug;

use super::base::{RealtimeError, RealtimeResult};
use super::codec::Envelope;
use super::correlation::Matcher;
use super::messages::{ClientEvent, ContentPart, ConversationItem, ServerEvent};
use super::session::Session;

/// Author of a conversation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Content part type for text written by this role.
    fn text_part_type(&self) -> &'static str {
        match self {
            Role::Assistant => "text",
            Role::User | Role::System => "input_text",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of payload an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Audio,
}

/// Locally tracked state of an item created through the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord {
    pub id: String,
    pub role: Role,
    pub content_type: ContentType,
    /// Text, or base64 audio
    pub payload: String,
    /// Set once the server echoed the item
    pub acked: bool,
    /// Set once the server confirmed deletion
    pub deleted: bool,
}

impl Session {
    /// Add a user text message.
    pub async fn user(&self, text: impl Into<String>) -> RealtimeResult<ConversationItem> {
        self.create_text(Role::User, text.into()).await
    }

    /// Add a system message.
    pub async fn system(&self, text: impl Into<String>) -> RealtimeResult<ConversationItem> {
        self.create_text(Role::System, text.into()).await
    }

    /// Add an assistant message.
    pub async fn assistant(&self, text: impl Into<String>) -> RealtimeResult<ConversationItem> {
        self.create_text(Role::Assistant, text.into()).await
    }

    /// Add a user audio message from raw PCM16 bytes.
    pub async fn create_audio(&self, pcm: &[u8]) -> RealtimeResult<ConversationItem> {
        if pcm.is_empty() {
            return Err(RealtimeError::InvalidInput("Audio is required".to_string()));
        }
        let id = self.inner.next_item_id("audio");
        let part = ContentPart::input_audio(pcm);
        let payload = part.audio.clone().unwrap_or_default();
        self.create(id, Role::User, ContentType::Audio, payload, part)
            .await
    }

    async fn create_text(&self, role: Role, text: String) -> RealtimeResult<ConversationItem> {
        if text.trim().is_empty() {
            return Err(RealtimeError::InvalidInput("Content is required".to_string()));
        }
        let id = self.inner.next_item_id("item");
        let part = ContentPart::text(role.text_part_type(), text.clone());
        self.create(id, role, ContentType::Text, text, part).await
    }

    async fn create(
        &self,
        id: String,
        role: Role,
        content_type: ContentType,
        payload: String,
        part: ContentPart,
    ) -> RealtimeResult<ConversationItem> {
        let item = ConversationItem::message(id.clone(), role.as_str(), part);
        let envelope = Envelope::from_event(&ClientEvent::ConversationItemCreate { item })?;

        self.inner.items.lock().push(ItemRecord {
            id: id.clone(),
            role,
            content_type,
            payload,
            acked: false,
            deleted: false,
        });

        let acknowledged = self
            .inner
            .request(
                envelope,
                Matcher::correlated("conversation.item.created", id.clone()),
            )
            .await
            .and_then(|ack| match ack.decode::<ServerEvent>()? {
                ServerEvent::ConversationItemCreated { item } => Ok(item),
                _ => Err(RealtimeError::ProtocolError(
                    "unexpected acknowledgment for item creation".to_string(),
                )),
            });
        let acknowledged = match acknowledged {
            Ok(item) => item,
            Err(e) => {
                self.inner.items.lock().retain(|r| r.id != id);
                return Err(e);
            }
        };

        if let Some(record) = self.inner.items.lock().iter_mut().find(|r| r.id == id) {
            record.acked = true;
        }
        debug!(session_id = %self.inner.id, item_id = %id, role = %role, "Conversation item created");
        Ok(acknowledged)
    }

    /// Delete an item and wait for `conversation.item.deleted`.
    pub async fn delete(&self, item_id: &str) -> RealtimeResult<()> {
        let envelope = Envelope::from_event(&ClientEvent::ConversationItemDelete {
            item_id: item_id.to_string(),
        })?;
        self.inner
            .request(
                envelope,
                Matcher::correlated("conversation.item.deleted", item_id),
            )
            .await?;

        if let Some(record) = self
            .inner
            .items
            .lock()
            .iter_mut()
            .find(|r| r.id == item_id)
        {
            record.deleted = true;
        }
        debug!(session_id = %self.inner.id, item_id = %item_id, "Conversation item deleted");
        Ok(())
    }

    /// Items created through this session, in creation order.
    pub fn items(&self) -> Vec<ItemRecord> {
        self.inner.items.lock().clone()
    }

    /// Append PCM16 audio to the input buffer. The server does not
    /// acknowledge appends.
    pub async fn append_input_audio_buffer(&self, pcm: &[u8]) -> RealtimeResult<()> {
        if pcm.is_empty() {
            return Err(RealtimeError::InvalidInput("Audio is required".to_string()));
        }
        let envelope = Envelope::from_event(&ClientEvent::audio_append(pcm))?;
        self.inner.send(envelope).await
    }

    /// Commit the input buffer; returns the id of the item it became.
    pub async fn commit_input_audio_buffer(&self) -> RealtimeResult<String> {
        let envelope = Envelope::from_event(&ClientEvent::InputAudioBufferCommit)?;
        let ack = self
            .inner
            .request(envelope, Matcher::of_type("input_audio_buffer.committed"))
            .await?;
        match ack.decode::<ServerEvent>()? {
            ServerEvent::InputAudioBufferCommitted { item_id } => Ok(item_id),
            _ => Err(RealtimeError::ProtocolError(
                "unexpected acknowledgment for buffer commit".to_string(),
            )),
        }
    }
}
