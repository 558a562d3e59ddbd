// ABOUTME: Boundary traits and data types shared by connectors, skills, and collaborators
// ABOUTME: IncomingMessage, MessageSender, ChatClient, Extractor, MemoryStore, Connector

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Incoming Message
// =============================================================================

/// Normalized message delivered by a connector. The core never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Platform-specific message ID
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    /// Human-readable sender name
    pub username: String,
    /// Message body (text content)
    pub content: String,
    /// 1:1 conversation with the bot
    pub is_direct: bool,
    /// Multi-user direct conversation
    pub is_group_direct: bool,
    pub timestamp: DateTime<Utc>,
}

/// Coarse message type used as the event name at the connector boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Direct,
    GroupDirect,
    Channel,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::GroupDirect => "group_direct",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IncomingMessage {
    /// Build a channel message with a fresh ID and the current time.
    pub fn new(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            username: user_id.clone(),
            user_id,
            content: content.into(),
            is_direct: false,
            is_group_direct: false,
            timestamp: Utc::now(),
        }
    }

    /// Mark this message as a 1:1 direct message.
    pub fn direct(mut self) -> Self {
        self.is_direct = true;
        self.is_group_direct = false;
        self
    }

    pub fn kind(&self) -> MessageKind {
        if self.is_direct {
            MessageKind::Direct
        } else if self.is_group_direct {
            MessageKind::GroupDirect
        } else {
            MessageKind::Channel
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Extra payload for an outbound message. Opaque to the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<serde_json::Value>,
}

/// Outbound half of a connector.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a message to a channel
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        options: Option<OutboundOptions>,
    ) -> Result<()>;

    /// Send a private message to a user
    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<()>;
}

// =============================================================================
// AI / Service Clients
// =============================================================================

/// Conversational AI backend.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, prompt: &str, context: Option<&str>) -> Result<String>;

    async fn is_available(&self) -> bool;
}

/// A single entity found in free text (a date, a title, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub confidence: f32,
}

/// Entity extraction backend (dates, event titles).
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<Extraction>>;
}

/// Persistence for a skill's per-channel memory blob.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn load(&self, channel_id: &str) -> Result<Option<serde_json::Value>>;

    async fn save(&self, channel_id: &str, blob: &serde_json::Value) -> Result<()>;
}

// =============================================================================
// Connector
// =============================================================================

/// Receives normalized messages for a relay.
///
/// Connectors push each message to this sink; the core never polls.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn handle_incoming(&self, message: IncomingMessage);
}

/// A messaging-platform integration.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique connector identifier (e.g., "console")
    fn id(&self) -> &str;

    /// Outbound half, shared with every handler context
    fn sender(&self) -> Arc<dyn MessageSender>;

    /// Start delivering inbound messages to `sink`.
    async fn start(&self, sink: Arc<dyn InboundSink>) -> Result<()>;

    /// Graceful shutdown.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
