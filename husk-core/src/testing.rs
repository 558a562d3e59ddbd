// ABOUTME: In-memory test doubles for connector and collaborator traits
// ABOUTME: Lets skills and the relay be exercised without a real platform

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::context::HandlerContext;
use crate::traits::{IncomingMessage, MemoryStore, MessageSender, OutboundOptions};

/// A message captured by `RecordingSender`.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// Channel ID, or user ID for direct messages
    pub target: String,
    pub text: String,
    pub direct: bool,
}

/// Sender that records everything it is asked to send.
#[derive(Default, Clone)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.text).collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent().last().map(|m| m.text.clone())
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        _options: Option<OutboundOptions>,
    ) -> Result<()> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(SentMessage {
            target: channel_id.to_string(),
            text: text.to_string(),
            direct: false,
        });
        Ok(())
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<()> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(SentMessage {
            target: user_id.to_string(),
            text: text.to_string(),
            direct: true,
        });
        Ok(())
    }
}

/// Memory store backed by a map.
#[derive(Default)]
pub struct InMemoryStore {
    blobs: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, channel_id: &str) -> Option<serde_json::Value> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner()).get(channel_id).cloned()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load(&self, channel_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.get(channel_id))
    }

    async fn save(&self, channel_id: &str, blob: &serde_json::Value) -> Result<()> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel_id.to_string(), blob.clone());
        Ok(())
    }
}

/// Bare context for `message` with no collaborators.
pub fn test_context(message: &IncomingMessage, sender: Arc<RecordingSender>) -> HandlerContext {
    HandlerContext::new(message, sender)
}
