// ABOUTME: Per-dispatch context handed to every handler
// ABOUTME: Carries message identity, the outbound sender, and optional collaborators

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::confirmation::ConfirmationService;
use crate::permissions::PermissionChecker;
use crate::traits::{ChatClient, Extractor, IncomingMessage, MemoryStore, MessageSender};

/// Security collaborators available to handlers that mutate state.
#[derive(Clone)]
pub struct SecurityContext {
    pub permissions: Arc<dyn PermissionChecker>,
    pub audit: Arc<AuditLog>,
    pub confirmations: Arc<ConfirmationService>,
}

/// Built fresh for each inbound message; never persisted.
#[derive(Clone)]
pub struct HandlerContext {
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    pub sender: Arc<dyn MessageSender>,
    pub chat: Option<Arc<dyn ChatClient>>,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub security: Option<SecurityContext>,
}

impl HandlerContext {
    /// Context with only the sender; collaborators are attached with the
    /// `with_*` methods.
    pub fn new(message: &IncomingMessage, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            text: message.content.clone(),
            user_id: message.user_id.clone(),
            channel_id: message.channel_id.clone(),
            sender,
            chat: None,
            extractor: None,
            memory: None,
            security: None,
        }
    }

    pub fn with_chat(mut self, chat: Option<Arc<dyn ChatClient>>) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_extractor(mut self, extractor: Option<Arc<dyn Extractor>>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_memory(mut self, memory: Option<Arc<dyn MemoryStore>>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_security(mut self, security: Option<SecurityContext>) -> Self {
        self.security = security;
        self
    }

    pub fn audit(&self) -> Option<&AuditLog> {
        self.security.as_ref().map(|s| s.audit.as_ref())
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("user_id", &self.user_id)
            .field("channel_id", &self.channel_id)
            .field("chat", &self.chat.is_some())
            .field("extractor", &self.extractor.is_some())
            .field("memory", &self.memory.is_some())
            .field("security", &self.security.is_some())
            .finish()
    }
}
