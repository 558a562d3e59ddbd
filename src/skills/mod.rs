// ABOUTME: Built-in skills and the registry that orders them
// ABOUTME: Specific skills register before general ones so first-match dispatch picks them

pub mod chat;
pub mod confirm;
pub mod help;
pub mod memory;

use anyhow::Result;
use husk_core::{
    CircuitBreaker, HandlerContext, HandlerRegistry, HandlerResult, IncomingMessage, Permission,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

pub use chat::ChatSkill;
pub use confirm::ConfirmationSkill;
pub use help::HelpSkill;
pub use memory::{ClarificationSkill, MemoryBook, MemoryItem, MemorySkill};

/// Reply sent when the user lacks a permission.
pub const PERMISSION_DENIED_REPLY: &str = "Sorry, you don't have permission to do that here.";

/// Check `permission` for the message author. Returns the reply to send
/// when denied; denials are recorded in the audit log.
///
/// Without a security context every action is allowed.
pub(crate) async fn require_permission(
    message: &IncomingMessage,
    ctx: &HandlerContext,
    permission: Permission,
) -> Option<HandlerResult> {
    let security = ctx.security.as_ref()?;
    if security
        .permissions
        .has_permission(&message.user_id, &message.channel_id, permission)
        .await
    {
        return None;
    }

    tracing::info!(
        user_id = %message.user_id,
        channel_id = %message.channel_id,
        permission = %permission,
        "Permission denied"
    );
    security
        .audit
        .log_permission_denied(&message.user_id, &message.channel_id, permission.as_str());
    Some(HandlerResult::reply(PERMISSION_DENIED_REPLY))
}

/// Settings for the chat skill's resilience wrapper.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

/// Build the skill registry in dispatch order. The chat skill is only
/// registered when `chat` is given.
pub fn build_registry(
    bot_name: &str,
    book: Arc<MemoryBook>,
    chat: Option<ChatSettings>,
) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new("skills");
    registry.register(Arc::new(ConfirmationSkill::new(book.clone())));
    registry.register(Arc::new(ClarificationSkill::new(book.clone())));

    let mut topics = vec![
        "husk <thing> / remember <thing>: remember something for this channel".to_string(),
        "hva husker du / what do you remember: list what I remember".to_string(),
        "glem alt / forget everything: forget this channel's memory".to_string(),
    ];
    if chat.is_some() {
        topics.push("anything else: ask me a question".to_string());
    }
    registry.register(Arc::new(HelpSkill::new(bot_name, topics)?));
    registry.register(Arc::new(MemorySkill::new(book)?));

    if let Some(settings) = chat {
        registry.register(Arc::new(ChatSkill::new(
            settings.breaker,
            settings.retry,
            settings.timeout,
        )));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use husk_core::testing::{test_context, RecordingSender};
    use husk_core::{AuditLog, ConfirmationService, RoleStore, SecurityContext};

    #[test]
    fn test_registry_order_without_chat() {
        let registry = build_registry("husk", MemoryBook::new(), None).unwrap();
        assert_eq!(
            registry.names(),
            vec!["confirmation", "clarification", "help", "memory"]
        );
    }

    #[test]
    fn test_registry_order_with_chat() {
        let settings = ChatSettings {
            breaker: Arc::new(CircuitBreaker::new("chat")),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        };
        let registry = build_registry("husk", MemoryBook::new(), Some(settings)).unwrap();
        assert_eq!(registry.names().last().map(String::as_str), Some("chat"));
    }

    #[tokio::test]
    async fn test_require_permission_denies_and_audits() {
        let audit = Arc::new(AuditLog::new());
        let roles = RoleStore::new(Vec::new());
        roles.set_role("admin", "u1", "c1", husk_core::Role::Viewer);
        let security = SecurityContext {
            permissions: Arc::new(roles),
            audit: audit.clone(),
            confirmations: Arc::new(ConfirmationService::new(
                Duration::from_secs(60),
                audit.clone(),
            )),
        };

        let msg = IncomingMessage::new("c1", "u1", "husk melk");
        let ctx = test_context(&msg, RecordingSender::new()).with_security(Some(security));

        assert!(require_permission(&msg, &ctx, Permission::MemoryRead)
            .await
            .is_none());
        let denied = require_permission(&msg, &ctx, Permission::MemoryWrite)
            .await
            .unwrap();
        assert_eq!(denied.response.as_deref(), Some(PERMISSION_DENIED_REPLY));

        let entries = audit.entries(
            &husk_core::AuditFilter::default().action(husk_core::AuditAction::PermissionDenied),
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].details["permission"], "memory:write");
    }
}
