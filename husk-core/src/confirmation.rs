// ABOUTME: Pending confirmations for destructive actions, one per (channel, user)
// ABOUTME: Every lifecycle step (request, confirm, cancel, expire) lands in the audit log

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::audit::{details, AuditAction, AuditLog};

/// An action waiting for a yes/no from the user who triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    /// Machine-readable action key the requesting skill matches on
    pub action: String,
    /// Text shown to the user
    pub description: String,
    pub requested_at: Instant,
}

type Key = (String, String);

pub struct ConfirmationService {
    ttl: Duration,
    audit: Arc<AuditLog>,
    pending: Mutex<HashMap<Key, PendingConfirmation>>,
}

impl ConfirmationService {
    pub fn new(ttl: Duration, audit: Arc<AuditLog>) -> Self {
        Self {
            ttl,
            audit,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, PendingConfirmation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(channel_id: &str, user_id: &str) -> Key {
        (channel_id.to_string(), user_id.to_string())
    }

    fn is_expired(&self, pending: &PendingConfirmation) -> bool {
        pending.requested_at.elapsed() >= self.ttl
    }

    fn audit(&self, action: AuditAction, pending: &PendingConfirmation, success: bool) {
        self.audit.log(
            action,
            &pending.user_id,
            &pending.channel_id,
            details([
                ("confirmationId", pending.id.as_str().into()),
                ("action", pending.action.as_str().into()),
            ]),
            success,
        );
    }

    /// Ask `user_id` to confirm `action`. Replaces (and cancels) any earlier
    /// pending confirmation for the same channel and user.
    pub fn request(
        &self,
        channel_id: &str,
        user_id: &str,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> PendingConfirmation {
        let pending = PendingConfirmation {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            action: action.into(),
            description: description.into(),
            requested_at: Instant::now(),
        };

        let replaced = self
            .lock()
            .insert(Self::key(channel_id, user_id), pending.clone());
        if let Some(old) = replaced {
            self.audit(AuditAction::ConfirmationCancel, &old, true);
        }
        self.audit(AuditAction::ConfirmationRequest, &pending, true);
        pending
    }

    /// Whether a live (unexpired) confirmation is waiting.
    pub fn has_pending(&self, channel_id: &str, user_id: &str) -> bool {
        self.lock()
            .get(&Self::key(channel_id, user_id))
            .is_some_and(|p| !self.is_expired(p))
    }

    pub fn pending(&self, channel_id: &str, user_id: &str) -> Option<PendingConfirmation> {
        self.lock().get(&Self::key(channel_id, user_id)).cloned()
    }

    /// Accept the pending confirmation. Returns `None` if there was none or it
    /// had already expired.
    pub fn confirm(&self, channel_id: &str, user_id: &str) -> Option<PendingConfirmation> {
        let pending = self.lock().remove(&Self::key(channel_id, user_id))?;
        if self.is_expired(&pending) {
            self.audit(AuditAction::ConfirmationExpire, &pending, false);
            return None;
        }
        self.audit(AuditAction::ConfirmationConfirm, &pending, true);
        Some(pending)
    }

    /// Decline the pending confirmation.
    pub fn cancel(&self, channel_id: &str, user_id: &str) -> Option<PendingConfirmation> {
        let pending = self.lock().remove(&Self::key(channel_id, user_id))?;
        self.audit(AuditAction::ConfirmationCancel, &pending, true);
        Some(pending)
    }

    /// Drop every expired confirmation. Returns how many were dropped.
    pub fn expire_stale(&self) -> usize {
        let expired: Vec<PendingConfirmation> = {
            let mut pending = self.lock();
            let keys: Vec<Key> = pending
                .iter()
                .filter(|(_, p)| self.is_expired(p))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };
        for p in &expired {
            self.audit(AuditAction::ConfirmationExpire, p, false);
        }
        expired.len()
    }
}
