// ABOUTME: Bounded, append-only audit trail for security-relevant actions
// ABOUTME: FIFO ring of immutable entries, queryable by user, channel, action, and time

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::metrics;

/// Default number of entries kept before the oldest is dropped.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Fixed taxonomy of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "role:change")]
    RoleChange,
    #[serde(rename = "calendar:create")]
    CalendarCreate,
    #[serde(rename = "calendar:update")]
    CalendarUpdate,
    #[serde(rename = "calendar:delete")]
    CalendarDelete,
    #[serde(rename = "memory:store")]
    MemoryStore,
    #[serde(rename = "memory:delete")]
    MemoryDelete,
    #[serde(rename = "image:generate")]
    ImageGenerate,
    #[serde(rename = "rate:limited")]
    RateLimited,
    #[serde(rename = "skill:register")]
    SkillRegister,
    #[serde(rename = "confirmation:request")]
    ConfirmationRequest,
    #[serde(rename = "confirmation:confirm")]
    ConfirmationConfirm,
    #[serde(rename = "confirmation:cancel")]
    ConfirmationCancel,
    #[serde(rename = "confirmation:expire")]
    ConfirmationExpire,
    #[serde(rename = "permission:denied")]
    PermissionDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleChange => "role:change",
            Self::CalendarCreate => "calendar:create",
            Self::CalendarUpdate => "calendar:update",
            Self::CalendarDelete => "calendar:delete",
            Self::MemoryStore => "memory:store",
            Self::MemoryDelete => "memory:delete",
            Self::ImageGenerate => "image:generate",
            Self::RateLimited => "rate:limited",
            Self::SkillRegister => "skill:register",
            Self::ConfirmationRequest => "confirmation:request",
            Self::ConfirmationConfirm => "confirmation:confirm",
            Self::ConfirmationCancel => "confirmation:cancel",
            Self::ConfirmationExpire => "confirmation:expire",
            Self::PermissionDenied => "permission:denied",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form key/value details attached to an entry.
pub type AuditDetails = HashMap<String, serde_json::Value>;

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub user_id: String,
    pub channel_id: String,
    pub details: AuditDetails,
    pub success: bool,
}

/// Query for `AuditLog::entries`. Every field is optional and they combine.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub action: Option<AuditAction>,
    /// Only entries at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Keep the most recent N after the other filters
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.user_id.as_ref().map_or(true, |u| &entry.user_id == u)
            && self
                .channel_id
                .as_ref()
                .map_or(true, |c| &entry.channel_id == c)
            && self.action.map_or(true, |a| entry.action == a)
            && self.since.map_or(true, |t| entry.timestamp >= t)
    }
}

/// In-memory audit log. Process lifetime only; nothing is persisted.
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an entry, evicting the oldest one when full. Returns the entry.
    pub fn log(
        &self,
        action: AuditAction,
        user_id: &str,
        channel_id: &str,
        details: AuditDetails,
        success: bool,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            details,
            success,
        };

        tracing::info!(
            target: "audit",
            action = %action,
            user_id = %user_id,
            channel_id = %channel_id,
            success,
            "Audit entry recorded"
        );
        metrics::record_audit_entry(action.as_str());

        let mut entries = self.lock();
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        entry
    }

    /// Record a failed permission check.
    pub fn log_permission_denied(
        &self,
        user_id: &str,
        channel_id: &str,
        permission: &str,
    ) -> AuditEntry {
        let mut details = AuditDetails::new();
        details.insert("permission".to_string(), permission.into());
        self.log(AuditAction::PermissionDenied, user_id, channel_id, details, false)
    }

    /// Matching entries, oldest first.
    pub fn entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let entries = self.lock();
        let mut matched: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything. Intended for test isolation.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an `AuditDetails` map from key/value pairs.
pub fn details<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> AuditDetails {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
