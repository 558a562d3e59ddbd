// ABOUTME: Roles, permissions, and the in-memory role store used for access checks
// ABOUTME: Configured owners hold every permission; unknown users default to member

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::audit::{details, AuditAction, AuditLog};

/// A single capability a user may hold in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "memory:read")]
    MemoryRead,
    #[serde(rename = "memory:write")]
    MemoryWrite,
    #[serde(rename = "memory:delete")]
    MemoryDelete,
    #[serde(rename = "calendar:write")]
    CalendarWrite,
    #[serde(rename = "image:generate")]
    ImageGenerate,
    #[serde(rename = "chat:use")]
    ChatUse,
    #[serde(rename = "roles:manage")]
    RolesManage,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryRead => "memory:read",
            Self::MemoryWrite => "memory:write",
            Self::MemoryDelete => "memory:delete",
            Self::CalendarWrite => "calendar:write",
            Self::ImageGenerate => "image:generate",
            Self::ChatUse => "chat:use",
            Self::RolesManage => "roles:manage",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Self::Viewer => &[MemoryRead],
            Self::Member => &[MemoryRead, MemoryWrite, CalendarWrite, ChatUse],
            Self::Admin => &[
                MemoryRead,
                MemoryWrite,
                MemoryDelete,
                CalendarWrite,
                ImageGenerate,
                ChatUse,
            ],
            Self::Owner => &[
                MemoryRead,
                MemoryWrite,
                MemoryDelete,
                CalendarWrite,
                ImageGenerate,
                ChatUse,
                RolesManage,
            ],
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers "may this user do this here?".
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn role_of(&self, user_id: &str, channel_id: &str) -> Role;

    async fn is_owner(&self, user_id: &str) -> bool;

    async fn has_permission(&self, user_id: &str, channel_id: &str, permission: Permission) -> bool {
        self.role_of(user_id, channel_id).await.grants(permission)
    }
}

/// In-memory role assignments keyed by (user, channel).
pub struct RoleStore {
    owners: HashSet<String>,
    assignments: RwLock<HashMap<(String, String), Role>>,
    audit: Option<Arc<AuditLog>>,
}

impl RoleStore {
    pub fn new(owners: impl IntoIterator<Item = String>) -> Self {
        Self {
            owners: owners.into_iter().collect(),
            assignments: RwLock::new(HashMap::new()),
            audit: None,
        }
    }

    /// Record role changes in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Assign `role` to `user_id` in `channel_id` on behalf of `actor_id`.
    pub fn set_role(&self, actor_id: &str, user_id: &str, channel_id: &str, role: Role) {
        let previous = self
            .assignments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((user_id.to_string(), channel_id.to_string()), role);

        tracing::info!(
            actor = %actor_id,
            user_id = %user_id,
            channel_id = %channel_id,
            role = %role,
            "Role assigned"
        );

        if let Some(audit) = &self.audit {
            let from = previous.map_or(serde_json::Value::Null, |r| r.as_str().into());
            audit.log(
                AuditAction::RoleChange,
                actor_id,
                channel_id,
                details([
                    ("target", user_id.into()),
                    ("from", from),
                    ("to", role.as_str().into()),
                ]),
                true,
            );
        }
    }

    fn lookup(&self, user_id: &str, channel_id: &str) -> Role {
        if self.owners.contains(user_id) {
            return Role::Owner;
        }
        self.assignments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(user_id.to_string(), channel_id.to_string()))
            .copied()
            .unwrap_or(Role::Member)
    }
}

#[async_trait]
impl PermissionChecker for RoleStore {
    async fn role_of(&self, user_id: &str, channel_id: &str) -> Role {
        self.lookup(user_id, channel_id)
    }

    async fn is_owner(&self, user_id: &str) -> bool {
        self.owners.contains(user_id)
    }
}
