use serde::{Deserialize, Serialize};

use crate::model::{generate_id, now_rfc3339, Id};

/// Entity kind an audit entry points at. The reference is by identifier only;
/// audit rows never cascade with their targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditTarget {
    Route,
    Version,
}

impl AuditTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTarget::Route => "ROUTE",
            AuditTarget::Version => "VERSION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Activate,
    Deactivate,
    SetCurrent,
    Rollback,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Activate => "ACTIVATE",
            AuditAction::Deactivate => "DEACTIVATE",
            AuditAction::SetCurrent => "SET_CURRENT",
            AuditAction::Rollback => "ROLLBACK",
        }
    }
}

/// Immutable record of one definition-management action.
///
/// Written in the same transaction as the entity change it describes, so a
/// change can never be persisted without its audit record. Never updated or
/// deleted; never produced by end-user traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Id,
    pub target: AuditTarget,
    pub target_id: Id,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub description: Option<String>,
    pub actor: Option<String>,
    pub actor_ip: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
}

impl AuditEntry {
    pub fn new(
        target: AuditTarget,
        target_id: Id,
        action: AuditAction,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        description: impl Into<String>,
        actor: &ActorContext,
    ) -> Self {
        Self {
            id: generate_id(),
            target,
            target_id,
            action,
            old_value,
            new_value,
            description: Some(description.into()),
            actor: actor.actor.clone(),
            actor_ip: actor.ip.clone(),
            created_at: now_rfc3339(),
        }
    }
}

/// Who performed a definition-management action, as reported by the admin
/// surface in front of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor: Option<String>,
    pub ip: Option<String>,
}

impl ActorContext {
    pub fn named(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ip: None,
        }
    }

    pub fn system() -> Self {
        Self::named("system")
    }
}
