use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicationId, StepDefinition, UserId, UserProfile};

/// Outbound hook telling people a step became pending (e-mail or chat adapters).
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, notice: StepNotice) -> Result<(), NotificationError>;
}

/// Payload handed to the dispatcher after an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepNotice {
    pub application_id: ApplicationId,
    /// Step that is now pending.
    pub step: StepDefinition,
    pub applicant: UserProfile,
    pub reviewer: UserProfile,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("no recipient resolved for step {0}")]
    NoRecipient(String),
}

/// Compliance trail sink. Every engine operation writes exactly one event.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub actor_id: Option<UserId>,
    pub status: AuditStatus,
    pub details: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &str, resource: &str) -> Self {
        Self {
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: None,
            actor_id: None,
            status: AuditStatus::Success,
            details: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn actor(mut self, actor: &UserId) -> Self {
        self.actor_id = Some(actor.clone());
        self
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn failed(mut self, error: impl ToString) -> Self {
        self.status = AuditStatus::Failure;
        self.details.insert("error".to_string(), error.to_string());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}
