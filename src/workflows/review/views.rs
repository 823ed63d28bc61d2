use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, ApplicationInstance, ApplicationStatus, CompletedStepRecord, GroupId,
    RecordId, RoutingRule, SequenceId, StepDefinition, StepId, UserId,
};
use super::routing::AssignedTo;

/// Which slice of applications a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListState {
    Pending,
    Completed,
    Disabled,
}

impl ListState {
    pub const fn label(self) -> &'static str {
        match self {
            ListState::Pending => "pending",
            ListState::Completed => "completed",
            ListState::Disabled => "disabled",
        }
    }
}

/// Optional narrowing applied before routing checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub sequence_id: Option<SequenceId>,
    #[serde(default)]
    pub group: Option<GroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSummary {
    pub application_id: ApplicationId,
    pub applicant_id: UserId,
    pub status: ApplicationStatus,
    pub completed_level: usize,
    pub total_steps: usize,
    pub pending_step: Option<StepId>,
    pub created_at: DateTime<Utc>,
}

/// Applications of one sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceQueue {
    pub sequence_id: SequenceId,
    pub sequence_name: String,
    pub group: Option<GroupId>,
    pub applications: Vec<ApplicationSummary>,
}

/// Admin aggregation: sequences grouped by their owning collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupQueue {
    pub group: Option<GroupId>,
    pub sequences: Vec<SequenceQueue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewerIdentity {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepHistoryEntry {
    pub record_id: RecordId,
    pub step_id: StepId,
    pub step_name: Option<String>,
    pub reviewer: ReviewerIdentity,
    pub routing: RoutingRule,
    pub response: Option<serde_json::Value>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDescriptor {
    pub can_edit: bool,
    pub can_view: bool,
    pub can_approve: bool,
    pub assigned_to: AssignedTo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationDetail {
    pub application: ApplicationInstance,
    pub sequence_name: String,
    pub completed_level: usize,
    pub total_steps: usize,
    pub history: Vec<StepHistoryEntry>,
    pub pending_step: Option<StepDefinition>,
    pub access: AccessDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub application_id: ApplicationId,
    pub record: CompletedStepRecord,
    pub completed_level: usize,
    pub pending_step: Option<StepId>,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertReceipt {
    pub application_id: ApplicationId,
    pub reverted: CompletedStepRecord,
    pub completed_level: usize,
}
