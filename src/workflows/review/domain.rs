use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Identifier of a step sequence (one workflow definition).
    SequenceId
);
identifier!(StepId);
identifier!(
    /// Identifier wrapper for applicant submissions moving through a sequence.
    ApplicationId
);
identifier!(UserId);
identifier!(RoleId);
identifier!(RecordId);
identifier!(OrgNodeId);
identifier!(
    /// Owning collection used to aggregate sequences in admin views.
    GroupId
);
identifier!(FormId);
identifier!(TemplateId);

/// Discriminant of a routing rule, used for logs and wire labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingPolicy {
    Static,
    Dynamic,
    FollowOrganizationChart,
    NotApplicable,
}

impl RoutingPolicy {
    pub const fn label(self) -> &'static str {
        match self {
            RoutingPolicy::Static => "STATIC",
            RoutingPolicy::Dynamic => "DYNAMIC",
            RoutingPolicy::FollowOrganizationChart => "FOLLOW_ORGANIZATION_CHART",
            RoutingPolicy::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

/// Who a dynamically routed step is handed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "specified_to", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DynamicTarget {
    SingleStaff {
        #[serde(default)]
        assigned_staff_id: Option<UserId>,
    },
    AnyOfRoles {
        #[serde(default)]
        assigned_role_ids: Vec<RoleId>,
    },
}

/// Routing configuration for a step, and the snapshot stored on each ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingRule {
    Static { assigned_staff_id: UserId },
    Dynamic { target: DynamicTarget },
    FollowOrganizationChart,
    NotApplicable,
}

impl RoutingRule {
    pub fn policy(&self) -> RoutingPolicy {
        match self {
            RoutingRule::Static { .. } => RoutingPolicy::Static,
            RoutingRule::Dynamic { .. } => RoutingPolicy::Dynamic,
            RoutingRule::FollowOrganizationChart => RoutingPolicy::FollowOrganizationChart,
            RoutingRule::NotApplicable => RoutingPolicy::NotApplicable,
        }
    }

    /// Structural check applied to caller overrides and registered sequences.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RoutingRule::Static { assigned_staff_id } if assigned_staff_id.0.trim().is_empty() => {
                Err("static routing requires an assigned staff id".to_string())
            }
            RoutingRule::Dynamic {
                target:
                    DynamicTarget::AnyOfRoles {
                        assigned_role_ids,
                    },
            } if assigned_role_ids.is_empty() => {
                Err("role routing requires at least one role id".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Overrides must name a concrete assignee; definitions may leave dynamic staff unset.
    pub fn validate_override(&self) -> Result<(), String> {
        self.validate()?;
        match self {
            RoutingRule::Dynamic {
                target:
                    DynamicTarget::SingleStaff {
                        assigned_staff_id: None,
                    },
            } => Err("single staff routing requires an assigned staff id".to_string()),
            _ => Ok(()),
        }
    }
}

/// Who is told about a step becoming pending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub notify_applicant: bool,
    #[serde(default)]
    pub notify_assignee: bool,
    #[serde(default)]
    pub template: Option<String>,
}

/// One step's routing configuration within a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: StepId,
    pub order: u32,
    pub name: String,
    pub routing: RoutingRule,
    #[serde(default)]
    pub form_id: Option<FormId>,
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// Rule evaluated against collected responses to decide certificate eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalCondition {
    pub form_id: FormId,
    pub question_id: String,
    pub operator: ConditionOperator,
    pub expected_value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// Certificate issued when every condition holds once the sequence completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<ApprovalCondition>,
}

/// Ordered list of review steps for one workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSequence {
    pub id: SequenceId,
    pub name: String,
    #[serde(default)]
    pub group: Option<GroupId>,
    pub active: bool,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub certificate: Option<CertificateTemplate>,
}

impl StepSequence {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `level`, or `None` once every step has been completed.
    pub fn pending_step(&self, level: usize) -> Option<&StepDefinition> {
        self.steps.get(level)
    }

    pub fn step(&self, id: &StepId) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| &step.id == id)
    }

    /// Orders sort the steps; they must be unique and contiguous from zero.
    pub fn normalize(&mut self) -> Result<(), SequenceViolation> {
        self.steps.sort_by_key(|step| step.order);

        for (index, step) in self.steps.iter().enumerate() {
            if step.order as usize != index {
                return Err(SequenceViolation::NonContiguousOrder {
                    expected: index as u32,
                    found: step.order,
                });
            }
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(SequenceViolation::DuplicateStep(step.id.clone()));
            }
            step.routing
                .validate()
                .map_err(|reason| SequenceViolation::InvalidRouting {
                    step: step.id.clone(),
                    reason,
                })?;
        }

        Ok(())
    }
}

/// Structural problems detected when registering a sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceViolation {
    #[error("step orders must be contiguous from 0 (expected {expected}, found {found})")]
    NonContiguousOrder { expected: u32, found: u32 },
    #[error("step {0} appears more than once")]
    DuplicateStep(StepId),
    #[error("step {step} has invalid routing: {reason}")]
    InvalidRouting { step: StepId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Enabled,
    Disabled,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Enabled => "enabled",
            ApplicationStatus::Disabled => "disabled",
        }
    }
}

/// One applicant's progress through a sequence. Level is derived from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInstance {
    pub id: ApplicationId,
    pub sequence_id: SequenceId,
    pub applicant_id: UserId,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry marking a step done, with the routing that governs the step after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStepRecord {
    pub id: RecordId,
    pub application_id: ApplicationId,
    pub step_id: StepId,
    pub reviewer_id: UserId,
    pub routing: RoutingRule,
    pub created_at: DateTime<Utc>,
}

/// Submitted payload for one step of one application; unique per (step, application).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub step_id: StepId,
    pub application_id: ApplicationId,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Authenticated caller: a user id plus the role names their session carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    #[serde(default)]
    pub role_names: Vec<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            role_names: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_names = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Actor with role names already resolved to enabled role ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedActor {
    pub user_id: UserId,
    pub role_ids: BTreeSet<RoleId>,
}
