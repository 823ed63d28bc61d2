//! Ordered review steps, per-step routing policies and the completion ledger.
//!
//! An application's level is the number of records in its ledger. Each record carries the
//! routing rule that decides who may act on the step after it, so reassignment mid-flight
//! only touches the newest record.

pub mod collaborators;
pub mod dispatch;
pub mod domain;
pub mod eligibility;
pub mod engine;
pub mod hierarchy;
pub mod memory;
pub mod repository;
pub mod router;
pub mod routing;
pub mod views;

#[cfg(test)]
mod tests;

pub use collaborators::{
    AuditError, AuditEvent, AuditLog, AuditStatus, NotificationDispatcher, NotificationError,
    StepNotice,
};
pub use dispatch::{SideEffect, SideEffectQueue};
pub use domain::{
    Actor, ApplicationId, ApplicationInstance, ApplicationStatus, ApprovalCondition,
    CertificateTemplate, CompletedStepRecord, ConditionOperator, DynamicTarget, FormId, GroupId,
    NotificationConfig, OrgNodeId, RecordId, ResolvedActor, ResponseRecord, Role, RoleId,
    RoutingPolicy, RoutingRule, SequenceId, SequenceViolation, StepDefinition, StepId,
    StepSequence, TemplateId, UserId, UserProfile,
};
pub use eligibility::{
    CertificateEligibilityEvaluator, EligibilityError, EligibilityOutcome, ResponsesByForm,
    RuleBasedEligibility,
};
pub use engine::{ErrorKind, StepSubmission, WorkflowEngine, WorkflowError};
pub use hierarchy::{HierarchyError, OrgHierarchy, OrgNode, OrgTreeNode};
pub use memory::{MemoryDirectory, MemoryWorkflowRepository};
pub use repository::{Directory, RepositoryError, StepCompletion, WorkflowRepository};
pub use router::{application_router, ACTOR_ID_HEADER, ACTOR_ROLES_HEADER, ADMIN_ROLE};
pub use routing::{AssignedTo, RoutingResolver};
pub use views::{
    AccessDescriptor, ApplicationDetail, ApplicationSummary, GroupQueue, ListFilter, ListState,
    ReviewerIdentity, RevertReceipt, SequenceQueue, StepHistoryEntry, SubmissionReceipt,
};
