use metrics_exporter_prometheus::PrometheusHandle;
use review_routing::error::AppError;
use review_routing::workflows::review::{
    AuditError, AuditEvent, AuditLog, AuditStatus, DynamicTarget, MemoryDirectory,
    MemoryWorkflowRepository, NotificationConfig, NotificationDispatcher, NotificationError,
    OrgHierarchy, OrgNode, OrgNodeId, Role, RoleId, RoutingRule, SequenceId, StepDefinition,
    StepId, StepNotice, StepSequence, UserId, UserProfile, WorkflowError, WorkflowRepository,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) const DEMO_APPLICANT: &str = "applicant-avery";
pub(crate) const DEMO_REVIEWER: &str = "reviewer-riley";
pub(crate) const DEMO_BYSTANDER: &str = "reviewer-rowan";
pub(crate) const DEMO_MANAGER: &str = "manager-morgan";
pub(crate) const DEMO_DIRECTOR: &str = "director-dana";
pub(crate) const DEMO_ADMIN: &str = "admin-alex";
pub(crate) const DEMO_SEQUENCE: &str = "seq-vendor-onboarding";

/// Logs notices; delivery adapters (mail, chat) plug in behind the same trait.
#[derive(Default, Clone)]
pub(crate) struct TracingNotifier;

impl NotificationDispatcher for TracingNotifier {
    fn notify(&self, notice: StepNotice) -> Result<(), NotificationError> {
        let NotificationConfig {
            notify_applicant,
            notify_assignee,
            template,
        } = &notice.step.notification;

        if !notify_applicant && !notify_assignee {
            debug!(application_id = %notice.application_id, step_id = %notice.step.id, "step has notifications disabled");
            return Ok(());
        }

        info!(
            application_id = %notice.application_id,
            step_id = %notice.step.id,
            applicant = %notice.applicant.id,
            previous_reviewer = %notice.reviewer.id,
            notify_applicant,
            notify_assignee,
            template = template.as_deref().unwrap_or("default"),
            "step notification dispatched"
        );
        Ok(())
    }
}

/// Writes audit events to the `audit` tracing target.
#[derive(Default, Clone)]
pub(crate) struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let details = serde_json::to_string(&event.details)
            .map_err(|err| AuditError::Unavailable(err.to_string()))?;
        let status = match event.status {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        };
        info!(
            target: "audit",
            action = %event.action,
            resource = %event.resource,
            resource_id = event.resource_id.as_deref().unwrap_or("-"),
            actor = event.actor_id.as_ref().map(UserId::as_str).unwrap_or("-"),
            status,
            %details,
            "audit event"
        );
        Ok(())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl AuditLog for InMemoryAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| AuditError::Unavailable("audit buffer poisoned".to_string()))?;
        guard.push(event);
        Ok(())
    }
}

impl InMemoryAuditLog {
    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryNotifier {
    notices: Arc<Mutex<Vec<StepNotice>>>,
}

impl NotificationDispatcher for InMemoryNotifier {
    fn notify(&self, notice: StepNotice) -> Result<(), NotificationError> {
        let mut guard = self
            .notices
            .lock()
            .map_err(|_| NotificationError::Transport("notice buffer poisoned".to_string()))?;
        guard.push(notice);
        Ok(())
    }
}

impl InMemoryNotifier {
    pub(crate) fn notices(&self) -> Vec<StepNotice> {
        self.notices
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

/// Reference data loaded at startup from `WORKFLOW_SEED_PATH`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SeedData {
    #[serde(default)]
    pub(crate) sequences: Vec<StepSequence>,
    #[serde(default)]
    pub(crate) users: Vec<UserProfile>,
    #[serde(default)]
    pub(crate) roles: Vec<Role>,
    #[serde(default)]
    pub(crate) org_chart: Vec<OrgNode>,
}

impl SeedData {
    pub(crate) fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Vendor onboarding: open intake, a static review, then the reviewer's-line approval.
    pub(crate) fn demo() -> Self {
        let users = [
            (DEMO_APPLICANT, "Avery Applicant"),
            (DEMO_REVIEWER, "Riley Reviewer"),
            (DEMO_BYSTANDER, "Rowan Reviewer"),
            (DEMO_MANAGER, "Morgan Manager"),
            (DEMO_DIRECTOR, "Dana Director"),
            (DEMO_ADMIN, "Alex Admin"),
        ]
        .into_iter()
        .map(|(id, name)| UserProfile {
            id: UserId::new(id),
            display_name: name.to_string(),
            email: Some(format!("{id}@example.org")),
        })
        .collect();

        let roles = vec![
            Role {
                id: RoleId::new("role-procurement"),
                name: "procurement".to_string(),
                enabled: true,
            },
            Role {
                id: RoleId::new("role-admin"),
                name: "admin".to_string(),
                enabled: true,
            },
        ];

        let org_chart = vec![
            org_node("org-director", DEMO_DIRECTOR, None),
            org_node("org-manager", DEMO_MANAGER, Some("org-director")),
            org_node("org-applicant", DEMO_APPLICANT, Some("org-manager")),
            org_node("org-reviewer", DEMO_REVIEWER, Some("org-manager")),
        ];

        let onboarding = StepSequence {
            id: SequenceId::new(DEMO_SEQUENCE),
            name: "Vendor onboarding".to_string(),
            group: None,
            active: true,
            steps: vec![
                demo_step("vendor-intake", 0, "Vendor intake", RoutingRule::NotApplicable),
                demo_step(
                    "procurement-review",
                    1,
                    "Procurement review",
                    RoutingRule::Static {
                        assigned_staff_id: UserId::new(DEMO_REVIEWER),
                    },
                ),
            ],
            certificate: None,
        };

        let escalation = StepSequence {
            id: SequenceId::new("seq-budget-escalation"),
            name: "Budget escalation".to_string(),
            group: None,
            active: true,
            steps: vec![
                demo_step("budget-request", 0, "Budget request", RoutingRule::NotApplicable),
                demo_step(
                    "procurement-check",
                    1,
                    "Procurement check",
                    RoutingRule::Dynamic {
                        target: DynamicTarget::AnyOfRoles {
                            assigned_role_ids: vec![RoleId::new("role-procurement")],
                        },
                    },
                ),
                demo_step(
                    "line-approval",
                    2,
                    "Line manager approval",
                    RoutingRule::FollowOrganizationChart,
                ),
            ],
            certificate: None,
        };

        Self {
            sequences: vec![onboarding, escalation],
            users,
            roles,
            org_chart,
        }
    }

    pub(crate) fn apply(
        self,
        repository: &MemoryWorkflowRepository,
        directory: &MemoryDirectory,
    ) -> Result<(), AppError> {
        let SeedData {
            sequences,
            users,
            roles,
            org_chart,
        } = self;

        let sequence_count = sequences.len();
        for mut sequence in sequences {
            sequence.normalize().map_err(WorkflowError::from)?;
            repository.save_sequence(sequence)?;
        }
        for user in users {
            directory.upsert_user(user)?;
        }
        for role in roles {
            directory.upsert_role(role)?;
        }
        let hierarchy = OrgHierarchy::from_nodes(org_chart).map_err(WorkflowError::from)?;
        let org_nodes = hierarchy.len();
        directory.replace_hierarchy(hierarchy)?;

        info!(sequences = sequence_count, org_nodes, "seed data applied");
        Ok(())
    }
}

fn org_node(id: &str, user_id: &str, superior: Option<&str>) -> OrgNode {
    OrgNode {
        id: OrgNodeId::new(id),
        user_id: UserId::new(user_id),
        superior_id: superior.map(OrgNodeId::new),
    }
}

fn demo_step(id: &str, order: u32, name: &str, routing: RoutingRule) -> StepDefinition {
    StepDefinition {
        id: StepId::new(id),
        order,
        name: name.to_string(),
        routing,
        form_id: None,
        notification: NotificationConfig {
            notify_applicant: true,
            notify_assignee: true,
            template: None,
        },
    }
}
