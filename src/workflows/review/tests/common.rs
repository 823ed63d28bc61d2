use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::config::WorkflowConfig;
use crate::workflows::review::collaborators::{
    AuditError, AuditEvent, AuditLog, NotificationDispatcher, NotificationError, StepNotice,
};
use crate::workflows::review::dispatch::SideEffectQueue;
use crate::workflows::review::domain::{
    Actor, ApplicationId, ApprovalCondition, CertificateTemplate, ConditionOperator,
    DynamicTarget, FormId, GroupId, NotificationConfig, OrgNodeId, Role, RoleId, RoutingRule,
    SequenceId, StepDefinition, StepId, StepSequence, TemplateId, UserId, UserProfile,
};
use crate::workflows::review::eligibility::{
    CertificateEligibilityEvaluator, EligibilityError, EligibilityOutcome, ResponsesByForm,
    RuleBasedEligibility,
};
use crate::workflows::review::engine::{StepSubmission, WorkflowEngine, WorkflowError};
use crate::workflows::review::hierarchy::{OrgHierarchy, OrgNode};
use crate::workflows::review::memory::{MemoryDirectory, MemoryWorkflowRepository};
use crate::workflows::review::repository::WorkflowRepository;
use crate::workflows::review::views::SubmissionReceipt;

pub(super) const APPLICANT: &str = "u-applicant";
pub(super) const REVIEWER_ONE: &str = "u-reviewer-1";
pub(super) const REVIEWER_TWO: &str = "u-reviewer-2";
pub(super) const MANAGER: &str = "u-manager";
pub(super) const DIRECTOR: &str = "u-director";
pub(super) const ADMIN: &str = "u-admin";

pub(super) const TWO_STEP: &str = "seq-two-step";
pub(super) const ORG_CHART: &str = "seq-org-chart";
pub(super) const ROLE_ROUTED: &str = "seq-role-routed";
pub(super) const CERTIFIED: &str = "seq-certified";

pub(super) type TestEngine = WorkflowEngine<MemoryWorkflowRepository, MemoryDirectory>;

pub(super) fn actor(user_id: &str) -> Actor {
    Actor::new(user_id)
}

pub(super) fn step(id: &str, order: u32, routing: RoutingRule) -> StepDefinition {
    StepDefinition {
        id: StepId::new(id),
        order,
        name: format!("Step {id}"),
        routing,
        form_id: None,
        notification: NotificationConfig {
            notify_applicant: true,
            notify_assignee: true,
            template: None,
        },
    }
}

pub(super) fn static_to(user_id: &str) -> RoutingRule {
    RoutingRule::Static {
        assigned_staff_id: UserId::new(user_id),
    }
}

pub(super) fn sequence(id: &str, steps: Vec<StepDefinition>) -> StepSequence {
    StepSequence {
        id: SequenceId::new(id),
        name: format!("Sequence {id}"),
        group: Some(GroupId::new("grp-onboarding")),
        active: true,
        steps,
        certificate: None,
    }
}

/// Intake open to anyone, then a review assigned statically to the first reviewer.
pub(super) fn two_step_sequence() -> StepSequence {
    sequence(
        TWO_STEP,
        vec![
            step("s1-intake", 0, RoutingRule::NotApplicable),
            step("s2-review", 1, static_to(REVIEWER_ONE)),
        ],
    )
}

pub(super) fn org_chart_sequence() -> StepSequence {
    sequence(
        ORG_CHART,
        vec![
            step("oc-intake", 0, RoutingRule::NotApplicable),
            step("oc-approval", 1, RoutingRule::FollowOrganizationChart),
        ],
    )
}

pub(super) fn role_sequence() -> StepSequence {
    sequence(
        ROLE_ROUTED,
        vec![
            step("rr-intake", 0, RoutingRule::NotApplicable),
            step(
                "rr-finance",
                1,
                RoutingRule::Dynamic {
                    target: DynamicTarget::AnyOfRoles {
                        assigned_role_ids: vec![
                            RoleId::new("role-finance"),
                            RoleId::new("role-legacy"),
                        ],
                    },
                },
            ),
        ],
    )
}

pub(super) fn certified_sequence() -> StepSequence {
    let mut intake = step("ct-intake", 0, RoutingRule::NotApplicable);
    intake.form_id = Some(FormId::new("form-intake"));
    let mut review = step("ct-review", 1, static_to(REVIEWER_ONE));
    review.form_id = Some(FormId::new("form-review"));

    let mut certified = sequence(CERTIFIED, vec![intake, review]);
    certified.certificate = Some(CertificateTemplate {
        id: TemplateId::new("tpl-completion"),
        name: "Completion".to_string(),
        conditions: vec![ApprovalCondition {
            form_id: FormId::new("form-intake"),
            question_id: "q-score".to_string(),
            operator: ConditionOperator::GreaterThan,
            expected_value: json!(50),
        }],
    });
    certified
}

/// Form payload shaped like the intake forms: sections holding answered questions.
pub(super) fn form_payload(question_id: &str, response: Value) -> Value {
    json!({
        "sections": [
            { "questions": [ { "id": question_id, "response": response } ] }
        ]
    })
}

/// Director at the root, the manager below, the applicant below the manager.
pub(super) fn org_chart() -> OrgHierarchy {
    OrgHierarchy::from_nodes(vec![
        org_node("n-applicant", APPLICANT, Some("n-manager")),
        org_node("n-manager", MANAGER, Some("n-director")),
        org_node("n-director", DIRECTOR, None),
    ])
    .expect("fixture chart is valid")
}

pub(super) fn org_node(id: &str, user_id: &str, superior: Option<&str>) -> OrgNode {
    OrgNode {
        id: OrgNodeId::new(id),
        user_id: UserId::new(user_id),
        superior_id: superior.map(OrgNodeId::new),
    }
}

pub(super) fn seeded_directory() -> MemoryDirectory {
    let directory = MemoryDirectory::default();
    for (id, name) in [
        (APPLICANT, "Avery Applicant"),
        (REVIEWER_ONE, "Riley Reviewer"),
        (REVIEWER_TWO, "Rowan Reviewer"),
        (MANAGER, "Morgan Manager"),
        (DIRECTOR, "Dana Director"),
        (ADMIN, "Alex Admin"),
    ] {
        directory
            .upsert_user(UserProfile {
                id: UserId::new(id),
                display_name: name.to_string(),
                email: Some(format!("{id}@example.org")),
            })
            .expect("user seeded");
    }
    for (id, name, enabled) in [
        ("role-finance", "finance", true),
        ("role-legacy", "legacy", false),
        ("role-admin", "admin", true),
    ] {
        directory
            .upsert_role(Role {
                id: RoleId::new(id),
                name: name.to_string(),
                enabled,
            })
            .expect("role seeded");
    }
    directory
        .replace_hierarchy(org_chart())
        .expect("chart seeded");
    directory
}

pub(super) fn seeded_repository() -> MemoryWorkflowRepository {
    let repository = MemoryWorkflowRepository::default();
    for mut sequence in [
        two_step_sequence(),
        org_chart_sequence(),
        role_sequence(),
        certified_sequence(),
    ] {
        sequence.normalize().expect("fixture sequence is valid");
        repository
            .save_sequence(sequence)
            .expect("sequence seeded");
    }
    repository
}

pub(super) struct Harness {
    pub(super) engine: TestEngine,
    pub(super) repository: Arc<MemoryWorkflowRepository>,
    pub(super) directory: Arc<MemoryDirectory>,
    pub(super) audit: Arc<MemoryAudit>,
    pub(super) notifier: Arc<MemoryNotifier>,
    pub(super) evaluator: Arc<RecordingEvaluator>,
    pub(super) worker: JoinHandle<()>,
}

impl Harness {
    /// Drops the engine so the worker drains its queue, then waits for it.
    pub(super) async fn settle(self) -> (Arc<MemoryNotifier>, Arc<RecordingEvaluator>) {
        let Harness {
            engine,
            notifier,
            evaluator,
            worker,
            ..
        } = self;
        drop(engine);
        worker.await.expect("side effect worker joins");
        (notifier, evaluator)
    }
}

/// Must run inside a tokio runtime because the side-effect worker is spawned here.
pub(super) fn build_harness(config: WorkflowConfig) -> Harness {
    let repository = Arc::new(seeded_repository());
    let directory = Arc::new(seeded_directory());
    let audit = Arc::new(MemoryAudit::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let evaluator = Arc::new(RecordingEvaluator::default());
    let (queue, worker) =
        SideEffectQueue::spawn(notifier.clone(), evaluator.clone(), config.queue_capacity);
    let engine = WorkflowEngine::new(
        repository.clone(),
        directory.clone(),
        audit.clone(),
        queue,
        config,
    );

    Harness {
        engine,
        repository,
        directory,
        audit,
        notifier,
        evaluator,
        worker,
    }
}

pub(super) fn build_default() -> Harness {
    build_harness(WorkflowConfig::default())
}

pub(super) fn start(engine: &TestEngine, applicant: &str, sequence_id: &str) -> SubmissionReceipt {
    engine
        .start_application(
            &actor(applicant),
            &SequenceId::new(sequence_id),
            json!({ "note": "intake" }),
            None,
        )
        .expect("application starts")
}

pub(super) fn submit(
    engine: &TestEngine,
    actor: &Actor,
    application_id: &ApplicationId,
    step_id: &str,
) -> Result<SubmissionReceipt, WorkflowError> {
    engine.submit_step(
        actor,
        StepSubmission {
            application_id: application_id.clone(),
            step_id: StepId::new(step_id),
            payload: json!({ "decision": "approve" }),
            routing_override: None,
        },
    )
}

#[derive(Default, Clone)]
pub(super) struct MemoryAudit {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAudit {
    pub(super) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit mutex poisoned").clone()
    }
}

impl AuditLog for MemoryAudit {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .expect("audit mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct UnavailableAudit;

impl AuditLog for UnavailableAudit {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("audit store offline".to_string()))
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryNotifier {
    notices: Arc<Mutex<Vec<StepNotice>>>,
}

impl MemoryNotifier {
    pub(super) fn notices(&self) -> Vec<StepNotice> {
        self.notices.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationDispatcher for MemoryNotifier {
    fn notify(&self, notice: StepNotice) -> Result<(), NotificationError> {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl NotificationDispatcher for FailingNotifier {
    fn notify(&self, _notice: StepNotice) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay down".to_string()))
    }
}

/// Delegates to the rule-based evaluator and remembers every outcome.
#[derive(Default)]
pub(super) struct RecordingEvaluator {
    inner: RuleBasedEligibility,
    outcomes: Mutex<Vec<(ApplicationId, EligibilityOutcome)>>,
}

impl RecordingEvaluator {
    pub(super) fn outcomes(&self) -> Vec<(ApplicationId, EligibilityOutcome)> {
        self.outcomes
            .lock()
            .expect("evaluator mutex poisoned")
            .clone()
    }
}

impl CertificateEligibilityEvaluator for RecordingEvaluator {
    fn evaluate(
        &self,
        application_id: &ApplicationId,
        template: &CertificateTemplate,
        responses: &ResponsesByForm,
    ) -> Result<EligibilityOutcome, EligibilityError> {
        let outcome = self.inner.evaluate(application_id, template, responses)?;
        self.outcomes
            .lock()
            .expect("evaluator mutex poisoned")
            .push((application_id.clone(), outcome.clone()));
        Ok(outcome)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
