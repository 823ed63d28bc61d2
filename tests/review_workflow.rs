use std::sync::{Arc, Mutex};

use review_routing::config::WorkflowConfig;
use review_routing::workflows::review::{
    Actor, ApplicationId, AuditError, AuditEvent, AuditLog, CompletedStepRecord, Directory, ListFilter,
    MemoryDirectory, MemoryWorkflowRepository, NotificationConfig, NotificationDispatcher,
    NotificationError, OrgHierarchy, OrgNode, OrgNodeId, Role, RoleId, RoutingRule,
    RuleBasedEligibility, SequenceId, SideEffectQueue, StepDefinition, StepId, StepNotice,
    StepSequence, StepSubmission, UserId, UserProfile, WorkflowEngine, WorkflowError,
    WorkflowRepository,
};
use serde_json::json;

const APPLICANT: &str = "applicant";
const R1: &str = "reviewer-one";
const R2: &str = "reviewer-two";

#[derive(Default)]
struct CollectingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditLog for CollectingAudit {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.lock().expect("audit mutex poisoned").push(event);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingNotifier {
    notices: Mutex<Vec<StepNotice>>,
}

impl NotificationDispatcher for CollectingNotifier {
    fn notify(&self, notice: StepNotice) -> Result<(), NotificationError> {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}

fn step(id: &str, order: u32, routing: RoutingRule) -> StepDefinition {
    StepDefinition {
        id: StepId::new(id),
        order,
        name: id.to_string(),
        routing,
        form_id: None,
        notification: NotificationConfig::default(),
    }
}

fn stores() -> (Arc<MemoryWorkflowRepository>, Arc<MemoryDirectory>) {
    let repository = Arc::new(MemoryWorkflowRepository::default());
    let mut sequence = StepSequence {
        id: SequenceId::new("seq-e2e"),
        name: "End to end".to_string(),
        group: None,
        active: true,
        steps: vec![
            step("S1", 0, RoutingRule::NotApplicable),
            step(
                "S2",
                1,
                RoutingRule::Static {
                    assigned_staff_id: UserId::new(R1),
                },
            ),
        ],
        certificate: None,
    };
    sequence.normalize().expect("sequence is valid");
    repository.save_sequence(sequence).expect("sequence saved");

    let directory = Arc::new(MemoryDirectory::default());
    for id in [APPLICANT, R1, R2] {
        directory
            .upsert_user(UserProfile {
                id: UserId::new(id),
                display_name: id.to_string(),
                email: None,
            })
            .expect("user saved");
    }
    directory
        .upsert_role(Role {
            id: RoleId::new("role-staff"),
            name: "staff".to_string(),
            enabled: true,
        })
        .expect("role saved");
    directory
        .replace_hierarchy(
            OrgHierarchy::from_nodes(vec![
                OrgNode {
                    id: OrgNodeId::new("n-r1"),
                    user_id: UserId::new(R1),
                    superior_id: None,
                },
                OrgNode {
                    id: OrgNodeId::new("n-applicant"),
                    user_id: UserId::new(APPLICANT),
                    superior_id: Some(OrgNodeId::new("n-r1")),
                },
            ])
            .expect("chart valid"),
        )
        .expect("chart saved");

    (repository, directory)
}

fn submission(application_id: &ApplicationId, step_id: &str) -> StepSubmission {
    StepSubmission {
        application_id: application_id.clone(),
        step_id: StepId::new(step_id),
        payload: json!({ "answer": step_id }),
        routing_override: None,
    }
}

fn latest(ledger: &[CompletedStepRecord]) -> Option<&CompletedStepRecord> {
    ledger.iter().max_by_key(|record| record.created_at)
}

#[tokio::test]
async fn two_step_sequence_routes_past_the_unassigned_reviewer() {
    let (repository, directory) = stores();
    let audit = Arc::new(CollectingAudit::default());
    let notifier = Arc::new(CollectingNotifier::default());
    let (queue, worker) =
        SideEffectQueue::spawn(notifier.clone(), Arc::new(RuleBasedEligibility::new()), 8);
    let engine = WorkflowEngine::new(
        repository.clone(),
        directory.clone(),
        audit.clone(),
        queue,
        WorkflowConfig::default(),
    );

    let applicant = Actor::new(APPLICANT);
    let r1 = Actor::new(R1).with_roles(["staff"]);
    let r2 = Actor::new(R2).with_roles(["staff"]);
    let filter = ListFilter::default();

    let started = engine
        .start_application(&applicant, &SequenceId::new("seq-e2e"), json!({}), None)
        .expect("intake accepted");
    let id = started.application_id.clone();
    assert_eq!(started.completed_level, 1);

    // Level equals ledger length and the newest record governs the pending step.
    let ledger = repository.ledger(&id).expect("ledger reads");
    assert_eq!(ledger.len(), 1);
    assert_eq!(
        latest(&ledger).map(|record| record.routing.clone()),
        Some(RoutingRule::Static {
            assigned_staff_id: UserId::new(R1)
        })
    );

    let r2_pending = engine.list_pending(&r2, &filter, false).expect("listing");
    assert!(r2_pending.is_empty());
    let r1_pending = engine.list_pending(&r1, &filter, false).expect("listing");
    assert_eq!(r1_pending[0].applications[0].application_id, id);

    match engine.submit_step(&r2, submission(&id, "S2")) {
        Err(WorkflowError::Forbidden { .. }) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }
    match engine.get_application(&r2, &id) {
        Err(WorkflowError::Forbidden { .. }) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }

    let done = engine
        .submit_step(&r1, submission(&id, "S2"))
        .expect("routed reviewer submits");
    assert!(done.complete);
    assert_eq!(repository.completed_level(&id).expect("level"), 2);
    assert_eq!(repository.responses(&id).expect("responses").len(), 2);

    match engine.submit_step(&r1, submission(&id, "S2")) {
        Err(WorkflowError::SequenceComplete(_)) => {}
        other => panic!("expected completed sequence, got {other:?}"),
    }

    let r2_completed = engine.list_completed(&r2, &filter, false).expect("listing");
    assert!(r2_completed.is_empty());

    let reverted = engine
        .revert(&Actor::new("admin"), &id)
        .expect("revert succeeds");
    assert_eq!(reverted.reverted.step_id, StepId::new("S2"));
    assert_eq!(reverted.completed_level, 1);
    engine
        .submit_step(&r1, submission(&id, "S2"))
        .expect("step resubmits after revert");

    drop(engine);
    worker.await.expect("worker joins");

    let notices = notifier.notices.lock().expect("notifier mutex poisoned");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].step.id, StepId::new("S2"));

    let events = audit.events.lock().expect("audit mutex poisoned");
    assert_eq!(events.len(), 10);

    let hierarchy = directory.hierarchy().expect("hierarchy reads");
    assert!(hierarchy.reports_to(&UserId::new(APPLICANT), &UserId::new(R1)));
}
