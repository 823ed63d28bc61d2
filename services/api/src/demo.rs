use crate::infra::{
    InMemoryAuditLog, InMemoryNotifier, SeedData, DEMO_ADMIN, DEMO_APPLICANT, DEMO_BYSTANDER,
    DEMO_REVIEWER, DEMO_SEQUENCE,
};
use chrono::SecondsFormat;
use clap::Args;
use review_routing::config::WorkflowConfig;
use review_routing::error::AppError;
use review_routing::workflows::review::{
    Actor, ApplicationDetail, AuditStatus, ListFilter, MemoryDirectory, MemoryWorkflowRepository,
    RuleBasedEligibility, SequenceId, SequenceQueue, SideEffectQueue, StepId, StepSubmission,
    WorkflowEngine,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Accept submissions for any step in the sequence, not just the pending one.
    #[arg(long)]
    pub(crate) lenient: bool,
    /// Skip the admin revert at the end of the walkthrough.
    #[arg(long)]
    pub(crate) skip_revert: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let repository = Arc::new(MemoryWorkflowRepository::default());
    let directory = Arc::new(MemoryDirectory::default());
    SeedData::demo().apply(&repository, &directory)?;

    let audit = Arc::new(InMemoryAuditLog::default());
    let notifier = Arc::new(InMemoryNotifier::default());
    let config = WorkflowConfig {
        strict_step_order: !args.lenient,
        ..WorkflowConfig::default()
    };
    let (side_effects, worker) = SideEffectQueue::spawn(
        notifier.clone(),
        Arc::new(RuleBasedEligibility::new()),
        config.queue_capacity,
    );
    let engine = WorkflowEngine::new(repository, directory, audit.clone(), side_effects, config);

    let applicant = Actor::new(DEMO_APPLICANT);
    let reviewer = Actor::new(DEMO_REVIEWER);
    let bystander = Actor::new(DEMO_BYSTANDER).with_roles(["procurement"]);
    let admin = Actor::new(DEMO_ADMIN).with_roles(["admin"]);
    let sequence_id = SequenceId::new(DEMO_SEQUENCE);

    println!("Review routing demo");
    println!("Sequence: {sequence_id}");

    let started = engine.start_application(
        &applicant,
        &sequence_id,
        json!({ "vendor": "Northwind Supplies", "category": "office equipment" }),
        None,
    )?;
    let application_id = started.application_id.clone();
    println!(
        "\n{} submitted {} ({}); level {}",
        applicant.user_id, started.record.step_id, application_id, started.completed_level
    );
    println!(
        "  Next step routed by {}",
        started.record.routing.policy().label()
    );

    let filter = ListFilter {
        sequence_id: Some(sequence_id.clone()),
        group: None,
    };
    println!("\nPending queues");
    for actor in [&reviewer, &bystander] {
        let queues = engine.list_pending(actor, &filter, false)?;
        println!(
            "  {:<16} {} application(s)",
            actor.user_id.as_str(),
            application_count(&queues)
        );
    }

    let review_step = StepId::new("procurement-review");
    match engine.submit_step(
        &bystander,
        StepSubmission {
            application_id: application_id.clone(),
            step_id: review_step.clone(),
            payload: json!({ "decision": "approve" }),
            routing_override: None,
        },
    ) {
        Ok(_) => println!("\n{} unexpectedly completed the review", bystander.user_id),
        Err(err) => println!("\n{} refused: {}", bystander.user_id, err),
    }

    let reviewed = engine.submit_step(
        &reviewer,
        StepSubmission {
            application_id: application_id.clone(),
            step_id: review_step,
            payload: json!({ "decision": "approve", "notes": "pricing within budget" }),
            routing_override: None,
        },
    )?;
    println!(
        "{} approved; level {} (complete: {})",
        reviewer.user_id, reviewed.completed_level, reviewed.complete
    );

    let detail = engine.get_application(&reviewer, &application_id)?;
    render_history(&detail);

    if !args.skip_revert {
        let reverted = engine.revert(&admin, &application_id)?;
        println!(
            "\n{} reverted {}; level back to {}",
            admin.user_id, reverted.reverted.step_id, reverted.completed_level
        );
    }

    drop(engine);
    if let Err(err) = worker.await {
        println!("\nSide effect worker stopped abnormally: {err}");
    }

    let notices = notifier.notices();
    if notices.is_empty() {
        println!("\nNotifications: none dispatched");
    } else {
        println!("\nNotifications");
        for notice in notices {
            println!(
                "  {} is now pending for {} (after {})",
                notice.step.name, notice.applicant.display_name, notice.reviewer.display_name
            );
        }
    }

    println!("\nAudit trail");
    for event in audit.events() {
        let status = match event.status {
            AuditStatus::Success => "ok",
            AuditStatus::Failure => "failed",
        };
        println!(
            "  {:<20} {:<6} {:<16} {}",
            event.action,
            status,
            event.actor_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            event.resource_id.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

fn application_count(queues: &[SequenceQueue]) -> usize {
    queues.iter().map(|queue| queue.applications.len()).sum()
}

fn render_history(detail: &ApplicationDetail) {
    println!(
        "\nHistory for {} ({}/{} steps)",
        detail.application.id, detail.completed_level, detail.total_steps
    );
    for entry in &detail.history {
        let step = entry
            .step_name
            .clone()
            .unwrap_or_else(|| entry.step_id.to_string());
        let reviewer = entry
            .reviewer
            .display_name
            .clone()
            .unwrap_or_else(|| entry.reviewer.user_id.to_string());
        println!(
            "  {:<20} by {:<16} at {} (routing {})",
            step,
            reviewer,
            entry.completed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            entry.routing.policy().label()
        );
    }
}
