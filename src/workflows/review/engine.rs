use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;

use super::collaborators::{AuditEvent, AuditLog, StepNotice};
use super::dispatch::{SideEffect, SideEffectQueue};
use super::domain::{
    Actor, ApplicationId, ApplicationInstance, ApplicationStatus, CompletedStepRecord, OrgNodeId,
    RecordId, ResolvedActor, ResponseRecord, RoutingRule, SequenceId, SequenceViolation, StepId,
    StepSequence, UserId, UserProfile,
};
use super::eligibility::ResponsesByForm;
use super::hierarchy::{HierarchyError, OrgNode, OrgTreeNode};
use super::repository::{Directory, RepositoryError, StepCompletion, WorkflowRepository};
use super::routing::{AssignedTo, RoutingResolver};
use super::views::{
    AccessDescriptor, ApplicationDetail, ApplicationSummary, GroupQueue, ListFilter, ListState,
    ReviewerIdentity, RevertReceipt, SequenceQueue, StepHistoryEntry, SubmissionReceipt,
};

/// A response for one step, optionally redirecting who handles the following step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSubmission {
    pub application_id: ApplicationId,
    pub step_id: StepId,
    pub payload: serde_json::Value,
    pub routing_override: Option<RoutingRule>,
}

/// Orchestrates submissions, listings, detail views and reverts over the ledger.
pub struct WorkflowEngine<R, D> {
    repository: Arc<R>,
    directory: Arc<D>,
    audit: Arc<dyn AuditLog>,
    side_effects: SideEffectQueue,
    config: WorkflowConfig,
}

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static RECORD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("app-{id:06}"))
}

fn next_record_id() -> RecordId {
    let id = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RecordId(format!("rec-{id:08}"))
}

/// Most recent record by creation time; ties resolve to the later append.
fn latest_record(ledger: &[CompletedStepRecord]) -> Option<&CompletedStepRecord> {
    ledger
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ia.cmp(ib)))
        .map(|(_, record)| record)
}

impl<R, D> WorkflowEngine<R, D>
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    pub fn new(
        repository: Arc<R>,
        directory: Arc<D>,
        audit: Arc<dyn AuditLog>,
        side_effects: SideEffectQueue,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            repository,
            directory,
            audit,
            side_effects,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Validate and store a sequence definition. Steps are sorted by order.
    pub fn register_sequence(
        &self,
        actor: &Actor,
        sequence: StepSequence,
    ) -> Result<StepSequence, WorkflowError> {
        let event = AuditEvent::new("sequence.register", "step_sequence")
            .resource_id(&sequence.id)
            .actor(&actor.user_id);

        let outcome = (|| -> Result<StepSequence, WorkflowError> {
            let mut sequence = sequence;
            sequence.normalize()?;
            self.repository.save_sequence(sequence.clone())?;
            info!(sequence_id = %sequence.id, steps = sequence.len(), "sequence registered");
            Ok(sequence)
        })();

        self.audited(event, outcome)
    }

    /// Create an enabled instance at level 0 owned by the actor.
    pub fn create_application(
        &self,
        actor: &Actor,
        sequence_id: &SequenceId,
    ) -> Result<ApplicationInstance, WorkflowError> {
        let event = AuditEvent::new("application.create", "application_instance")
            .actor(&actor.user_id)
            .detail("sequence_id", sequence_id);
        let outcome = self.create_inner(actor, sequence_id);
        let event = match &outcome {
            Ok(instance) => event.resource_id(&instance.id),
            Err(_) => event,
        };
        self.audited(event, outcome)
    }

    /// Create an instance and submit its intake step in one call.
    pub fn start_application(
        &self,
        actor: &Actor,
        sequence_id: &SequenceId,
        payload: serde_json::Value,
        routing_override: Option<RoutingRule>,
    ) -> Result<SubmissionReceipt, WorkflowError> {
        let event = AuditEvent::new("application.start", "application_instance")
            .actor(&actor.user_id)
            .detail("sequence_id", sequence_id);

        let outcome = self.create_inner(actor, sequence_id).and_then(|instance| {
            let intake = self.active_sequence(sequence_id).and_then(|sequence| {
                sequence
                    .pending_step(0)
                    .map(|step| step.id.clone())
                    .ok_or_else(|| WorkflowError::EmptySequence(sequence_id.clone()))
            });
            let submission = intake.map(|step_id| StepSubmission {
                application_id: instance.id.clone(),
                step_id,
                payload,
                routing_override,
            });
            let receipt =
                submission.and_then(|submission| self.submit_inner(actor, submission, true));

            if receipt.is_err() {
                if let Err(error) = self.repository.delete_instance(&instance.id) {
                    warn!(application_id = %instance.id, %error, "failed to discard unstarted application");
                }
            }
            receipt
        });

        let event = match &outcome {
            Ok(receipt) => event
                .resource_id(&receipt.application_id)
                .detail("completed_level", receipt.completed_level),
            Err(_) => event,
        };
        self.audited(event, outcome)
    }

    /// Record a response for the pending step and advance the ledger by one.
    pub fn submit_step(
        &self,
        actor: &Actor,
        submission: StepSubmission,
    ) -> Result<SubmissionReceipt, WorkflowError> {
        let event = AuditEvent::new("step.submit", "application_instance")
            .resource_id(&submission.application_id)
            .actor(&actor.user_id)
            .detail("step_id", &submission.step_id);
        let outcome = self.submit_inner(actor, submission, self.config.strict_step_order);
        let event = match &outcome {
            Ok(receipt) => event.detail("completed_level", receipt.completed_level),
            Err(_) => event,
        };
        self.audited(event, outcome)
    }

    /// Reviewer-side submission against whatever step is currently pending.
    pub fn process_application(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
        payload: serde_json::Value,
        routing_override: Option<RoutingRule>,
    ) -> Result<SubmissionReceipt, WorkflowError> {
        let event = AuditEvent::new("application.process", "application_instance")
            .resource_id(application_id)
            .actor(&actor.user_id);

        let outcome = self.pending_step_id(application_id).and_then(|step_id| {
            self.submit_inner(
                actor,
                StepSubmission {
                    application_id: application_id.clone(),
                    step_id,
                    payload,
                    routing_override,
                },
                true,
            )
        });

        let event = match &outcome {
            Ok(receipt) => event
                .detail("step_id", &receipt.record.step_id)
                .detail("completed_level", receipt.completed_level),
            Err(_) => event,
        };
        self.audited(event, outcome)
    }

    pub fn list_pending(
        &self,
        actor: &Actor,
        filter: &ListFilter,
        admin_view: bool,
    ) -> Result<Vec<SequenceQueue>, WorkflowError> {
        self.list_applications(actor, ListState::Pending, filter, admin_view)
    }

    pub fn list_completed(
        &self,
        actor: &Actor,
        filter: &ListFilter,
        admin_view: bool,
    ) -> Result<Vec<SequenceQueue>, WorkflowError> {
        self.list_applications(actor, ListState::Completed, filter, admin_view)
    }

    pub fn list_disabled(
        &self,
        actor: &Actor,
        filter: &ListFilter,
        admin_view: bool,
    ) -> Result<Vec<SequenceQueue>, WorkflowError> {
        self.list_applications(actor, ListState::Disabled, filter, admin_view)
    }

    /// Applications in `state`, grouped by sequence. Without `admin_view` only those the
    /// actor may currently act on are returned.
    pub fn list_applications(
        &self,
        actor: &Actor,
        state: ListState,
        filter: &ListFilter,
        admin_view: bool,
    ) -> Result<Vec<SequenceQueue>, WorkflowError> {
        let event = AuditEvent::new("application.list", "application_instance")
            .actor(&actor.user_id)
            .detail("state", state.label())
            .detail("admin_view", admin_view);
        let outcome = self.list_inner(actor, state, filter, admin_view);
        self.audited(event, outcome)
    }

    /// Admin aggregation of every matching application, grouped by group then sequence.
    pub fn list_admin(
        &self,
        actor: &Actor,
        state: ListState,
        filter: &ListFilter,
    ) -> Result<Vec<GroupQueue>, WorkflowError> {
        let event = AuditEvent::new("application.list_admin", "application_instance")
            .actor(&actor.user_id)
            .detail("state", state.label());

        let outcome = self.list_inner(actor, state, filter, true).map(|queues| {
            let mut grouped: BTreeMap<_, Vec<SequenceQueue>> = BTreeMap::new();
            for queue in queues {
                grouped.entry(queue.group.clone()).or_default().push(queue);
            }
            grouped
                .into_iter()
                .map(|(group, sequences)| GroupQueue { group, sequences })
                .collect()
        });
        self.audited(event, outcome)
    }

    /// Full history, pending step and access descriptor for one application.
    pub fn get_application(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<ApplicationDetail, WorkflowError> {
        let event = AuditEvent::new("application.view", "application_instance")
            .resource_id(application_id)
            .actor(&actor.user_id);
        let outcome = self.detail_inner(actor, application_id);
        self.audited(event, outcome)
    }

    /// Remove the most recently created ledger record and its response.
    pub fn revert(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<RevertReceipt, WorkflowError> {
        let event = AuditEvent::new("step.revert", "application_instance")
            .resource_id(application_id)
            .actor(&actor.user_id);

        let outcome = (|| -> Result<RevertReceipt, WorkflowError> {
            self.instance(application_id)?;
            let reverted = self
                .repository
                .revert_latest(application_id)?
                .ok_or_else(|| WorkflowError::NothingToRevert(application_id.clone()))?;
            let completed_level = self.repository.completed_level(application_id)?;
            info!(
                %application_id,
                step_id = %reverted.step_id,
                completed_level,
                "step reverted"
            );
            Ok(RevertReceipt {
                application_id: application_id.clone(),
                reverted,
                completed_level,
            })
        })();

        let event = match &outcome {
            Ok(receipt) => event
                .detail("step_id", &receipt.reverted.step_id)
                .detail("completed_level", receipt.completed_level),
            Err(_) => event,
        };
        self.audited(event, outcome)
    }

    /// Toggle enabled/disabled without touching the ledger.
    pub fn set_status(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<ApplicationInstance, WorkflowError> {
        let event = AuditEvent::new("application.set_status", "application_instance")
            .resource_id(application_id)
            .actor(&actor.user_id)
            .detail("status", status.label());

        let outcome = self
            .repository
            .set_status(application_id, status)
            .map_err(|error| match error {
                RepositoryError::NotFound => {
                    WorkflowError::ApplicationNotFound(application_id.clone())
                }
                other => other.into(),
            })
            .inspect(|_| info!(%application_id, status = status.label(), "status changed"));
        self.audited(event, outcome)
    }

    /// Cascade-delete an instance with its ledger and responses.
    pub fn delete_application(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<(), WorkflowError> {
        let event = AuditEvent::new("application.delete", "application_instance")
            .resource_id(application_id)
            .actor(&actor.user_id);

        let outcome = self
            .repository
            .delete_instance(application_id)
            .map_err(|error| match error {
                RepositoryError::NotFound => {
                    WorkflowError::ApplicationNotFound(application_id.clone())
                }
                other => other.into(),
            });
        self.audited(event, outcome)
    }

    pub fn add_org_node(&self, actor: &Actor, node: OrgNode) -> Result<OrgNode, WorkflowError> {
        let event = AuditEvent::new("org.add_node", "org_node")
            .resource_id(&node.id)
            .actor(&actor.user_id);
        let outcome = self
            .directory
            .insert_org_node(node.clone())
            .map(|()| node)
            .map_err(WorkflowError::from);
        self.audited(event, outcome)
    }

    /// Nodes with subordinates are rejected rather than orphaning them.
    pub fn remove_org_node(
        &self,
        actor: &Actor,
        node_id: &OrgNodeId,
    ) -> Result<OrgNode, WorkflowError> {
        let event = AuditEvent::new("org.remove_node", "org_node")
            .resource_id(node_id)
            .actor(&actor.user_id);
        let outcome = self
            .directory
            .remove_org_node(node_id)
            .map_err(WorkflowError::from);
        self.audited(event, outcome)
    }

    pub fn reassign_org_node(
        &self,
        actor: &Actor,
        node_id: &OrgNodeId,
        superior_id: &OrgNodeId,
    ) -> Result<(), WorkflowError> {
        let event = AuditEvent::new("org.reassign_node", "org_node")
            .resource_id(node_id)
            .actor(&actor.user_id)
            .detail("superior_id", superior_id);
        let outcome = self
            .directory
            .reassign_org_node(node_id, superior_id)
            .map_err(WorkflowError::from);
        self.audited(event, outcome)
    }

    pub fn org_chart(&self, actor: &Actor) -> Result<Option<OrgTreeNode>, WorkflowError> {
        let event = AuditEvent::new("org.view_chart", "org_node").actor(&actor.user_id);
        let outcome = self
            .directory
            .hierarchy()
            .map_err(WorkflowError::from)
            .and_then(|hierarchy| Ok(hierarchy.full_tree()?));
        self.audited(event, outcome)
    }

    pub fn org_subtree(
        &self,
        actor: &Actor,
        node_id: &OrgNodeId,
    ) -> Result<OrgTreeNode, WorkflowError> {
        let event = AuditEvent::new("org.view_subtree", "org_node")
            .resource_id(node_id)
            .actor(&actor.user_id);
        let outcome = self
            .directory
            .hierarchy()
            .map_err(WorkflowError::from)
            .and_then(|hierarchy| Ok(hierarchy.tree(node_id)?));
        self.audited(event, outcome)
    }

    fn audited<T>(
        &self,
        event: AuditEvent,
        outcome: Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        let event = match &outcome {
            Ok(_) => event,
            Err(error) => event
                .failed(error)
                .detail("error_kind", error.kind().label()),
        };
        let action = event.action.clone();
        if let Err(error) = self.audit.record(event) {
            warn!(%action, %error, "audit sink rejected event");
        }
        outcome
    }

    fn create_inner(
        &self,
        actor: &Actor,
        sequence_id: &SequenceId,
    ) -> Result<ApplicationInstance, WorkflowError> {
        let sequence = self.active_sequence(sequence_id)?;
        if sequence.is_empty() {
            return Err(WorkflowError::EmptySequence(sequence_id.clone()));
        }
        self.profile(&actor.user_id)?;

        let instance = ApplicationInstance {
            id: next_application_id(),
            sequence_id: sequence_id.clone(),
            applicant_id: actor.user_id.clone(),
            status: ApplicationStatus::Enabled,
            created_at: Utc::now(),
        };
        let stored = self.repository.insert_instance(instance)?;
        info!(application_id = %stored.id, %sequence_id, applicant = %stored.applicant_id, "application created");
        Ok(stored)
    }

    fn submit_inner(
        &self,
        actor: &Actor,
        submission: StepSubmission,
        strict: bool,
    ) -> Result<SubmissionReceipt, WorkflowError> {
        let StepSubmission {
            application_id,
            step_id,
            payload,
            routing_override,
        } = submission;

        let instance = self.instance(&application_id)?;
        if instance.status != ApplicationStatus::Enabled {
            return Err(WorkflowError::ApplicationDisabled(application_id));
        }
        let sequence = self.active_sequence(&instance.sequence_id)?;
        if sequence.is_empty() {
            return Err(WorkflowError::EmptySequence(sequence.id));
        }

        let ledger = self.repository.ledger(&application_id)?;
        let level = ledger.len();
        let pending = sequence
            .pending_step(level)
            .ok_or_else(|| WorkflowError::SequenceComplete(application_id.clone()))?;

        let step = if pending.id == step_id {
            pending
        } else if strict {
            return Err(WorkflowError::StepOutOfOrder {
                expected: pending.id.clone(),
                found: step_id,
            });
        } else {
            let step = sequence
                .step(&step_id)
                .ok_or_else(|| WorkflowError::StepNotFound(step_id.clone()))?;
            warn!(
                %application_id,
                expected = %pending.id,
                found = %step.id,
                "accepting out-of-order step submission"
            );
            step
        };
        if ledger.iter().any(|record| record.step_id == step.id) {
            return Err(WorkflowError::StepAlreadyCompleted(step.id.clone()));
        }

        let resolved = self.resolve_actor(actor)?;
        let hierarchy = self.directory.hierarchy()?;
        let resolver = RoutingResolver::new(&hierarchy);
        if !resolver.can_act(latest_record(&ledger), &instance.applicant_id, &resolved) {
            debug!(%application_id, actor = %actor.user_id, "routing check denied submission");
            return Err(WorkflowError::Forbidden {
                actor: actor.user_id.clone(),
                application_id,
            });
        }
        let reviewer = self.profile(&actor.user_id)?;

        let next_step = sequence.pending_step(level + 1);
        let routing = match routing_override {
            Some(rule) => {
                rule.validate_override()
                    .map_err(WorkflowError::InvalidRouting)?;
                rule
            }
            None => match next_step {
                Some(next) => {
                    next.routing.validate_override().map_err(|reason| {
                        WorkflowError::InvalidRouting(format!(
                            "step {} needs a routing override: {reason}",
                            next.id
                        ))
                    })?;
                    next.routing.clone()
                }
                // The final record keeps the completed step's own rule so its reviewers retain access.
                None => step.routing.clone(),
            },
        };

        let now = Utc::now();
        let record = CompletedStepRecord {
            id: next_record_id(),
            application_id: application_id.clone(),
            step_id: step.id.clone(),
            reviewer_id: actor.user_id.clone(),
            routing,
            created_at: now,
        };
        let response = ResponseRecord {
            step_id: step.id.clone(),
            application_id: application_id.clone(),
            payload,
            updated_at: now,
        };

        let record = self
            .repository
            .append_step(StepCompletion {
                expected_level: level,
                response,
                record,
            })
            .map_err(|error| match error {
                RepositoryError::LevelConflict { expected, found } => {
                    WorkflowError::LevelConflict { expected, found }
                }
                RepositoryError::NotFound => {
                    WorkflowError::ApplicationNotFound(application_id.clone())
                }
                other => other.into(),
            })?;

        let completed_level = level + 1;
        info!(
            %application_id,
            step_id = %record.step_id,
            reviewer = %record.reviewer_id,
            next_policy = record.routing.policy().label(),
            completed_level,
            "step completed"
        );

        match next_step {
            Some(next) => {
                let applicant = self.profile_or_placeholder(&instance.applicant_id);
                self.side_effects.enqueue(SideEffect::Notify(StepNotice {
                    application_id: application_id.clone(),
                    step: next.clone(),
                    applicant,
                    reviewer,
                }));
            }
            None => self.enqueue_certificate(&sequence, &application_id),
        }

        Ok(SubmissionReceipt {
            application_id,
            completed_level,
            pending_step: next_step.map(|step| step.id.clone()),
            complete: next_step.is_none(),
            record,
        })
    }

    fn enqueue_certificate(&self, sequence: &StepSequence, application_id: &ApplicationId) {
        let Some(template) = &sequence.certificate else {
            return;
        };
        match self.responses_by_form(sequence, application_id) {
            Ok(responses) => self.side_effects.enqueue(SideEffect::EvaluateCertificate {
                application_id: application_id.clone(),
                template: template.clone(),
                responses,
            }),
            Err(error) => {
                warn!(%application_id, %error, "could not collect responses for certificate evaluation")
            }
        }
    }

    fn responses_by_form(
        &self,
        sequence: &StepSequence,
        application_id: &ApplicationId,
    ) -> Result<ResponsesByForm, WorkflowError> {
        let mut by_form = ResponsesByForm::new();
        for response in self.repository.responses(application_id)? {
            let form = sequence
                .step(&response.step_id)
                .and_then(|step| step.form_id.clone());
            if let Some(form) = form {
                by_form.insert(form, response.payload);
            }
        }
        Ok(by_form)
    }

    fn list_inner(
        &self,
        actor: &Actor,
        state: ListState,
        filter: &ListFilter,
        admin_view: bool,
    ) -> Result<Vec<SequenceQueue>, WorkflowError> {
        let resolved = if admin_view {
            None
        } else {
            Some(self.resolve_actor(actor)?)
        };
        let hierarchy = self.directory.hierarchy()?;
        let resolver = RoutingResolver::new(&hierarchy);

        let mut queues = Vec::new();
        for sequence in self.repository.sequences()? {
            if !sequence.active || sequence.is_empty() {
                continue;
            }
            if filter
                .sequence_id
                .as_ref()
                .is_some_and(|wanted| wanted != &sequence.id)
            {
                continue;
            }
            if filter.group.is_some() && filter.group != sequence.group {
                continue;
            }

            let total_steps = sequence.len();
            let mut applications = Vec::new();
            for instance in self.repository.instances_for(&sequence.id)? {
                let ledger = self.repository.ledger(&instance.id)?;
                let level = ledger.len();

                let matches = match state {
                    ListState::Pending => {
                        instance.status == ApplicationStatus::Enabled && level < total_steps
                    }
                    ListState::Completed => {
                        instance.status == ApplicationStatus::Enabled && level == total_steps
                    }
                    ListState::Disabled => instance.status == ApplicationStatus::Disabled,
                };
                if !matches {
                    continue;
                }

                if let Some(resolved) = &resolved {
                    if !resolver.can_act(latest_record(&ledger), &instance.applicant_id, resolved)
                    {
                        continue;
                    }
                }

                applications.push(ApplicationSummary {
                    application_id: instance.id.clone(),
                    applicant_id: instance.applicant_id.clone(),
                    status: instance.status,
                    completed_level: level,
                    total_steps,
                    pending_step: sequence.pending_step(level).map(|step| step.id.clone()),
                    created_at: instance.created_at,
                });
            }

            if applications.is_empty() {
                continue;
            }
            applications.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            queues.push(SequenceQueue {
                sequence_id: sequence.id.clone(),
                sequence_name: sequence.name.clone(),
                group: sequence.group.clone(),
                applications,
            });
        }

        Ok(queues)
    }

    fn detail_inner(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<ApplicationDetail, WorkflowError> {
        let instance = self.instance(application_id)?;
        let sequence = self.active_sequence(&instance.sequence_id)?;
        let ledger = self.repository.ledger(application_id)?;
        let responses = self.repository.responses(application_id)?;

        let resolved = self.resolve_actor(actor)?;
        let hierarchy = self.directory.hierarchy()?;
        let resolver = RoutingResolver::new(&hierarchy);
        let latest = latest_record(&ledger);

        let routed = resolver.can_act(latest, &instance.applicant_id, &resolved);
        let is_applicant = actor.user_id == instance.applicant_id;
        if !routed && !is_applicant {
            return Err(WorkflowError::Forbidden {
                actor: actor.user_id.clone(),
                application_id: application_id.clone(),
            });
        }

        let level = ledger.len();
        let pending_step = sequence.pending_step(level).cloned();
        let enabled = instance.status == ApplicationStatus::Enabled;
        let open = pending_step.is_some() && enabled;
        let access = AccessDescriptor {
            can_edit: is_applicant && open,
            can_view: true,
            can_approve: routed && open,
            assigned_to: if pending_step.is_some() {
                resolver.assigned_to(latest, &instance.applicant_id)
            } else {
                AssignedTo::Unassigned
            },
        };

        let mut history = Vec::with_capacity(ledger.len());
        for record in &ledger {
            let reviewer = match self.directory.user(&record.reviewer_id)? {
                Some(profile) => ReviewerIdentity {
                    user_id: profile.id,
                    display_name: Some(profile.display_name),
                    email: profile.email,
                },
                None => ReviewerIdentity {
                    user_id: record.reviewer_id.clone(),
                    display_name: None,
                    email: None,
                },
            };
            history.push(StepHistoryEntry {
                record_id: record.id.clone(),
                step_id: record.step_id.clone(),
                step_name: sequence.step(&record.step_id).map(|step| step.name.clone()),
                reviewer,
                routing: record.routing.clone(),
                response: responses
                    .iter()
                    .find(|response| response.step_id == record.step_id)
                    .map(|response| response.payload.clone()),
                completed_at: record.created_at,
            });
        }

        Ok(ApplicationDetail {
            sequence_name: sequence.name.clone(),
            completed_level: level,
            total_steps: sequence.len(),
            history,
            pending_step,
            access,
            application: instance,
        })
    }

    fn pending_step_id(&self, application_id: &ApplicationId) -> Result<StepId, WorkflowError> {
        let instance = self.instance(application_id)?;
        let sequence = self.active_sequence(&instance.sequence_id)?;
        if sequence.is_empty() {
            return Err(WorkflowError::EmptySequence(sequence.id));
        }
        let level = self.repository.completed_level(application_id)?;
        sequence
            .pending_step(level)
            .map(|step| step.id.clone())
            .ok_or_else(|| WorkflowError::SequenceComplete(application_id.clone()))
    }

    fn instance(&self, id: &ApplicationId) -> Result<ApplicationInstance, WorkflowError> {
        self.repository
            .instance(id)?
            .ok_or_else(|| WorkflowError::ApplicationNotFound(id.clone()))
    }

    fn active_sequence(&self, id: &SequenceId) -> Result<StepSequence, WorkflowError> {
        self.repository
            .sequence(id)?
            .filter(|sequence| sequence.active)
            .ok_or_else(|| WorkflowError::SequenceNotFound(id.clone()))
    }

    fn profile(&self, id: &UserId) -> Result<UserProfile, WorkflowError> {
        self.directory
            .user(id)?
            .ok_or_else(|| WorkflowError::UserNotFound(id.clone()))
    }

    fn profile_or_placeholder(&self, id: &UserId) -> UserProfile {
        match self.directory.user(id) {
            Ok(Some(profile)) => profile,
            Ok(None) | Err(_) => UserProfile {
                id: id.clone(),
                display_name: id.to_string(),
                email: None,
            },
        }
    }

    /// Role names become ids through the enabled-only lookup; unknown names are ignored.
    fn resolve_actor(&self, actor: &Actor) -> Result<ResolvedActor, WorkflowError> {
        let mut role_ids = BTreeSet::new();
        for name in &actor.role_names {
            if let Some(role) = self.directory.enabled_role(name)? {
                role_ids.insert(role.id);
            }
        }
        Ok(ResolvedActor {
            user_id: actor.user_id.clone(),
            role_ids,
        })
    }
}

/// Caller-facing classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    BadRequest,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Error raised by the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),
    #[error("sequence {0} not found or inactive")]
    SequenceNotFound(SequenceId),
    #[error("step {0} not found in sequence")]
    StepNotFound(StepId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("application {0} has no completed steps to revert")]
    NothingToRevert(ApplicationId),
    #[error("{actor} may not act on application {application_id}")]
    Forbidden {
        actor: UserId,
        application_id: ApplicationId,
    },
    #[error("application {0} is disabled")]
    ApplicationDisabled(ApplicationId),
    #[error("application {0} has already completed every step")]
    SequenceComplete(ApplicationId),
    #[error("step {0} already has a ledger record; revert it before resubmitting")]
    StepAlreadyCompleted(StepId),
    #[error("step {found} submitted while {expected} is pending")]
    StepOutOfOrder { expected: StepId, found: StepId },
    #[error("sequence {0} has no steps")]
    EmptySequence(SequenceId),
    #[error(transparent)]
    InvalidSequence(#[from] SequenceViolation),
    #[error("invalid routing override: {0}")]
    InvalidRouting(String),
    #[error("another submission advanced the application (expected level {expected}, found {found})")]
    LevelConflict { expected: usize, found: usize },
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Hierarchy(error) => Self::Hierarchy(error),
            RepositoryError::LevelConflict { expected, found } => {
                Self::LevelConflict { expected, found }
            }
            other => Self::Repository(other),
        }
    }
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::ApplicationNotFound(_)
            | WorkflowError::SequenceNotFound(_)
            | WorkflowError::StepNotFound(_)
            | WorkflowError::UserNotFound(_)
            | WorkflowError::NothingToRevert(_)
            | WorkflowError::Hierarchy(HierarchyError::NodeNotFound(_)) => ErrorKind::NotFound,
            WorkflowError::Forbidden { .. } => ErrorKind::Forbidden,
            WorkflowError::ApplicationDisabled(_)
            | WorkflowError::SequenceComplete(_)
            | WorkflowError::StepOutOfOrder { .. }
            | WorkflowError::StepAlreadyCompleted(_)
            | WorkflowError::EmptySequence(_)
            | WorkflowError::InvalidSequence(_)
            | WorkflowError::InvalidRouting(_)
            | WorkflowError::Hierarchy(_) => ErrorKind::BadRequest,
            WorkflowError::LevelConflict { .. } => ErrorKind::Conflict,
            WorkflowError::Repository(RepositoryError::NotFound) => ErrorKind::NotFound,
            WorkflowError::Repository(RepositoryError::Conflict) => ErrorKind::Conflict,
            WorkflowError::Repository(_) => ErrorKind::Internal,
        }
    }
}
