use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::collaborators::{NotificationDispatcher, StepNotice};
use super::domain::{ApplicationId, CertificateTemplate};
use super::eligibility::{CertificateEligibilityEvaluator, ResponsesByForm};

/// Work the engine hands off after a primary write has committed.
#[derive(Debug, Clone)]
pub enum SideEffect {
    Notify(StepNotice),
    EvaluateCertificate {
        application_id: ApplicationId,
        template: CertificateTemplate,
        responses: ResponsesByForm,
    },
}

impl SideEffect {
    fn label(&self) -> &'static str {
        match self {
            SideEffect::Notify(_) => "notify",
            SideEffect::EvaluateCertificate { .. } => "evaluate_certificate",
        }
    }
}

/// Bounded queue drained by one background worker. Enqueueing never blocks and never fails
/// the caller: a full or closed queue drops the job with a warning.
#[derive(Clone)]
pub struct SideEffectQueue {
    sender: mpsc::Sender<SideEffect>,
}

impl SideEffectQueue {
    /// Must be called inside a tokio runtime. The worker exits once every queue clone is dropped.
    pub fn spawn(
        notifier: Arc<dyn NotificationDispatcher>,
        evaluator: Arc<dyn CertificateEligibilityEvaluator>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(receiver, notifier, evaluator));
        (Self { sender }, worker)
    }

    pub fn enqueue(&self, effect: SideEffect) {
        let label = effect.label();
        match self.sender.try_send(effect) {
            Ok(()) => debug!(job = label, "side effect queued"),
            Err(TrySendError::Full(_)) => {
                warn!(job = label, "side effect queue full; dropping job")
            }
            Err(TrySendError::Closed(_)) => {
                warn!(job = label, "side effect worker stopped; dropping job")
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<SideEffect>,
    notifier: Arc<dyn NotificationDispatcher>,
    evaluator: Arc<dyn CertificateEligibilityEvaluator>,
) {
    while let Some(effect) = receiver.recv().await {
        match effect {
            SideEffect::Notify(notice) => {
                let application_id = notice.application_id.clone();
                let step_id = notice.step.id.clone();
                if let Err(error) = notifier.notify(notice) {
                    warn!(%application_id, %step_id, %error, "notification failed");
                }
            }
            SideEffect::EvaluateCertificate {
                application_id,
                template,
                responses,
            } => match evaluator.evaluate(&application_id, &template, &responses) {
                Ok(outcome) if outcome.generated => info!(
                    %application_id,
                    template = %template.id,
                    certificate_id = outcome.certificate_id.as_deref().unwrap_or_default(),
                    "certificate issued"
                ),
                Ok(_) => debug!(%application_id, template = %template.id, "certificate conditions not met"),
                Err(error) => warn!(%application_id, %error, "certificate evaluation failed"),
            },
        }
    }
    debug!("side effect worker drained");
}
