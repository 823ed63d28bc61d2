mod condition;

pub use condition::condition_met;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::domain::{ApplicationId, CertificateTemplate, FormId};

/// Submitted payloads keyed by the form each step collects.
pub type ResponsesByForm = BTreeMap<FormId, serde_json::Value>;

/// Decides whether a completed application earns the sequence's certificate.
pub trait CertificateEligibilityEvaluator: Send + Sync {
    fn evaluate(
        &self,
        application_id: &ApplicationId,
        template: &CertificateTemplate,
        responses: &ResponsesByForm,
    ) -> Result<EligibilityOutcome, EligibilityError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityOutcome {
    pub generated: bool,
    pub certificate_id: Option<String>,
}

impl EligibilityOutcome {
    pub fn not_generated() -> Self {
        Self {
            generated: false,
            certificate_id: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EligibilityError {
    #[error("certificate issuance failed: {0}")]
    Issuance(String),
}

/// Stateless rubric: every condition must hold. Rendering is left to downstream consumers.
#[derive(Debug, Default)]
pub struct RuleBasedEligibility {
    issued: AtomicU64,
}

impl RuleBasedEligibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eligible(template: &CertificateTemplate, responses: &ResponsesByForm) -> bool {
        template
            .conditions
            .iter()
            .all(|condition| condition_met(condition, responses))
    }
}

impl CertificateEligibilityEvaluator for RuleBasedEligibility {
    fn evaluate(
        &self,
        application_id: &ApplicationId,
        template: &CertificateTemplate,
        responses: &ResponsesByForm,
    ) -> Result<EligibilityOutcome, EligibilityError> {
        if !Self::is_eligible(template, responses) {
            return Ok(EligibilityOutcome::not_generated());
        }

        let serial = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(EligibilityOutcome {
            generated: true,
            certificate_id: Some(format!("cert-{}-{}-{serial:06}", template.id, application_id)),
        })
    }
}
