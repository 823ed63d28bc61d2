use super::domain::{
    ApplicationId, ApplicationInstance, ApplicationStatus, CompletedStepRecord, OrgNodeId,
    ResponseRecord, Role, SequenceId, StepSequence, UserId, UserProfile,
};
use super::hierarchy::{HierarchyError, OrgHierarchy, OrgNode};

/// Response upsert and ledger append that must land together.
#[derive(Debug, Clone)]
pub struct StepCompletion {
    /// Ledger length the caller observed; the append fails if it has moved.
    pub expected_level: usize,
    pub response: ResponseRecord,
    pub record: CompletedStepRecord,
}

/// Storage for sequences, instances, the completion ledger and responses.
///
/// `append_step` and `revert_latest` are single units: implementations apply both writes
/// or neither, and serialize them per application.
pub trait WorkflowRepository: Send + Sync {
    fn sequences(&self) -> Result<Vec<StepSequence>, RepositoryError>;
    fn sequence(&self, id: &SequenceId) -> Result<Option<StepSequence>, RepositoryError>;
    fn save_sequence(&self, sequence: StepSequence) -> Result<(), RepositoryError>;

    fn insert_instance(
        &self,
        instance: ApplicationInstance,
    ) -> Result<ApplicationInstance, RepositoryError>;
    fn instance(&self, id: &ApplicationId) -> Result<Option<ApplicationInstance>, RepositoryError>;
    fn instances_for(
        &self,
        sequence_id: &SequenceId,
    ) -> Result<Vec<ApplicationInstance>, RepositoryError>;
    fn set_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<ApplicationInstance, RepositoryError>;
    /// Removes the instance with every ledger and response record it owns.
    fn delete_instance(&self, id: &ApplicationId) -> Result<(), RepositoryError>;

    /// Ledger records oldest first.
    fn ledger(&self, id: &ApplicationId) -> Result<Vec<CompletedStepRecord>, RepositoryError>;
    fn completed_level(&self, id: &ApplicationId) -> Result<usize, RepositoryError> {
        Ok(self.ledger(id)?.len())
    }
    fn responses(&self, id: &ApplicationId) -> Result<Vec<ResponseRecord>, RepositoryError>;

    fn append_step(
        &self,
        completion: StepCompletion,
    ) -> Result<CompletedStepRecord, RepositoryError>;
    /// Deletes the most recent record and its paired response; `None` when the ledger is empty.
    fn revert_latest(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<CompletedStepRecord>, RepositoryError>;
}

/// Reference data the engine consults: users, roles and the organization chart.
pub trait Directory: Send + Sync {
    fn user(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError>;
    /// Enabled roles only; disabled roles resolve to `None`.
    fn enabled_role(&self, name: &str) -> Result<Option<Role>, RepositoryError>;
    fn hierarchy(&self) -> Result<OrgHierarchy, RepositoryError>;
    fn insert_org_node(&self, node: OrgNode) -> Result<(), RepositoryError>;
    fn remove_org_node(&self, id: &OrgNodeId) -> Result<OrgNode, RepositoryError>;
    fn reassign_org_node(
        &self,
        id: &OrgNodeId,
        superior: &OrgNodeId,
    ) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("ledger moved from level {expected} to {found} before the write")]
    LevelConflict { expected: usize, found: usize },
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
