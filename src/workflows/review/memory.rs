//! In-process stores backing the service binary, the demo and the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{
    ApplicationId, ApplicationInstance, ApplicationStatus, CompletedStepRecord, OrgNodeId,
    ResponseRecord, Role, SequenceId, StepId, StepSequence, UserId, UserProfile,
};
use super::hierarchy::{OrgHierarchy, OrgNode};
use super::repository::{Directory, RepositoryError, StepCompletion, WorkflowRepository};

#[derive(Default)]
struct WorkflowState {
    sequences: BTreeMap<SequenceId, StepSequence>,
    instances: BTreeMap<ApplicationId, ApplicationInstance>,
    ledgers: HashMap<ApplicationId, Vec<CompletedStepRecord>>,
    responses: HashMap<(StepId, ApplicationId), ResponseRecord>,
}

/// One mutex guards every table, so each trait call is a single transaction.
#[derive(Default, Clone)]
pub struct MemoryWorkflowRepository {
    state: Arc<Mutex<WorkflowState>>,
}

impl MemoryWorkflowRepository {
    fn lock(&self) -> Result<MutexGuard<'_, WorkflowState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("workflow store poisoned".to_string()))
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    fn sequences(&self) -> Result<Vec<StepSequence>, RepositoryError> {
        Ok(self.lock()?.sequences.values().cloned().collect())
    }

    fn sequence(&self, id: &SequenceId) -> Result<Option<StepSequence>, RepositoryError> {
        Ok(self.lock()?.sequences.get(id).cloned())
    }

    fn save_sequence(&self, sequence: StepSequence) -> Result<(), RepositoryError> {
        self.lock()?.sequences.insert(sequence.id.clone(), sequence);
        Ok(())
    }

    fn insert_instance(
        &self,
        instance: ApplicationInstance,
    ) -> Result<ApplicationInstance, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.instances.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    fn instance(&self, id: &ApplicationId) -> Result<Option<ApplicationInstance>, RepositoryError> {
        Ok(self.lock()?.instances.get(id).cloned())
    }

    fn instances_for(
        &self,
        sequence_id: &SequenceId,
    ) -> Result<Vec<ApplicationInstance>, RepositoryError> {
        Ok(self
            .lock()?
            .instances
            .values()
            .filter(|instance| &instance.sequence_id == sequence_id)
            .cloned()
            .collect())
    }

    fn set_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<ApplicationInstance, RepositoryError> {
        let mut guard = self.lock()?;
        let instance = guard
            .instances
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        instance.status = status;
        Ok(instance.clone())
    }

    fn delete_instance(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        if guard.instances.remove(id).is_none() {
            return Err(RepositoryError::NotFound);
        }
        guard.ledgers.remove(id);
        guard
            .responses
            .retain(|(_, application_id), _| application_id != id);
        Ok(())
    }

    fn ledger(&self, id: &ApplicationId) -> Result<Vec<CompletedStepRecord>, RepositoryError> {
        Ok(self.lock()?.ledgers.get(id).cloned().unwrap_or_default())
    }

    fn completed_level(&self, id: &ApplicationId) -> Result<usize, RepositoryError> {
        Ok(self.lock()?.ledgers.get(id).map_or(0, Vec::len))
    }

    fn responses(&self, id: &ApplicationId) -> Result<Vec<ResponseRecord>, RepositoryError> {
        let guard = self.lock()?;
        let mut responses: Vec<ResponseRecord> = guard
            .responses
            .values()
            .filter(|response| &response.application_id == id)
            .cloned()
            .collect();
        responses.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(responses)
    }

    fn append_step(
        &self,
        completion: StepCompletion,
    ) -> Result<CompletedStepRecord, RepositoryError> {
        let StepCompletion {
            expected_level,
            response,
            record,
        } = completion;

        let mut guard = self.lock()?;
        if !guard.instances.contains_key(&record.application_id) {
            return Err(RepositoryError::NotFound);
        }

        let found = guard
            .ledgers
            .get(&record.application_id)
            .map_or(0, Vec::len);
        if found != expected_level {
            return Err(RepositoryError::LevelConflict {
                expected: expected_level,
                found,
            });
        }

        guard.responses.insert(
            (response.step_id.clone(), response.application_id.clone()),
            response,
        );
        guard
            .ledgers
            .entry(record.application_id.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn revert_latest(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<CompletedStepRecord>, RepositoryError> {
        let mut guard = self.lock()?;
        let Some(ledger) = guard.ledgers.get_mut(id) else {
            return Ok(None);
        };

        // Latest by timestamp; ties resolve to the later append.
        let Some(position) = ledger
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ia.cmp(ib)))
            .map(|(index, _)| index)
        else {
            return Ok(None);
        };

        let record = ledger.remove(position);
        let still_referenced = ledger.iter().any(|other| other.step_id == record.step_id);
        if !still_referenced {
            guard
                .responses
                .remove(&(record.step_id.clone(), record.application_id.clone()));
        }
        Ok(Some(record))
    }
}

#[derive(Default)]
struct DirectoryState {
    users: BTreeMap<UserId, UserProfile>,
    roles: BTreeMap<String, Role>,
    hierarchy: OrgHierarchy,
}

/// Users, roles and the organization chart held in memory.
#[derive(Default, Clone)]
pub struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MemoryDirectory {
    fn lock(&self) -> Result<MutexGuard<'_, DirectoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("directory poisoned".to_string()))
    }

    pub fn upsert_user(&self, user: UserProfile) -> Result<(), RepositoryError> {
        self.lock()?.users.insert(user.id.clone(), user);
        Ok(())
    }

    /// Roles are looked up by name, matching how sessions carry them.
    pub fn upsert_role(&self, role: Role) -> Result<(), RepositoryError> {
        self.lock()?.roles.insert(role.name.clone(), role);
        Ok(())
    }

    pub fn replace_hierarchy(&self, hierarchy: OrgHierarchy) -> Result<(), RepositoryError> {
        self.lock()?.hierarchy = hierarchy;
        Ok(())
    }
}

impl Directory for MemoryDirectory {
    fn user(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    fn enabled_role(&self, name: &str) -> Result<Option<Role>, RepositoryError> {
        Ok(self
            .lock()?
            .roles
            .get(name)
            .filter(|role| role.enabled)
            .cloned())
    }

    fn hierarchy(&self) -> Result<OrgHierarchy, RepositoryError> {
        Ok(self.lock()?.hierarchy.clone())
    }

    fn insert_org_node(&self, node: OrgNode) -> Result<(), RepositoryError> {
        self.lock()?.hierarchy.insert(node)?;
        Ok(())
    }

    fn remove_org_node(&self, id: &OrgNodeId) -> Result<OrgNode, RepositoryError> {
        Ok(self.lock()?.hierarchy.remove(id)?)
    }

    fn reassign_org_node(
        &self,
        id: &OrgNodeId,
        superior: &OrgNodeId,
    ) -> Result<(), RepositoryError> {
        self.lock()?.hierarchy.reassign(id, superior)?;
        Ok(())
    }
}
