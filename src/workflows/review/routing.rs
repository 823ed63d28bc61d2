use serde::Serialize;

use super::domain::{
    CompletedStepRecord, DynamicTarget, ResolvedActor, RoleId, RoutingRule, UserId,
};
use super::hierarchy::OrgHierarchy;

/// Concrete party responsible for the pending step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignedTo {
    /// Intake step or a not-applicable rule: anyone may act.
    Open,
    Staff { user_id: UserId },
    Roles { role_ids: Vec<RoleId> },
    Superior { user_id: UserId },
    /// Rule names an assignee that cannot be resolved (e.g. applicant outside the chart).
    Unassigned,
}

/// Decides whether an actor may act on the step governed by the latest ledger record.
pub struct RoutingResolver<'a> {
    hierarchy: &'a OrgHierarchy,
}

impl<'a> RoutingResolver<'a> {
    pub fn new(hierarchy: &'a OrgHierarchy) -> Self {
        Self { hierarchy }
    }

    /// `last` is `None` at level 0, where access is open to any actor.
    pub fn can_act(
        &self,
        last: Option<&CompletedStepRecord>,
        applicant: &UserId,
        actor: &ResolvedActor,
    ) -> bool {
        match last {
            None => true,
            Some(record) => self.resolve(&record.routing, applicant, actor),
        }
    }

    pub fn resolve(&self, rule: &RoutingRule, applicant: &UserId, actor: &ResolvedActor) -> bool {
        match rule {
            RoutingRule::Static { assigned_staff_id } => resolve_static(assigned_staff_id, actor),
            RoutingRule::Dynamic { target } => resolve_dynamic(target, actor),
            RoutingRule::FollowOrganizationChart => self.resolve_org_chart(applicant, actor),
            RoutingRule::NotApplicable => true,
        }
    }

    fn resolve_org_chart(&self, applicant: &UserId, actor: &ResolvedActor) -> bool {
        self.hierarchy.reports_to(applicant, &actor.user_id)
    }

    pub fn assigned_to(&self, last: Option<&CompletedStepRecord>, applicant: &UserId) -> AssignedTo {
        let Some(record) = last else {
            return AssignedTo::Open;
        };

        match &record.routing {
            RoutingRule::Static { assigned_staff_id } => AssignedTo::Staff {
                user_id: assigned_staff_id.clone(),
            },
            RoutingRule::Dynamic {
                target: DynamicTarget::SingleStaff { assigned_staff_id },
            } => match assigned_staff_id {
                Some(user_id) => AssignedTo::Staff {
                    user_id: user_id.clone(),
                },
                None => AssignedTo::Unassigned,
            },
            RoutingRule::Dynamic {
                target: DynamicTarget::AnyOfRoles { assigned_role_ids },
            } => AssignedTo::Roles {
                role_ids: assigned_role_ids.clone(),
            },
            RoutingRule::FollowOrganizationChart => match self.hierarchy.superior_of(applicant) {
                Some(superior) => AssignedTo::Superior {
                    user_id: superior.user_id.clone(),
                },
                None => AssignedTo::Unassigned,
            },
            RoutingRule::NotApplicable => AssignedTo::Open,
        }
    }
}

fn resolve_static(assigned: &UserId, actor: &ResolvedActor) -> bool {
    &actor.user_id == assigned
}

fn resolve_dynamic(target: &DynamicTarget, actor: &ResolvedActor) -> bool {
    match target {
        DynamicTarget::SingleStaff {
            assigned_staff_id: Some(assigned),
        } => resolve_static(assigned, actor),
        DynamicTarget::SingleStaff {
            assigned_staff_id: None,
        } => false,
        DynamicTarget::AnyOfRoles { assigned_role_ids } => assigned_role_ids
            .iter()
            .any(|role| actor.role_ids.contains(role)),
    }
}
