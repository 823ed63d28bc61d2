use std::collections::BTreeSet;

use chrono::Utc;

use super::common::*;
use crate::workflows::review::domain::{
    ApplicationId, CompletedStepRecord, DynamicTarget, RecordId, ResolvedActor, RoleId,
    RoutingRule, StepId, UserId,
};
use crate::workflows::review::hierarchy::OrgHierarchy;
use crate::workflows::review::routing::{AssignedTo, RoutingResolver};

fn resolved(user_id: &str, roles: &[&str]) -> ResolvedActor {
    ResolvedActor {
        user_id: UserId::new(user_id),
        role_ids: roles.iter().map(|role| RoleId::new(*role)).collect::<BTreeSet<_>>(),
    }
}

fn record(routing: RoutingRule) -> CompletedStepRecord {
    CompletedStepRecord {
        id: RecordId::new("rec-routing"),
        application_id: ApplicationId::new("app-routing"),
        step_id: StepId::new("s1-intake"),
        reviewer_id: UserId::new(APPLICANT),
        routing,
        created_at: Utc::now(),
    }
}

fn applicant() -> UserId {
    UserId::new(APPLICANT)
}

#[test]
fn level_zero_is_open_to_everyone() {
    let hierarchy = OrgHierarchy::new();
    let resolver = RoutingResolver::new(&hierarchy);

    assert!(resolver.can_act(None, &applicant(), &resolved("anyone", &[])));
    assert_eq!(resolver.assigned_to(None, &applicant()), AssignedTo::Open);
}

#[test]
fn static_routing_matches_only_the_assignee() {
    let hierarchy = OrgHierarchy::new();
    let resolver = RoutingResolver::new(&hierarchy);
    let last = record(static_to(REVIEWER_ONE));

    assert!(resolver.can_act(Some(&last), &applicant(), &resolved(REVIEWER_ONE, &[])));
    assert!(!resolver.can_act(
        Some(&last),
        &applicant(),
        &resolved(REVIEWER_TWO, &["role-finance"])
    ));
}

#[test]
fn dynamic_single_staff_behaves_like_static() {
    let hierarchy = OrgHierarchy::new();
    let resolver = RoutingResolver::new(&hierarchy);
    let assigned = record(RoutingRule::Dynamic {
        target: DynamicTarget::SingleStaff {
            assigned_staff_id: Some(UserId::new(REVIEWER_TWO)),
        },
    });
    let unassigned = record(RoutingRule::Dynamic {
        target: DynamicTarget::SingleStaff {
            assigned_staff_id: None,
        },
    });

    assert!(resolver.can_act(Some(&assigned), &applicant(), &resolved(REVIEWER_TWO, &[])));
    assert!(!resolver.can_act(Some(&assigned), &applicant(), &resolved(REVIEWER_ONE, &[])));
    assert!(!resolver.can_act(Some(&unassigned), &applicant(), &resolved(REVIEWER_ONE, &[])));
    assert_eq!(
        resolver.assigned_to(Some(&unassigned), &applicant()),
        AssignedTo::Unassigned
    );
}

#[test]
fn dynamic_roles_need_any_intersection() {
    let hierarchy = OrgHierarchy::new();
    let resolver = RoutingResolver::new(&hierarchy);
    let last = record(RoutingRule::Dynamic {
        target: DynamicTarget::AnyOfRoles {
            assigned_role_ids: vec![RoleId::new("role-finance"), RoleId::new("role-hr")],
        },
    });

    assert!(resolver.can_act(
        Some(&last),
        &applicant(),
        &resolved(REVIEWER_TWO, &["role-hr", "role-ops"])
    ));
    assert!(!resolver.can_act(
        Some(&last),
        &applicant(),
        &resolved(REVIEWER_TWO, &["role-ops"])
    ));
    assert!(!resolver.can_act(Some(&last), &applicant(), &resolved(REVIEWER_TWO, &[])));
}

#[test]
fn org_chart_routing_is_one_hop() {
    let hierarchy = org_chart();
    let resolver = RoutingResolver::new(&hierarchy);
    let last = record(RoutingRule::FollowOrganizationChart);

    assert!(resolver.can_act(Some(&last), &applicant(), &resolved(MANAGER, &[])));
    assert!(!resolver.can_act(Some(&last), &applicant(), &resolved(DIRECTOR, &[])));
    assert!(!resolver.can_act(Some(&last), &applicant(), &resolved(APPLICANT, &[])));
    assert_eq!(
        resolver.assigned_to(Some(&last), &applicant()),
        AssignedTo::Superior {
            user_id: UserId::new(MANAGER)
        }
    );
}

#[test]
fn org_chart_routing_without_superior_admits_nobody() {
    let hierarchy = org_chart();
    let resolver = RoutingResolver::new(&hierarchy);
    let last = record(RoutingRule::FollowOrganizationChart);
    let outsider = UserId::new("u-outsider");

    assert!(!resolver.can_act(Some(&last), &outsider, &resolved(MANAGER, &[])));
    assert!(!resolver.can_act(Some(&last), &outsider, &resolved(DIRECTOR, &[])));
    assert_eq!(
        resolver.assigned_to(Some(&last), &outsider),
        AssignedTo::Unassigned
    );

    let root = UserId::new(DIRECTOR);
    assert_eq!(resolver.assigned_to(Some(&last), &root), AssignedTo::Unassigned);
}

#[test]
fn not_applicable_admits_everyone() {
    let hierarchy = OrgHierarchy::new();
    let resolver = RoutingResolver::new(&hierarchy);
    let last = record(RoutingRule::NotApplicable);

    assert!(resolver.can_act(Some(&last), &applicant(), &resolved("anyone", &[])));
    assert_eq!(
        resolver.assigned_to(Some(&last), &applicant()),
        AssignedTo::Open
    );
}

#[test]
fn routing_rules_round_trip_through_wire_format() {
    let rule: RoutingRule = serde_json::from_value(serde_json::json!({
        "policy": "DYNAMIC",
        "target": {
            "specified_to": "ANY_OF_ROLES",
            "assigned_role_ids": ["role-finance"]
        }
    }))
    .expect("rule parses");

    assert_eq!(
        rule,
        RoutingRule::Dynamic {
            target: DynamicTarget::AnyOfRoles {
                assigned_role_ids: vec![RoleId::new("role-finance")],
            },
        }
    );
    assert_eq!(rule.policy().label(), "DYNAMIC");
}
