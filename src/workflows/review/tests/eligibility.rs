use serde_json::json;

use super::common::*;
use crate::workflows::review::domain::{
    ApplicationId, ApprovalCondition, CertificateTemplate, ConditionOperator, FormId, TemplateId,
};
use crate::workflows::review::eligibility::{
    condition_met, CertificateEligibilityEvaluator, ResponsesByForm, RuleBasedEligibility,
};

fn condition(operator: ConditionOperator, expected: serde_json::Value) -> ApprovalCondition {
    ApprovalCondition {
        form_id: FormId::new("form-intake"),
        question_id: "q-answer".to_string(),
        operator,
        expected_value: expected,
    }
}

fn responses(answer: serde_json::Value) -> ResponsesByForm {
    let mut responses = ResponsesByForm::new();
    responses.insert(FormId::new("form-intake"), form_payload("q-answer", answer));
    responses
}

#[test]
fn text_operators_ignore_case() {
    let answers = responses(json!("Yes, Completed"));

    assert!(condition_met(
        &condition(ConditionOperator::Equals, json!("yes, completed")),
        &answers
    ));
    assert!(condition_met(
        &condition(ConditionOperator::Contains, json!("COMPLETED")),
        &answers
    ));
    assert!(condition_met(
        &condition(ConditionOperator::NotEquals, json!("no")),
        &answers
    ));
}

#[test]
fn numeric_operators_parse_both_sides() {
    let answers = responses(json!("72.5"));

    assert!(condition_met(
        &condition(ConditionOperator::GreaterThan, json!(70)),
        &answers
    ));
    assert!(!condition_met(
        &condition(ConditionOperator::LessThan, json!("70")),
        &answers
    ));
    assert!(!condition_met(
        &condition(ConditionOperator::GreaterThan, json!("not a number")),
        &answers
    ));
}

#[test]
fn non_finite_numbers_fail_closed() {
    for answer in ["INF", "infinity", "-inf", "NaN"] {
        let answers = responses(json!(answer));
        assert!(
            !condition_met(&condition(ConditionOperator::GreaterThan, json!(100)), &answers),
            "{answer} must not satisfy greaterThan"
        );
        assert!(
            !condition_met(&condition(ConditionOperator::LessThan, json!(100)), &answers),
            "{answer} must not satisfy lessThan"
        );
    }

    let answers = responses(json!("150"));
    assert!(!condition_met(
        &condition(ConditionOperator::LessThan, json!("inf")),
        &answers
    ));
}

#[test]
fn multi_select_answers_are_joined_before_matching() {
    let answers = responses(json!(["Safety", "First Aid"]));

    assert!(condition_met(
        &condition(ConditionOperator::Equals, json!("safety, first aid")),
        &answers
    ));
}

#[test]
fn missing_forms_questions_or_answers_fail_closed() {
    let empty = ResponsesByForm::new();
    assert!(!condition_met(
        &condition(ConditionOperator::NotEquals, json!("anything")),
        &empty
    ));

    let mut other_question = ResponsesByForm::new();
    other_question.insert(
        FormId::new("form-intake"),
        form_payload("q-other", json!("yes")),
    );
    assert!(!condition_met(
        &condition(ConditionOperator::Equals, json!("yes")),
        &other_question
    ));

    let unanswered = responses(serde_json::Value::Null);
    assert!(!condition_met(
        &condition(ConditionOperator::NotEquals, json!("yes")),
        &unanswered
    ));
}

#[test]
fn every_condition_must_hold_for_issuance() {
    let evaluator = RuleBasedEligibility::new();
    let template = CertificateTemplate {
        id: TemplateId::new("tpl-safety"),
        name: "Safety".to_string(),
        conditions: vec![
            condition(ConditionOperator::Contains, json!("safety")),
            condition(ConditionOperator::NotEquals, json!("safety")),
        ],
    };
    let application = ApplicationId::new("app-eligibility");

    let issued = evaluator
        .evaluate(&application, &template, &responses(json!("Safety training")))
        .expect("evaluation succeeds");
    assert!(issued.generated);
    assert_eq!(
        issued.certificate_id.as_deref(),
        Some("cert-tpl-safety-app-eligibility-000001")
    );

    let refused = evaluator
        .evaluate(&application, &template, &responses(json!("safety")))
        .expect("evaluation succeeds");
    assert!(!refused.generated);
    assert!(refused.certificate_id.is_none());
}

#[test]
fn templates_without_conditions_always_issue() {
    let template = CertificateTemplate {
        id: TemplateId::new("tpl-attendance"),
        name: "Attendance".to_string(),
        conditions: Vec::new(),
    };
    assert!(RuleBasedEligibility::is_eligible(
        &template,
        &ResponsesByForm::new()
    ));
}
