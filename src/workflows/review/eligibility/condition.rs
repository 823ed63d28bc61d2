use serde::Deserialize;
use serde_json::Value;

use super::super::domain::{ApprovalCondition, ConditionOperator};
use super::ResponsesByForm;

#[derive(Debug, Deserialize)]
struct FormPayload {
    #[serde(default)]
    sections: Vec<FormSection>,
}

#[derive(Debug, Deserialize)]
struct FormSection {
    #[serde(default)]
    questions: Vec<QuestionAnswer>,
}

#[derive(Debug, Deserialize)]
struct QuestionAnswer {
    id: String,
    #[serde(default)]
    response: Option<Value>,
}

/// Fail-closed: a missing form, question or response never satisfies a condition.
pub fn condition_met(condition: &ApprovalCondition, responses: &ResponsesByForm) -> bool {
    let Some(payload) = responses.get(&condition.form_id) else {
        return false;
    };
    let Some(actual) = question_response(payload, &condition.question_id) else {
        return false;
    };
    let Some(expected) = scalar_text(&condition.expected_value) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => actual.to_lowercase() == expected.to_lowercase(),
        ConditionOperator::NotEquals => actual.to_lowercase() != expected.to_lowercase(),
        ConditionOperator::Contains => actual.to_lowercase().contains(&expected.to_lowercase()),
        ConditionOperator::GreaterThan => {
            compare_numbers(&actual, &expected).is_some_and(|(a, b)| a > b)
        }
        ConditionOperator::LessThan => {
            compare_numbers(&actual, &expected).is_some_and(|(a, b)| a < b)
        }
    }
}

/// Walks `sections -> questions -> response` and renders the answer as text.
fn question_response(payload: &Value, question_id: &str) -> Option<String> {
    let form: FormPayload = serde_json::from_value(payload.clone()).ok()?;
    form.sections
        .iter()
        .flat_map(|section| section.questions.iter())
        .find(|question| question.id == question_id)
        .and_then(|question| question.response.as_ref())
        .and_then(scalar_text)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
            Some(parts.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

fn compare_numbers(actual: &str, expected: &str) -> Option<(f64, f64)> {
    let parse = |raw: &str| raw.trim().parse::<f64>().ok().filter(|value| value.is_finite());
    Some((parse(actual)?, parse(expected)?))
}
