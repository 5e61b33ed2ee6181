// ABOUTME: Branch condition evaluation against instance variables
// ABOUTME: Every evaluation resolves to a boolean; malformed input fails closed to false

use serde_json::Value;
use tracing::debug;

use crate::model::{BranchCondition, ConditionOperator, VariableBag};

/// Evaluates branch conditions against an instance's variable bag.
/// Evaluation never raises: a missing key, an unusable value, or a
/// numeric coercion failure all resolve to `false` (or `true` for the
/// emptiness operators where absence counts as empty).
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, condition: &BranchCondition, variables: &VariableBag) -> bool {
        let key = match condition.resolved_key() {
            Some(key) => key,
            None => {
                debug!("branch condition names no variable key, resolving to false");
                return false;
            }
        };

        let actual = variables.get(key);
        let result = match condition.operator {
            ConditionOperator::IsEmpty => VariableBag::is_value_empty(actual),
            ConditionOperator::IsNotEmpty => !VariableBag::is_value_empty(actual),
            ConditionOperator::Equals => compare_equal(actual, condition.value.as_ref()),
            ConditionOperator::NotEquals => !compare_equal(actual, condition.value.as_ref()),
            ConditionOperator::Contains => contains(actual, condition.value.as_ref()),
            ConditionOperator::GreaterThan => {
                numeric_compare(actual, condition.value.as_ref(), |a, b| a > b)
            }
            ConditionOperator::LessThan => {
                numeric_compare(actual, condition.value.as_ref(), |a, b| a < b)
            }
        };

        debug!(
            key,
            operator = %condition.operator,
            result,
            "evaluated branch condition"
        );
        result
    }
}

/// Equality over the canonical string form, so `"5"` equals `5` the way
/// form-sourced variables expect. A missing key never equals anything.
fn compare_equal(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (Some(a), Some(e)) => {
            VariableBag::value_to_string(a) == VariableBag::value_to_string(e)
        }
        _ => false,
    }
}

fn contains(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let needle = match expected {
        Some(v) => VariableBag::value_to_string(v),
        None => return false,
    };
    match actual {
        Some(Value::String(s)) => s.contains(&needle),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| VariableBag::value_to_string(item) == needle),
        _ => false,
    }
}

fn numeric_compare(
    actual: Option<&Value>,
    expected: Option<&Value>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(e)) => cmp(a, e),
        _ => false,
    }
}

fn as_number(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
