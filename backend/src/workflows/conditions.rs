// Workflow Conditions - Guard evaluation and edge selection for condition steps

use groundwork_shared::{Connection, Guard, GuardOperator};
use serde_json::Value;

/// Resolve a dot-separated path against the execution context.
///
/// Paths are tried at the context root first (`steps.review.decision`,
/// `decision`) and then under `trigger`, so guards can name fields of the
/// original submission directly (`amount`, `site.region`).
pub fn get_field<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    lookup(context, path).or_else(|| context.get("trigger").and_then(|trigger| lookup(trigger, path)))
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

/// String form used by `equals`, `not_equals` and `contains`
pub fn coerce_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => number_to_string(n),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Whole floats print without a fraction, so 1000.0 compares equal to "1000"
fn number_to_string(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            (f as i64).to_string()
        }
        _ => n.to_string(),
    }
}

/// Numeric form used by `greater_than` and `less_than`; anything non-numeric is 0
pub fn coerce_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .unwrap_or(0.0),
        Some(Value::Bool(true)) => 1.0,
        _ => 0.0,
    }
}

/// Evaluate a single guard against the context
pub fn evaluate(guard: &Guard, context: &Value) -> bool {
    let field_value = get_field(context, &guard.field);
    let literal = Some(&guard.value);

    match guard.operator {
        GuardOperator::Equals => coerce_string(field_value) == coerce_string(literal),
        GuardOperator::NotEquals => coerce_string(field_value) != coerce_string(literal),
        GuardOperator::GreaterThan => coerce_number(field_value) > coerce_number(literal),
        GuardOperator::LessThan => coerce_number(field_value) < coerce_number(literal),
        GuardOperator::Contains => coerce_string(field_value)
            .to_lowercase()
            .contains(&coerce_string(literal).to_lowercase()),
    }
}

/// Pick the outgoing connection to follow.
///
/// The first guarded connection (in authoring order) whose guard holds wins;
/// failing that, the first unguarded connection is the default.
pub fn select_connection<'a>(connections: &[&'a Connection], context: &Value) -> Option<&'a Connection> {
    connections
        .iter()
        .find(|c| c.guard.as_ref().is_some_and(|guard| evaluate(guard, context)))
        .or_else(|| connections.iter().find(|c| c.guard.is_none()))
        .copied()
}
