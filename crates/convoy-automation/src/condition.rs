//! The condition DSL: a flat predicate list walked over the event
//! payload. A tree walker over tagged variants; no mini-VM.

use serde_json::Value;
use tracing::trace;

use convoy_core::{CondOp, Condition};

/// Resolve a dotted path (`ticket.priority`) into the payload.
#[must_use]
pub fn resolve_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Evaluate one predicate against the payload.
#[must_use]
pub fn evaluate_condition(condition: &Condition, payload: &Value) -> bool {
    let field = resolve_path(payload, &condition.field);

    let result = match condition.op {
        CondOp::Exists => field.is_some_and(|v| !v.is_null()),
        CondOp::Eq => field.is_some_and(|v| loose_eq(v, &condition.value)),
        CondOp::Ne => !field.is_some_and(|v| loose_eq(v, &condition.value)),
        CondOp::In => field.is_some_and(|v| {
            condition
                .value
                .as_array()
                .is_some_and(|list| list.iter().any(|item| loose_eq(v, item)))
        }),
        CondOp::Contains => field.is_some_and(|v| contains(v, &condition.value)),
        CondOp::Lt => numeric(field, &condition.value).is_some_and(|(l, r)| l < r),
        CondOp::Lte => numeric(field, &condition.value).is_some_and(|(l, r)| l <= r),
        CondOp::Gt => numeric(field, &condition.value).is_some_and(|(l, r)| l > r),
        CondOp::Gte => numeric(field, &condition.value).is_some_and(|(l, r)| l >= r),
        CondOp::Regex => regex_match(field, &condition.value),
    };

    trace!(field = %condition.field, op = ?condition.op, result, "Condition evaluated");
    result
}

/// All conditions must hold. An empty list matches everything.
#[must_use]
pub fn evaluate_conditions(conditions: &[Condition], payload: &Value) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, payload))
}

/// Equality that tolerates the string form of scalars, so
/// `{"field": "ticket.priority", "op": "eq", "value": "high"}` matches
/// whether the payload carries `"high"` or an enum-serialized variant.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (scalar_string(left), scalar_string(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        _ => false,
    }
}

fn numeric(field: Option<&Value>, rhs: &Value) -> Option<(f64, f64)> {
    let left = field?.as_f64().or_else(|| {
        field?
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
    })?;
    let right = rhs
        .as_f64()
        .or_else(|| rhs.as_str().and_then(|s| s.parse::<f64>().ok()))?;
    Some((left, right))
}

fn regex_match(field: Option<&Value>, pattern: &Value) -> bool {
    let Some(pattern) = pattern.as_str() else {
        return false;
    };
    let Ok(re) = regex::Regex::new(pattern) else {
        trace!(pattern, "Invalid regex in condition");
        return false;
    };
    field
        .and_then(Value::as_str)
        .is_some_and(|text| re.is_match(text))
}
