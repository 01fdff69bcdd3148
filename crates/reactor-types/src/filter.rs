//! Document filter language for C9's subscription matching (spec.md §4.8
//! item 2): implicit equality plus `$eq $ne $gt $gte $lt $lte $in $nin
//! $regex $exists`. Unknown operators are logged and treated as mismatches,
//! never as errors — a subscription with a typo'd operator simply never
//! fires rather than breaking the dispatcher.

use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

use crate::jsonpath::get_path;

/// A compiled document filter: a map of dot-path field name to either a
/// bare value (implicit `$eq`) or an operator object.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter(serde_json::Map<String, Value>);

impl Filter {
    pub fn from_value(value: Value) -> Option<Self> {
        value.as_object().cloned().map(Filter)
    }

    /// Evaluate the filter against `document`. A filter with no clauses
    /// matches everything.
    pub fn matches(&self, document: &Value) -> bool {
        self.0
            .iter()
            .all(|(path, expected)| match_field(document, path, expected))
    }
}

fn match_field(document: &Value, path: &str, expected: &Value) -> bool {
    let actual = get_path(document, path);

    match expected {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, arg)| match_operator(actual, op, arg))
        }
        // Implicit equality: bare value (including non-operator objects).
        other => actual == Some(other),
    }
}

fn match_operator(actual: Option<&Value>, op: &str, arg: &Value) -> bool {
    match op {
        "$eq" => actual == Some(arg),
        "$ne" => actual != Some(arg),
        "$gt" => compare(actual, arg).is_some_and(|o| o == Ordering::Greater),
        "$gte" => compare(actual, arg).is_some_and(|o| o != Ordering::Less),
        "$lt" => compare(actual, arg).is_some_and(|o| o == Ordering::Less),
        "$lte" => compare(actual, arg).is_some_and(|o| o != Ordering::Greater),
        "$in" => arg
            .as_array()
            .is_some_and(|arr| actual.is_some_and(|a| arr.contains(a))),
        "$nin" => arg
            .as_array()
            .is_some_and(|arr| !actual.is_some_and(|a| arr.contains(a))),
        "$regex" => match (actual.and_then(Value::as_str), arg.as_str()) {
            (Some(text), Some(pattern)) => regex::Regex::new(pattern)
                .map(|re| re.is_match(text))
                .unwrap_or(false),
            _ => false,
        },
        "$exists" => {
            let should_exist = arg.as_bool().unwrap_or(true);
            actual.is_some() == should_exist
        }
        other => {
            warn!(operator = other, "unknown filter operator, treating as mismatch");
            false
        }
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn implicit_equality_matches() {
        let f = Filter::from_value(json!({"status": "paid"})).unwrap();
        assert!(f.matches(&json!({"status": "paid"})));
        assert!(!f.matches(&json!({"status": "draft"})));
    }

    #[test]
    fn in_operator_matches_set() {
        let f = Filter::from_value(json!({"status": {"$in": ["paid", "refunded"]}})).unwrap();
        assert!(f.matches(&json!({"status": "paid"})));
        assert!(f.matches(&json!({"status": "refunded"})));
        assert!(!f.matches(&json!({"status": "draft"})));
    }

    #[test]
    fn nested_path_and_gte() {
        let f = Filter::from_value(json!({"order.total": {"$gte": 100}})).unwrap();
        assert!(f.matches(&json!({"order": {"total": 150}})));
        assert!(!f.matches(&json!({"order": {"total": 50}})));
    }

    #[test]
    fn exists_operator() {
        let f = Filter::from_value(json!({"refundedAt": {"$exists": true}})).unwrap();
        assert!(f.matches(&json!({"refundedAt": "2026-01-01"})));
        assert!(!f.matches(&json!({"status": "paid"})));

        let f = Filter::from_value(json!({"refundedAt": {"$exists": false}})).unwrap();
        assert!(f.matches(&json!({"status": "paid"})));
    }

    #[test]
    fn regex_operator() {
        let f = Filter::from_value(json!({"email": {"$regex": "^a.*@example\\.com$"}})).unwrap();
        assert!(f.matches(&json!({"email": "alice@example.com"})));
        assert!(!f.matches(&json!({"email": "bob@example.com"})));
    }

    #[test]
    fn unknown_operator_is_mismatch_not_error() {
        let f = Filter::from_value(json!({"status": {"$near": "paid"}})).unwrap();
        assert!(!f.matches(&json!({"status": "paid"})));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = Filter::from_value(json!({})).unwrap();
        assert!(f.matches(&json!({"anything": "at all"})));
    }

    #[test]
    fn multiple_clauses_are_conjunctive() {
        let f = Filter::from_value(json!({
            "status": "paid",
            "total": {"$gt": 0}
        }))
        .unwrap();
        assert!(f.matches(&json!({"status": "paid", "total": 10})));
        assert!(!f.matches(&json!({"status": "paid", "total": 0})));
        assert!(!f.matches(&json!({"status": "draft", "total": 10})));
    }
}
