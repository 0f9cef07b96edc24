//! The closed set of comparison operators a routing rule may use.

use aorta_common::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "eq")]
    Eq,
    #[serde(rename = "ne")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "nin")]
    NotIn,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "notexists")]
    NotExists,
    #[serde(rename = "matches")]
    Matches,
    #[serde(rename = "startswith")]
    StartsWith,
    #[serde(rename = "endswith")]
    EndsWith,
    #[serde(rename = "gt")]
    Gt,
    #[serde(rename = "lt")]
    Lt,
    #[serde(rename = "gte")]
    Gte,
    #[serde(rename = "lte")]
    Lte,
}

/// One clause of a rule: `name operator value`. All clauses in a rule are
/// ANDed together; see [`crate::rule::Rule::is_match`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(rename = "name")]
    pub attname: String,
    #[serde(rename = "operator")]
    pub op: Operator,
    #[serde(default)]
    pub value: Option<Value>,
}

impl Criterion {
    /// Evaluates this criterion against a message attribute, already
    /// resolved by the caller via [`aorta_common::message::Message::attribute`].
    pub fn matches(&self, attribute: Option<&Value>) -> bool {
        match self.op {
            Operator::Exists => attribute.is_some(),
            Operator::NotExists => attribute.is_none(),
            _ => match attribute {
                None => false,
                Some(actual) => self.matches_present(actual),
            },
        }
    }

    fn matches_present(&self, actual: &Value) -> bool {
        match self.op {
            Operator::Exists | Operator::NotExists => unreachable!("handled in matches()"),
            Operator::Eq => self.value.as_ref().is_some_and(|v| v == actual),
            Operator::Ne => match &self.value {
                Some(v) => v != actual,
                None => true,
            },
            Operator::In => match &self.value {
                Some(Value::List(items)) => items.contains(actual),
                _ => false,
            },
            Operator::NotIn => match &self.value {
                Some(Value::List(items)) => !items.contains(actual),
                _ => true,
            },
            Operator::StartsWith => self.string_op(actual, |a, v| a.starts_with(v)),
            Operator::EndsWith => self.string_op(actual, |a, v| a.ends_with(v)),
            Operator::Matches => match &self.value {
                Some(Value::String(pattern)) => anchored_regex(pattern)
                    .map(|re| re.is_match(&actual.to_comparable_string()))
                    .unwrap_or(false),
                _ => false,
            },
            Operator::Gt => self.numeric_op(actual, |a, v| a > v),
            Operator::Lt => self.numeric_op(actual, |a, v| a < v),
            Operator::Gte => self.numeric_op(actual, |a, v| a >= v),
            Operator::Lte => self.numeric_op(actual, |a, v| a <= v),
        }
    }

    fn string_op(&self, actual: &Value, f: impl Fn(&str, &str) -> bool) -> bool {
        match (self.value.as_ref().and_then(Value::as_str), actual.as_str()) {
            (Some(expected), Some(actual)) => f(actual, expected),
            _ => false,
        }
    }

    fn numeric_op(&self, actual: &Value, f: impl Fn(f64, f64) -> bool) -> bool {
        match (self.value.as_ref().and_then(Value::as_f64), actual.as_f64()) {
            (Some(expected), Some(actual)) => f(actual, expected),
            _ => false,
        }
    }
}

/// `matches` is always anchored to the full attribute value; a partial
/// substring match never routes a message.
fn anchored_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crit(op: Operator, value: Option<Value>) -> Criterion {
        Criterion {
            attname: "x".into(),
            op,
            value,
        }
    }

    #[test]
    fn eq_and_ne() {
        let v = Value::String("orders".into());
        assert!(crit(Operator::Eq, Some(v.clone())).matches(Some(&v)));
        assert!(!crit(Operator::Ne, Some(v.clone())).matches(Some(&v)));
    }

    #[test]
    fn exists_and_not_exists_ignore_value() {
        assert!(crit(Operator::Exists, None).matches(Some(&Value::Int(1))));
        assert!(!crit(Operator::Exists, None).matches(None));
        assert!(crit(Operator::NotExists, None).matches(None));
        assert!(!crit(Operator::NotExists, None).matches(Some(&Value::Int(1))));
    }

    #[test]
    fn in_and_not_in() {
        let list = Value::List(vec![Value::String("a".into()), Value::String("b".into())]);
        let c = crit(Operator::In, Some(list.clone()));
        assert!(c.matches(Some(&Value::String("a".into()))));
        assert!(!c.matches(Some(&Value::String("z".into()))));

        let c = crit(Operator::NotIn, Some(list));
        assert!(!c.matches(Some(&Value::String("a".into()))));
        assert!(c.matches(Some(&Value::String("z".into()))));
    }

    #[test]
    fn matches_is_fully_anchored() {
        let c = crit(Operator::Matches, Some(Value::String(r"orders\.\w+".into())));
        assert!(c.matches(Some(&Value::String("orders.created".into()))));
        assert!(!c.matches(Some(&Value::String("orders.created.extra".into()))));
        assert!(!c.matches(Some(&Value::String("xorders.created".into()))));
    }

    #[test]
    fn ordering_operators_compare_numerically() {
        let c = crit(Operator::Gte, Some(Value::Int(10)));
        assert!(c.matches(Some(&Value::Int(10))));
        assert!(c.matches(Some(&Value::Int(11))));
        assert!(!c.matches(Some(&Value::Int(9))));
    }

    #[test]
    fn starts_and_ends_with() {
        let c = crit(Operator::StartsWith, Some(Value::String("orders.".into())));
        assert!(c.matches(Some(&Value::String("orders.created".into()))));
        assert!(!c.matches(Some(&Value::String("users.created".into()))));
    }

    #[test]
    fn operators_deserialize_from_the_wire_tokens() {
        let cases = [
            ("eq", Operator::Eq),
            ("ne", Operator::Ne),
            ("in", Operator::In),
            ("nin", Operator::NotIn),
            ("exists", Operator::Exists),
            ("notexists", Operator::NotExists),
            ("matches", Operator::Matches),
            ("startswith", Operator::StartsWith),
            ("endswith", Operator::EndsWith),
            ("gt", Operator::Gt),
            ("lt", Operator::Lt),
            ("gte", Operator::Gte),
            ("lte", Operator::Lte),
        ];
        for (token, expected) in cases {
            let parsed: Operator = serde_json::from_str(&format!("\"{token}\"")).expect("token should deserialize");
            assert_eq!(parsed, expected, "token {token}");
        }
    }

    #[test]
    fn criterion_deserializes_name_and_operator_keys() {
        let json = r#"{"name": "address", "operator": "startswith", "value": "orders."}"#;
        let c: Criterion = serde_json::from_str(json).unwrap();
        assert_eq!(c.attname, "address");
        assert_eq!(c.op, Operator::StartsWith);
    }
}
