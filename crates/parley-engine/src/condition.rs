//! Skip-condition expression language: parser and evaluator.
//!
//! Grammar:
//! ```text
//! ConditionExpr  ::= Clause ( '&&' Clause )*
//! Clause         ::= Key Operator Literal | Key | '!' Key
//! Key            ::= ( 'data.' | 'context.' )? identifier ( '.' identifier )*
//! Operator       ::= '=' | '==' | '!=' | '>' | '>=' | '<' | '<='
//! Literal        ::= QuotedString | BareWord | Number | Boolean
//! ```
//!
//! A bare key tests presence, `!key` tests absence. Ordering operators need a
//! numeric value on both sides; anything else is an evaluation error.

use parley_types::{ParleyError, Result};
use serde_json::Value;

/// A parsed condition expression consisting of one or more clauses joined by `&&`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

/// A single clause. `value` is empty for presence checks.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Present,
    Absent,
}

impl Operator {
    fn is_ordering(self) -> bool {
        matches!(self, Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le)
    }
}

/// Parse a condition string into a [`ConditionExpr`].
///
/// An empty or whitespace-only input produces an expression with zero clauses,
/// which [`evaluate_condition`] treats as always true.
pub fn parse_condition(input: &str) -> Result<ConditionExpr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(ConditionExpr {
            clauses: Vec::new(),
        });
    }

    let clauses = trimmed
        .split("&&")
        .map(|part| parse_clause(part.trim()))
        .collect::<Result<Vec<_>>>()?;

    Ok(ConditionExpr { clauses })
}

fn parse_clause(input: &str) -> Result<Clause> {
    if input.is_empty() {
        return Err(make_error("empty clause"));
    }

    let Some((key_end, operator, op_len)) = find_operator(input) else {
        // Presence form: `key` or `!key`
        let (key, operator) = match input.strip_prefix('!') {
            Some(rest) => (rest.trim(), Operator::Absent),
            None => (input, Operator::Present),
        };
        validate_key(key)?;
        return Ok(Clause {
            key: key.to_string(),
            operator,
            value: String::new(),
        });
    };

    let key = input[..key_end].trim();
    if key.is_empty() {
        return Err(make_error("missing key before operator"));
    }
    validate_key(key)?;

    let raw_value = input[key_end + op_len..].trim();
    if raw_value.is_empty() {
        return Err(make_error(&format!("missing value after operator in '{input}'")));
    }
    let value = strip_quotes(raw_value);
    if operator.is_ordering() && value.parse::<f64>().is_err() {
        return Err(make_error(&format!(
            "ordering comparison needs a number, got '{value}'"
        )));
    }

    Ok(Clause {
        key: key.to_string(),
        operator,
        value,
    })
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(make_error("missing key"));
    }
    for seg in key.split('.') {
        if seg.is_empty() || !seg.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(make_error(&format!("invalid key segment: '{seg}'")));
        }
    }
    Ok(())
}

fn find_operator(input: &str) -> Option<(usize, Operator, usize)> {
    // Scan for an operator, skipping quoted regions.
    let bytes = input.as_bytes();
    let next_is_eq = |i: usize| i + 1 < bytes.len() && bytes[i + 1] == b'=';
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'!' if next_is_eq(i) => return Some((i, Operator::NotEq, 2)),
            b'>' if next_is_eq(i) => return Some((i, Operator::Ge, 2)),
            b'<' if next_is_eq(i) => return Some((i, Operator::Le, 2)),
            b'>' => return Some((i, Operator::Gt, 1)),
            b'<' => return Some((i, Operator::Lt, 1)),
            b'=' if next_is_eq(i) => return Some((i, Operator::Eq, 2)),
            b'=' => return Some((i, Operator::Eq, 1)),
            _ => i += 1,
        }
    }
    None
}

fn strip_quotes(s: &str) -> String {
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
        {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn make_error(msg: &str) -> ParleyError {
    ParleyError::ConditionParse(msg.to_string())
}

/// Evaluate a condition expression against values provided by `resolve`.
///
/// `resolve` maps a key (`"age"`, `"data.age"`, `"context.channel"`) to its
/// current value, or `None` when absent. Equality on a missing key compares
/// against the empty string. Ordering on a missing or non-numeric value is an
/// error.
pub fn evaluate_condition(
    expr: &ConditionExpr,
    resolve: &dyn Fn(&str) -> Option<Value>,
) -> Result<bool> {
    for clause in &expr.clauses {
        if !evaluate_clause(clause, resolve)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_clause(clause: &Clause, resolve: &dyn Fn(&str) -> Option<Value>) -> Result<bool> {
    let actual = resolve(&clause.key);
    match clause.operator {
        Operator::Present => Ok(actual.is_some()),
        Operator::Absent => Ok(actual.is_none()),
        Operator::Eq => Ok(loosely_equal(actual.as_ref(), &clause.value)),
        Operator::NotEq => Ok(!loosely_equal(actual.as_ref(), &clause.value)),
        op => {
            let lhs = as_number(actual.as_ref()).ok_or_else(|| ParleyError::ConditionEval {
                field: clause.key.clone(),
                message: format!("expected a number, found {}", describe(actual.as_ref())),
            })?;
            let rhs: f64 = clause.value.parse().map_err(|_| ParleyError::ConditionEval {
                field: clause.key.clone(),
                message: format!("literal '{}' is not a number", clause.value),
            })?;
            Ok(match op {
                Operator::Gt => lhs > rhs,
                Operator::Ge => lhs >= rhs,
                Operator::Lt => lhs < rhs,
                _ => lhs <= rhs,
            })
        }
    }
}

fn loosely_equal(actual: Option<&Value>, literal: &str) -> bool {
    match actual {
        None => literal.is_empty(),
        Some(Value::String(s)) => s == literal,
        Some(Value::Number(n)) => match (n.as_f64(), literal.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => n.to_string() == literal,
        },
        Some(Value::Bool(b)) => b.to_string() == literal,
        Some(Value::Null) => literal == "null",
        Some(other) => other.to_string() == literal,
    }
}

fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "nothing".to_string(),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(key: &str) -> Option<Value> {
        match key {
            "plan" | "data.plan" => Some(json!("pro")),
            "age" => Some(json!(36)),
            "age_text" => Some(json!("41")),
            "nickname" => Some(json!("")),
            "opted_in" => Some(json!(false)),
            "context.channel" => Some(json!("sms")),
            _ => None,
        }
    }

    #[test]
    fn simple_equality() {
        let expr = parse_condition("plan=pro").unwrap();
        assert_eq!(expr.clauses.len(), 1);
        assert_eq!(expr.clauses[0].operator, Operator::Eq);
        assert!(evaluate_condition(&expr, &resolver).unwrap());

        let expr = parse_condition("plan == 'free'").unwrap();
        assert!(!evaluate_condition(&expr, &resolver).unwrap());
    }

    #[test]
    fn not_equal_and_missing_keys() {
        let expr = parse_condition("missing!=something").unwrap();
        assert!(evaluate_condition(&expr, &resolver).unwrap());
        assert!(parse_condition("missing=").is_err());
    }

    #[test]
    fn presence_and_absence() {
        let expr = parse_condition("nickname && !email").unwrap();
        assert_eq!(expr.clauses[0].operator, Operator::Present);
        assert_eq!(expr.clauses[1].operator, Operator::Absent);
        assert!(evaluate_condition(&expr, &resolver).unwrap());

        let expr = parse_condition("email").unwrap();
        assert!(!evaluate_condition(&expr, &resolver).unwrap());
    }

    #[test]
    fn numeric_comparisons() {
        let ge = parse_condition("age >= 18").unwrap();
        assert_eq!(ge.clauses[0].operator, Operator::Ge);
        assert!(evaluate_condition(&ge, &resolver).unwrap());

        let lt = parse_condition("age_text < 40").unwrap();
        assert!(!evaluate_condition(&lt, &resolver).unwrap());

        let eq = parse_condition("age=36.0").unwrap();
        assert!(evaluate_condition(&eq, &resolver).unwrap());
    }

    #[test]
    fn ordering_on_missing_or_text_is_an_error() {
        let expr = parse_condition("email > 3").unwrap();
        let err = evaluate_condition(&expr, &resolver).unwrap_err();
        assert!(matches!(err, ParleyError::ConditionEval { ref field, .. } if field == "email"));

        let expr = parse_condition("plan > 3").unwrap();
        assert!(evaluate_condition(&expr, &resolver).is_err());
    }

    #[test]
    fn ordering_literal_must_be_numeric() {
        assert!(parse_condition("age > adult").is_err());
    }

    #[test]
    fn compound_short_circuits_on_false() {
        // The second clause would error, but the first is already false.
        let expr = parse_condition("plan=free && email > 3").unwrap();
        assert!(!evaluate_condition(&expr, &resolver).unwrap());
    }

    #[test]
    fn booleans_and_prefixed_keys() {
        let expr = parse_condition("opted_in=false && context.channel=sms && data.plan=pro").unwrap();
        assert!(evaluate_condition(&expr, &resolver).unwrap());
    }

    #[test]
    fn empty_condition_always_true() {
        let expr = parse_condition("   ").unwrap();
        assert!(expr.clauses.is_empty());
        assert!(evaluate_condition(&expr, &resolver).unwrap());
    }

    #[test]
    fn parse_error_invalid_syntax() {
        assert!(parse_condition("plan=pro && ").is_err());
        assert!(parse_condition("=value").is_err());
        assert!(parse_condition("bad key=1").is_err());
        assert!(parse_condition("!").is_err());
    }

    #[test]
    fn quoted_values_may_contain_operators() {
        let expr = parse_condition(r#"plan="a>=b""#).unwrap();
        assert_eq!(expr.clauses[0].value, "a>=b");
        assert_eq!(expr.clauses[0].operator, Operator::Eq);
    }
}
