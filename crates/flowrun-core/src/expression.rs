//! Boolean expression evaluation for condition blocks.
//!
//! Expressions arrive as JavaScript-like source over a dynamic scope
//! (`a.response.n > 0 && status == "ok"`). Dotted identifier paths are
//! substituted with literals from the scope, then the result is handed to
//! the `evalexpr` engine. Expressions are never executed as host code.

use serde_json::{Map, Value};

use crate::error::ExecutorError;

/// Evaluate a boolean expression against a scope of named values.
pub fn evaluate_condition(
    source: &str,
    scope: &Map<String, Value>,
) -> Result<bool, ExecutorError> {
    let substituted = substitute_paths(source, scope);
    match evalexpr::eval(&substituted) {
        Ok(value) => Ok(truthy(&value)),
        Err(e) => Err(ExecutorError::ConditionEvaluationError(format!(
            "{source:?}: {e}"
        ))),
    }
}

fn truthy(value: &evalexpr::Value) -> bool {
    match value {
        evalexpr::Value::Boolean(b) => *b,
        evalexpr::Value::Int(i) => *i != 0,
        evalexpr::Value::Float(f) => *f != 0.0,
        evalexpr::Value::String(s) => !s.is_empty(),
        evalexpr::Value::Tuple(t) => !t.is_empty(),
        evalexpr::Value::Empty => false,
    }
}

/// Replace identifier paths (`a.response.n`) with scope literals and rewrite
/// single-quoted string literals to the double-quoted form the evaluator
/// accepts. Quoted regions are never substituted into.
fn substitute_paths(source: &str, scope: &Map<String, Value>) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut result = String::with_capacity(source.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            let (literal, next) = read_string_literal(&chars, i);
            result.push_str(&literal);
            i = next;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            // A trailing dot belongs to the surrounding expression, not the path.
            let mut end = i;
            while end > start && chars[end - 1] == '.' {
                end -= 1;
            }
            i = end;
            let path: String = chars[start..end].iter().collect();
            result.push_str(&replacement_for(&path, scope));
        } else {
            result.push(c);
            i += 1;
        }
    }
    result
}

/// Copy a quoted literal, converting single quotes to escaped double-quote
/// form. Returns the rewritten literal and the index past its closing quote.
fn read_string_literal(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut body = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            body.push(c);
            body.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            i += 1;
            break;
        }
        if c == '"' && quote == '\'' {
            body.push_str("\\\"");
            i += 1;
            continue;
        }
        body.push(c);
        i += 1;
    }
    (format!("\"{body}\""), i)
}

fn replacement_for(path: &str, scope: &Map<String, Value>) -> String {
    // Keywords pass through untouched; JS null/undefined map to the empty value.
    match path {
        "true" | "false" => return path.to_string(),
        "null" | "undefined" => return "()".to_string(),
        _ => {}
    }
    match lookup(path, scope) {
        Some(value) => literal(value),
        // Unknown identifiers are left in place; the evaluator reports them
        // if the expression actually needs their value.
        None => path.to_string(),
    }
}

fn lookup<'a>(path: &str, scope: &'a Map<String, Value>) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = scope.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "()".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        // Composite values compare as their JSON text.
        other => format!(
            "\"{}\"",
            other.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn numeric_comparison() {
        let s = scope(json!({"a": {"response": {"n": -1}}}));
        assert!(!evaluate_condition("a.response.n > 0", &s).unwrap());
        assert!(evaluate_condition("a.response.n < 0", &s).unwrap());
    }

    #[test]
    fn boolean_operators_and_arithmetic() {
        let s = scope(json!({"n": 4, "m": 2}));
        assert!(evaluate_condition("n + m == 6 && n / m == 2", &s).unwrap());
        assert!(evaluate_condition("n > 10 || m == 2", &s).unwrap());
        assert!(evaluate_condition("!(n < m)", &s).unwrap());
    }

    #[test]
    fn string_equality_double_and_single_quotes() {
        let s = scope(json!({"status": "ok"}));
        assert!(evaluate_condition("status == \"ok\"", &s).unwrap());
        assert!(evaluate_condition("status == 'ok'", &s).unwrap());
        assert!(!evaluate_condition("status == 'fail'", &s).unwrap());
    }

    #[test]
    fn literal_true_false_pass_through() {
        let s = Map::new();
        assert!(evaluate_condition("true", &s).unwrap());
        assert!(!evaluate_condition("false", &s).unwrap());
    }

    #[test]
    fn null_compares_as_empty() {
        let s = scope(json!({"x": null}));
        assert!(evaluate_condition("x == null", &s).unwrap());
    }

    #[test]
    fn truthiness_of_bare_values() {
        let s = scope(json!({"count": 3, "name": "", "flag": true}));
        assert!(evaluate_condition("count", &s).unwrap());
        assert!(!evaluate_condition("name", &s).unwrap());
        assert!(evaluate_condition("flag", &s).unwrap());
    }

    #[test]
    fn unknown_identifier_errors() {
        let s = Map::new();
        let err = evaluate_condition("ghost > 1", &s).unwrap_err();
        assert!(matches!(err, ExecutorError::ConditionEvaluationError(_)));
    }

    #[test]
    fn substitution_skips_quoted_regions() {
        let s = scope(json!({"status": "ok"}));
        // The word "status" inside the literal must not be substituted.
        assert!(!evaluate_condition("status == \"status\"", &s).unwrap());
    }

    #[test]
    fn nested_path_into_object_value() {
        let s = scope(json!({"agent1": {"response": {"tokens": {"total": 9}}}}));
        assert!(evaluate_condition("agent1.response.tokens.total >= 9", &s).unwrap());
    }
}
