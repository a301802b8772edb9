//! Input resolution. Just before a block runs, its raw parameter map is
//! transformed into a fully resolved input mapping: `<block.path>` references
//! are substituted from prior block outputs, `{{NAME}}` references from the
//! environment, and strings that look like JSON are parsed into structure.
//!
//! Within one string the passes run in a fixed order: block references,
//! then environment variables, then the optional JSON parse. Matches are
//! non-overlapping and each pass walks the string once.

use serde_json::{Map, Value};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::workflow::{BlockKind, SerializedBlock};

/// Resolve a block's `config.params` into the input mapping its handler
/// receives.
pub fn resolve_inputs(
    block: &SerializedBlock,
    ctx: &ExecutionContext,
) -> Result<Map<String, Value>, ExecutorError> {
    let for_condition = block.kind() == BlockKind::Condition;
    let mut resolved = Map::new();
    for (key, value) in &block.config.params {
        let value = resolve_value(value, for_condition, ctx)?;
        resolved.insert(key.clone(), value);
    }
    debug!(block = %block.id, params = resolved.len(), "resolved inputs");
    Ok(resolved)
}

fn resolve_value(
    value: &Value,
    for_condition: bool,
    ctx: &ExecutionContext,
) -> Result<Value, ExecutorError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => {
            let substituted = substitute_string(s, for_condition, ctx)?;
            Ok(maybe_parse_json(substituted))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => {
                        out.push(Value::String(substitute_string(s, for_condition, ctx)?));
                    }
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, for_condition, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    input: &str,
    for_condition: bool,
    ctx: &ExecutionContext,
) -> Result<String, ExecutorError> {
    let with_refs = substitute_block_refs(input, for_condition, ctx)?;
    substitute_env_vars(&with_refs, ctx)
}

/// Strings that look like JSON documents become structure; anything that
/// fails to parse stays a string.
fn maybe_parse_json(text: String) -> Value {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            return parsed;
        }
    }
    Value::String(text)
}

fn substitute_block_refs(
    input: &str,
    for_condition: bool,
    ctx: &ExecutionContext,
) -> Result<String, ExecutorError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        let Some(close_rel) = rest[open + 1..].find('>') else {
            break;
        };
        let close = open + 1 + close_rel;
        out.push_str(&rest[..open]);
        out.push_str(&resolve_reference(&rest[open + 1..close], for_condition, ctx)?);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolve one `head.part1.part2…` reference into its substitution text.
fn resolve_reference(
    reference: &str,
    for_condition: bool,
    ctx: &ExecutionContext,
) -> Result<String, ExecutorError> {
    let mut parts = reference.split('.');
    let head = parts.next().unwrap_or_default();
    let block = ctx
        .index
        .resolve(&ctx.workflow, head)
        .ok_or_else(|| ExecutorError::ReferenceNotFound(head.to_string()))?;

    if !block.enabled {
        return Err(ExecutorError::DisabledDependency(block.id.clone()));
    }
    // Blocks pruned off the active path resolve to nothing rather than
    // failing the run.
    if !ctx.active_execution_path.contains(&block.id) {
        return Ok(String::new());
    }

    let Some(state) = ctx.block_states.get(&block.id) else {
        // A loop member referenced before its first execution in this
        // iteration resolves to the empty string.
        if ctx.workflow.in_loop(&block.id) {
            return Ok(String::new());
        }
        return Err(ExecutorError::UnresolvedReference(block.id.clone()));
    };

    let mut current = state.output.as_value();
    for part in parts {
        current = match current.get(part) {
            Some(next) => next.clone(),
            None => {
                return Err(ExecutorError::InvalidReferencePath {
                    block: block.id.clone(),
                    path: reference.to_string(),
                });
            }
        };
    }

    Ok(if for_condition {
        condition_literal(&current)
    } else {
        plain_text(&current)
    })
}

/// Format a value so it is a valid literal inside a boolean expression.
fn condition_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => format!(
            "\"{}\"",
            s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
        ),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => other.to_string(),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => other.to_string(),
    }
}

fn substitute_env_vars(input: &str, ctx: &ExecutionContext) -> Result<String, ExecutorError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        let Some(close_rel) = rest[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + close_rel;
        let name = &rest[open + 2..close];
        let value = ctx
            .environment_variables
            .get(name)
            .ok_or_else(|| ExecutorError::EnvVarNotFound(name.to_string()))?;
        out.push_str(&rest[..open]);
        out.push_str(value);
        rest = &rest[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
