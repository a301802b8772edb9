//! Condition handler: evaluates an ordered list of boolean conditions
//! against the incoming block's output and selects the outgoing edge whose
//! handle names the first matching condition.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::expression;
use crate::workflow::{SerializedBlock, normalize_block_name};

/// One condition row: `if` / `else if` carry an expression, `else` matches
/// unconditionally.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionSpec {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub value: String,
}

pub fn execute(
    block: &SerializedBlock,
    inputs: &Map<String, Value>,
    ctx: &ExecutionContext,
) -> Result<Value, ExecutorError> {
    let conditions = parse_conditions(block, inputs.get("conditions"))?;
    let source = executed_source(block, ctx)?;
    let scope = evaluation_scope(source, ctx);

    let mut last_error: Option<ExecutorError> = None;
    for condition in &conditions {
        let matched = match condition.title.as_str() {
            "if" | "else if" => match expression::evaluate_condition(&condition.value, &scope) {
                Ok(result) => result,
                Err(e) => {
                    last_error = Some(e);
                    false
                }
            },
            "else" => true,
            _ => false,
        };
        if !matched {
            continue;
        }
        let Some(target_id) = edge_target(block, &condition.id, ctx) else {
            continue;
        };
        let Some(target) = ctx.workflow.block(&target_id) else {
            continue;
        };
        return Ok(json!({
            "selectedConditionId": condition.id,
            "selectedPath": {
                "blockId": target.id,
                "blockType": target.kind().as_str(),
                "blockTitle": target.name(),
            },
            "conditionResult": true,
        }));
    }

    match last_error {
        Some(e) => Err(e),
        None => Err(ExecutorError::NoConditionPath(block.id.clone())),
    }
}

/// Conditions arrive as an array or a JSON string encoding one.
fn parse_conditions(
    block: &SerializedBlock,
    raw: Option<&Value>,
) -> Result<Vec<ConditionSpec>, ExecutorError> {
    let parsed = match raw {
        Some(Value::String(s)) => serde_json::from_str(s).map_err(|e| {
            ExecutorError::ConditionEvaluationError(format!(
                "block {}: conditions string is not valid JSON: {e}",
                block.id
            ))
        })?,
        Some(value @ Value::Array(_)) => {
            serde_json::from_value(value.clone()).map_err(|e| {
                ExecutorError::ConditionEvaluationError(format!(
                    "block {}: malformed conditions: {e}",
                    block.id
                ))
            })?
        }
        _ => {
            return Err(ExecutorError::ConditionEvaluationError(format!(
                "block {}: conditions must be an array or a JSON string",
                block.id
            )));
        }
    };
    Ok(parsed)
}

/// The single incoming connection's source, which must already have run.
fn executed_source<'c>(
    block: &SerializedBlock,
    ctx: &'c ExecutionContext,
) -> Result<&'c SerializedBlock, ExecutorError> {
    let source_id = ctx
        .workflow
        .incoming(&block.id)
        .map(|c| c.source.clone())
        .next()
        .ok_or_else(|| ExecutorError::MissingConditionSource(block.id.clone()))?;
    if !ctx.executed_blocks.contains(&source_id) {
        return Err(ExecutorError::MissingConditionSource(block.id.clone()));
    }
    ctx.workflow
        .block(&source_id)
        .ok_or_else(|| ExecutorError::MissingConditionSource(block.id.clone()))
}

/// Expression scope: the source's `response` fields at top level, plus the
/// source's normalized name bound to its entire output.
fn evaluation_scope(source: &SerializedBlock, ctx: &ExecutionContext) -> Map<String, Value> {
    let mut scope = Map::new();
    if let Some(output) = ctx.output_of(&source.id) {
        for (key, value) in &output.response {
            scope.insert(key.clone(), value.clone());
        }
        scope.insert(normalize_block_name(source.name()), output.as_value());
    }
    scope
}

fn edge_target(
    block: &SerializedBlock,
    condition_id: &str,
    ctx: &ExecutionContext,
) -> Option<String> {
    let handle = format!("condition-{condition_id}");
    ctx.workflow
        .outgoing(&block.id)
        .find(|c| c.source_handle.as_deref() == Some(handle.as_str()))
        .map(|c| c.target.clone())
}
