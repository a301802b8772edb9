//! Tool-backed handlers: api, function, and the generic fallback all invoke
//! the tool named by `config.tool` through the tool registry.

use serde_json::{Map, Value, json};

use crate::collaborators::Collaborators;
use crate::error::ExecutorError;
use crate::workflow::SerializedBlock;

pub async fn execute(
    block: &SerializedBlock,
    inputs: &Map<String, Value>,
    collaborators: &Collaborators,
) -> Result<Value, ExecutorError> {
    let tool_id = block.config.tool.as_deref().ok_or_else(|| {
        ExecutorError::ToolNotFound(format!("block {} declares no tool", block.id))
    })?;
    if collaborators.tools.tool_by_id(tool_id).is_none() {
        return Err(ExecutorError::ToolNotFound(tool_id.to_string()));
    }

    let outcome = collaborators.tools.execute(tool_id, inputs.clone()).await?;
    if !outcome.success {
        return Err(ExecutorError::ToolExecutionFailed(
            outcome
                .error
                .unwrap_or_else(|| format!("tool {tool_id} reported failure")),
        ));
    }
    Ok(json!({"response": outcome.output.unwrap_or_else(|| json!({}))}))
}
