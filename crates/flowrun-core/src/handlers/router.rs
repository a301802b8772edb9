//! Router handler: asks the model to pick exactly one downstream block.

use serde_json::{Map, Value, json};

use crate::collaborators::{Collaborators, ProviderRequest};
use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::handlers::agent::{string_input, token_value};
use crate::workflow::SerializedBlock;

const DEFAULT_MODEL: &str = "gpt-4o";

/// One candidate destination presented to the model.
#[derive(Debug, Clone)]
pub struct RouterTarget {
    pub id: String,
    pub block_type: String,
    pub title: String,
    pub description: Option<String>,
    pub sub_blocks: Map<String, Value>,
    pub current_state: Option<Value>,
}

pub async fn execute(
    block: &SerializedBlock,
    inputs: &Map<String, Value>,
    ctx: &ExecutionContext,
    collaborators: &Collaborators,
) -> Result<Value, ExecutorError> {
    let targets = collect_targets(block, ctx);
    let prompt = string_input(inputs, "prompt").unwrap_or_default();

    let request = ProviderRequest {
        provider: string_input(inputs, "provider"),
        model: string_input(inputs, "model").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        system_prompt: Some(router_prompt(&prompt, &targets)),
        context: Some(prompt),
        temperature: inputs.get("temperature").and_then(Value::as_f64),
        api_key: string_input(inputs, "apiKey"),
        ..ProviderRequest::default()
    };
    let response = collaborators.provider.request(request).await?;

    let chosen = response.content.trim();
    let target = targets
        .iter()
        .find(|t| t.id.eq_ignore_ascii_case(chosen))
        .ok_or_else(|| {
            ExecutorError::InvalidRoutingDecision(format!(
                "router {} received \"{chosen}\", expected one of [{}]",
                block.id,
                targets
                    .iter()
                    .map(|t| t.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

    let tokens = response.tokens.unwrap_or_default();
    Ok(json!({
        "content": response.content.trim().to_lowercase(),
        "model": response.model,
        "tokens": token_value(&tokens),
        "selectedPath": {
            "blockId": target.id,
            "blockType": target.block_type,
            "blockTitle": target.title,
        }
    }))
}

/// Target descriptors for every outgoing edge, including the current output
/// of targets that already ran (loop re-entries).
fn collect_targets(block: &SerializedBlock, ctx: &ExecutionContext) -> Vec<RouterTarget> {
    ctx.workflow
        .outgoing(&block.id)
        .filter_map(|conn| ctx.workflow.block(&conn.target))
        .map(|target| RouterTarget {
            id: target.id.clone(),
            block_type: target.kind().as_str().to_string(),
            title: target.name().to_string(),
            description: target
                .config
                .params
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            sub_blocks: target.config.params.clone(),
            current_state: ctx.output_of(&target.id).map(|o| o.as_value()),
        })
        .collect()
}

/// System prompt instructing the model to answer with exactly one target id.
/// Pure function of its arguments.
pub fn router_prompt(prompt: &str, targets: &[RouterTarget]) -> String {
    let mut lines = String::from(
        "You are a routing engine. Choose the single best destination block \
         for the user's request.\n\nDestinations:\n",
    );
    for target in targets {
        lines.push_str(&format!(
            "- id: {} (type: {}, title: {})",
            target.id, target.block_type, target.title
        ));
        if let Some(description) = &target.description {
            lines.push_str(&format!(" — {description}"));
        }
        lines.push('\n');
    }
    lines.push_str(&format!(
        "\nUser request: {prompt}\n\nRespond with exactly one destination id \
         from the list above and nothing else."
    ));
    lines
}
