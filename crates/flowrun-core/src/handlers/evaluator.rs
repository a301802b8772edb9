//! Evaluator handler: scores content with a provider call and merges the
//! returned metrics into the response.

use serde_json::{Map, Value, json};

use crate::collaborators::{Collaborators, ProviderRequest};
use crate::error::ExecutorError;
use crate::handlers::agent::{string_input, token_value};
use crate::workflow::SerializedBlock;

const DEFAULT_MODEL: &str = "gpt-4o";

pub async fn execute(
    block: &SerializedBlock,
    inputs: &Map<String, Value>,
    collaborators: &Collaborators,
) -> Result<Value, ExecutorError> {
    let spec = parse_system_prompt(block, inputs.get("systemPrompt"))?;
    let content = match inputs.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let request = ProviderRequest {
        provider: string_input(inputs, "provider"),
        model: string_input(inputs, "model").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        system_prompt: spec
            .get("systemPrompt")
            .and_then(Value::as_str)
            .map(str::to_string),
        context: Some(content),
        api_key: string_input(inputs, "apiKey"),
        response_format: spec.get("responseFormat").cloned(),
        ..ProviderRequest::default()
    };
    let response = collaborators.provider.request(request).await?;

    let tokens = response.tokens.unwrap_or_default();
    let mut raw = Map::new();
    raw.insert("content".to_string(), json!(response.content));
    raw.insert("model".to_string(), json!(response.model));
    raw.insert("tokens".to_string(), token_value(&tokens));

    // Metric keys from the provider's JSON content, lowercased. Non-JSON
    // content contributes no metrics.
    if let Ok(Value::Object(metrics)) = serde_json::from_str::<Value>(&response.content) {
        for (key, value) in metrics {
            raw.insert(key.to_lowercase(), value);
        }
    }
    Ok(Value::Object(raw))
}

/// The `systemPrompt` input is a mapping (or a JSON string producing one)
/// with `systemPrompt` and `responseFormat` keys.
fn parse_system_prompt(
    block: &SerializedBlock,
    raw: Option<&Value>,
) -> Result<Map<String, Value>, ExecutorError> {
    match raw {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => Err(ExecutorError::InvalidResponseFormat(format!(
                "evaluator {}: systemPrompt string must encode a JSON object",
                block.id
            ))),
        },
        _ => Err(ExecutorError::InvalidResponseFormat(format!(
            "evaluator {}: systemPrompt must be an object or a JSON string",
            block.id
        ))),
    }
}
