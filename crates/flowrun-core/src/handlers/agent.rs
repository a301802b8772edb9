//! Agent handler: one provider call with optional tool definitions and an
//! optional structured response format.

use serde_json::{Map, Value, json};

use crate::collaborators::{Collaborators, ProviderRequest, TokenUsage, ToolRegistry};
use crate::error::ExecutorError;
use crate::workflow::SerializedBlock;

const DEFAULT_MODEL: &str = "gpt-4o";

pub async fn execute(
    block: &SerializedBlock,
    inputs: &Map<String, Value>,
    collaborators: &Collaborators,
) -> Result<Value, ExecutorError> {
    let response_format = parse_response_format(inputs.get("responseFormat"))?;
    let request = ProviderRequest {
        provider: string_input(inputs, "provider"),
        model: string_input(inputs, "model").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        system_prompt: string_input(inputs, "systemPrompt"),
        context: context_input(inputs.get("context")),
        tools: transform_tools(inputs.get("tools"), collaborators.tools.as_ref()),
        temperature: inputs.get("temperature").and_then(Value::as_f64),
        max_tokens: inputs.get("maxTokens").and_then(Value::as_u64),
        api_key: string_input(inputs, "apiKey"),
        response_format: response_format.clone(),
    };

    let response = collaborators.provider.request(request).await?;

    if response_format.is_some() {
        let parsed: Value = serde_json::from_str(&response.content).map_err(|e| {
            ExecutorError::InvalidResponseFormat(format!(
                "agent {} returned non-JSON structured content: {e}",
                block.id
            ))
        })?;
        let response_map = match parsed {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        return Ok(json!({"response": response_map}));
    }

    let tokens = response.tokens.unwrap_or_default();
    Ok(json!({
        "content": response.content,
        "model": response.model,
        "tokens": token_value(&tokens),
        "toolCalls": {
            "list": response.tool_calls.clone(),
            "count": response.tool_calls.len(),
        }
    }))
}

pub(crate) fn token_value(tokens: &TokenUsage) -> Value {
    json!({
        "prompt": tokens.prompt,
        "completion": tokens.completion,
        "total": tokens.total,
    })
}

pub(crate) fn string_input(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    match inputs.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// The conversation context: a string is used as-is, any other value is
/// JSON-stringified.
fn context_input(raw: Option<&Value>) -> Option<String> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn parse_response_format(raw: Option<&Value>) -> Result<Option<Value>, ExecutorError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => serde_json::from_str(s)
            .map(Some)
            .map_err(|e| ExecutorError::InvalidResponseFormat(e.to_string())),
        Some(other) => Ok(Some(other.clone())),
    }
}

/// Turn tool references into provider tool definitions. Each entry names a
/// block type; the registry maps it to a tool whose declared params become a
/// JSON-Schema-style `parameters` object. Entries that resolve to nothing
/// are dropped silently.
fn transform_tools(raw: Option<&Value>, registry: &dyn ToolRegistry) -> Vec<Value> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let block_type = item.get("type")?.as_str()?;
            let tool_id = registry.tool_for_block_type(block_type)?;
            let spec = registry.tool_by_id(&tool_id)?;

            let mut properties = Map::new();
            let mut required = Vec::new();
            for param in &spec.params {
                let schema_type = if param.param_type == "json" {
                    "object"
                } else {
                    param.param_type.as_str()
                };
                let mut property = Map::new();
                property.insert("type".to_string(), json!(schema_type));
                if let Some(description) = &param.description {
                    property.insert("description".to_string(), json!(description));
                }
                properties.insert(param.id.clone(), Value::Object(property));
                if param.required {
                    required.push(json!(param.id));
                }
            }

            Some(json!({
                "id": spec.id,
                "name": spec.name,
                "description": spec.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }))
        })
        .collect()
}
