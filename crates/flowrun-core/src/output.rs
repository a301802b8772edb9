//! Normalized block outputs. Every handler result is coerced into a shape
//! with a required `response` mapping before it is stored in the execution
//! context, so the input resolver can walk `<block.response.path>`
//! references over a single schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::workflow::BlockKind;

/// Output of one block execution: the `response` mapping plus an extension
/// bag of any extra top-level keys the handler produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBlockOutput {
    pub response: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NormalizedBlockOutput {
    pub fn from_response(response: Map<String, Value>) -> Self {
        Self {
            response,
            extra: Map::new(),
        }
    }

    /// The full output as a JSON value (`{"response": …, …extra}`), the form
    /// reference walks operate on.
    pub fn as_value(&self) -> Value {
        let mut root = Map::new();
        root.insert("response".to_string(), Value::Object(self.response.clone()));
        for (k, v) in &self.extra {
            root.insert(k.clone(), v.clone());
        }
        Value::Object(root)
    }

    /// Walk a dotted path (e.g. `["response", "result"]`) into the output.
    pub fn walk(&self, parts: &[&str]) -> Option<Value> {
        let mut current = self.as_value();
        for part in parts {
            current = current.get(part)?.clone();
        }
        Some(current)
    }
}

/// The starter block's pre-seeded output.
pub fn starter_output() -> NormalizedBlockOutput {
    let mut response = Map::new();
    response.insert("result".to_string(), Value::Bool(true));
    NormalizedBlockOutput::from_response(response)
}

fn take_keys(source: &mut Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    let mut picked = Map::new();
    for key in keys {
        if let Some(value) = source.remove(*key) {
            picked.insert((*key).to_string(), value);
        }
    }
    picked
}

/// Coerce a raw handler value into a [`NormalizedBlockOutput`].
///
/// A raw object that already carries an object-valued `response` key passes
/// through (extra top-level keys are preserved in the extension bag). Any
/// other value is wrapped according to the block kind's well-known response
/// fields; unknown kinds wrap as `{response: {result: raw}}`.
pub fn normalize_output(kind: &BlockKind, raw: Value) -> NormalizedBlockOutput {
    if let Value::Object(map) = &raw
        && map.get("response").is_some_and(Value::is_object)
    {
        let mut map = map.clone();
        let response = match map.remove("response") {
            Some(Value::Object(r)) => r,
            _ => Map::new(),
        };
        return NormalizedBlockOutput {
            response,
            extra: map,
        };
    }

    let response = match (kind, raw) {
        (BlockKind::Agent, Value::Object(mut map)) => {
            take_keys(&mut map, &["content", "model", "tokens", "toolCalls"])
        }
        (BlockKind::Agent, other) => json_map(&[("content", other)]),
        (BlockKind::Router, Value::Object(mut map)) => {
            take_keys(&mut map, &["selectedPath", "content", "model", "tokens"])
        }
        (BlockKind::Condition, Value::Object(mut map)) => take_keys(
            &mut map,
            &["selectedConditionId", "selectedPath", "conditionResult", "content"],
        ),
        (BlockKind::Function, Value::Object(mut map)) => {
            take_keys(&mut map, &["result", "stdout", "executionTime"])
        }
        (BlockKind::Api, Value::Object(mut map)) => {
            take_keys(&mut map, &["data", "status", "headers"])
        }
        // Evaluator responses keep every key the handler produced (metric
        // names are already lowercased by the handler).
        (BlockKind::Evaluator, Value::Object(map)) => map,
        (_, other) => json_map(&[("result", other)]),
    };
    NormalizedBlockOutput::from_response(response)
}

fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
