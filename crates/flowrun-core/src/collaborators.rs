//! External collaborator seams. The engine reaches every outside effect
//! through these traits: model provider calls ([`ProviderClient`]), tool
//! lookup and execution ([`ToolRegistry`]), and the fire-and-forget console
//! sink ([`ConsoleSink`]). In-memory implementations ship for embedding and
//! tests.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ExecutorError;
use crate::output::NormalizedBlockOutput;

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

/// Payload for one provider call.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    /// Provider implementation to route to; the collaborator picks its
    /// default when unset.
    pub provider: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    /// User-facing message content.
    pub context: Option<String>,
    pub tools: Vec<Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub api_key: Option<String>,
    pub response_format: Option<Value>,
}

/// Provider reply consumed by the agent, router and evaluator handlers.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub tokens: Option<TokenUsage>,
    pub tool_calls: Vec<Value>,
}

/// Language-model provider seam.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn request(&self, request: ProviderRequest) -> Result<ProviderResponse, ExecutorError>;
}

/// Declared parameter of a tool, used to build JSON-Schema-style parameter
/// objects for agent tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub id: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Tool metadata resolved from a tool id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Vec<ToolParam>,
}

/// Outcome of a tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Tool lookup and execution seam.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Map a block type (e.g. a tool-bearing block's `metadata.id`) to the
    /// tool id it contributes to agent tool calls.
    fn tool_for_block_type(&self, block_type: &str) -> Option<String>;

    fn tool_by_id(&self, tool_id: &str) -> Option<ToolSpec>;

    async fn execute(
        &self,
        tool_id: &str,
        inputs: Map<String, Value>,
    ) -> Result<ToolOutcome, ExecutorError>;
}

/// Console event emitted for every block that starts, mirroring the block
/// log plus execution identifiers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEvent {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub block_id: String,
    pub block_name: String,
    pub block_type: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<NormalizedBlockOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fire-and-forget console sink.
pub trait ConsoleSink: Send + Sync {
    fn log(&self, event: ConsoleEvent);
}

/// Sink that drops every event. Useful when the embedder has no console.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn log(&self, _event: ConsoleEvent) {}
}

/// In-memory console capturing events in arrival order.
#[derive(Default)]
pub struct MemoryConsole {
    events: std::sync::Mutex<Vec<ConsoleEvent>>,
}

impl MemoryConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ConsoleEvent> {
        self.events.lock().expect("console lock").clone()
    }
}

impl ConsoleSink for MemoryConsole {
    fn log(&self, event: ConsoleEvent) {
        self.events.lock().expect("console lock").push(event);
    }
}

/// Runner closure invoked when a registered tool executes.
pub type ToolRunner = Box<dyn Fn(Map<String, Value>) -> ToolOutcome + Send + Sync>;

/// Registry holding tool specs, block-type mappings and runner closures in
/// shared maps so concurrent layer executions can resolve tools without
/// additional locking.
#[derive(Default)]
pub struct StaticToolRegistry {
    specs: DashMap<String, ToolSpec>,
    block_types: DashMap<String, String>,
    runners: DashMap<String, Arc<ToolRunner>>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool spec together with its runner.
    pub fn register(
        &self,
        spec: ToolSpec,
        runner: impl Fn(Map<String, Value>) -> ToolOutcome + Send + Sync + 'static,
    ) {
        let runner: ToolRunner = Box::new(runner);
        self.runners.insert(spec.id.clone(), Arc::new(runner));
        self.specs.insert(spec.id.clone(), spec);
    }

    /// Map a block type to a registered tool id for agent tool transforms.
    pub fn map_block_type(&self, block_type: impl Into<String>, tool_id: impl Into<String>) {
        self.block_types.insert(block_type.into(), tool_id.into());
    }
}

#[async_trait]
impl ToolRegistry for StaticToolRegistry {
    fn tool_for_block_type(&self, block_type: &str) -> Option<String> {
        self.block_types.get(block_type).map(|t| t.clone())
    }

    fn tool_by_id(&self, tool_id: &str) -> Option<ToolSpec> {
        self.specs.get(tool_id).map(|s| s.clone())
    }

    async fn execute(
        &self,
        tool_id: &str,
        inputs: Map<String, Value>,
    ) -> Result<ToolOutcome, ExecutorError> {
        let runner = self
            .runners
            .get(tool_id)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| ExecutorError::ToolNotFound(tool_id.to_string()))?;
        Ok((*runner)(inputs))
    }
}

/// Everything a block handler can reach beyond the execution context.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn ProviderClient>,
    pub tools: Arc<dyn ToolRegistry>,
    pub console: Arc<dyn ConsoleSink>,
}
