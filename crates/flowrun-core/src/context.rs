//! Per-execution state: block states and logs, routing decisions, loop
//! counters, and the active execution path. One [`ExecutionContext`] is
//! created at `execute()` entry and discarded when it returns; the executor
//! is the only writer at any instant.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::NormalizedBlockOutput;
use crate::workflow::{SerializedWorkflow, WorkflowIndex};

/// State of one block within the current execution. Created when the block
/// completes; overwritten if the block re-executes inside a loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockState {
    pub output: NormalizedBlockOutput,
    pub executed: bool,
    pub execution_time_ms: u64,
}

/// One log entry per block execution attempt, successful or not. Appended in
/// completion order when a layer runs concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLog {
    pub block_id: String,
    pub block_name: String,
    pub block_type: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<NormalizedBlockOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Routing decisions captured after router/condition blocks run. An entry is
/// only cleared when the owning block is reset by the loop manager.
#[derive(Debug, Clone, Default)]
pub struct Decisions {
    /// router block id -> chosen target block id
    pub router: HashMap<String, String>,
    /// condition block id -> chosen condition id
    pub condition: HashMap<String, String>,
}

/// Wall-clock bounds of the execution, ISO-8601.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetadata {
    pub start_time: String,
    pub end_time: Option<String>,
}

/// Single-execution scratchpad. Handlers receive a shared reference and must
/// not mutate it; the executor applies all writes after each layer drains.
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub block_states: HashMap<String, BlockState>,
    pub block_logs: Vec<BlockLog>,
    pub metadata: ExecutionMetadata,
    pub environment_variables: HashMap<String, String>,
    pub decisions: Decisions,
    pub loop_iterations: HashMap<String, u32>,
    pub executed_blocks: HashSet<String>,
    pub active_execution_path: HashSet<String>,
    pub workflow: Arc<SerializedWorkflow>,
    pub index: Arc<WorkflowIndex>,
}

impl ExecutionContext {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow: Arc<SerializedWorkflow>,
        environment_variables: HashMap<String, String>,
    ) -> Self {
        let index = Arc::new(WorkflowIndex::build(&workflow));
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::new_v4(),
            block_states: HashMap::new(),
            block_logs: Vec::new(),
            metadata: ExecutionMetadata {
                start_time: chrono::Utc::now().to_rfc3339(),
                end_time: None,
            },
            environment_variables,
            decisions: Decisions::default(),
            loop_iterations: HashMap::new(),
            executed_blocks: HashSet::new(),
            active_execution_path: HashSet::new(),
            workflow,
            index,
        }
    }

    /// Output of an executed block, when present.
    pub fn output_of(&self, block_id: &str) -> Option<&NormalizedBlockOutput> {
        self.block_states.get(block_id).map(|s| &s.output)
    }

    pub fn mark_executed(&mut self, block_id: &str, output: NormalizedBlockOutput, elapsed_ms: u64) {
        self.block_states.insert(
            block_id.to_string(),
            BlockState {
                output,
                executed: true,
                execution_time_ms: elapsed_ms,
            },
        );
        self.executed_blocks.insert(block_id.to_string());
    }
}

/// Final result handed back to the caller. Always returned, never a panic or
/// an unhandled error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: NormalizedBlockOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<BlockLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub start_time: String,
    pub end_time: String,
}
