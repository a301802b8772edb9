//! Serialized workflow model: blocks, connections, loops, and the
//! pre-execution validation the executor runs before any block starts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExecutorError;

/// Semantic kind of a block, parsed from `metadata.id`. Unknown kinds fall
/// through to the generic handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Starter,
    Router,
    Condition,
    Agent,
    Evaluator,
    Api,
    Function,
    Other(String),
}

impl BlockKind {
    pub fn from_type_id(type_id: &str) -> Self {
        match type_id {
            "starter" => BlockKind::Starter,
            "router" => BlockKind::Router,
            "condition" => BlockKind::Condition,
            "agent" => BlockKind::Agent,
            "evaluator" => BlockKind::Evaluator,
            "api" => BlockKind::Api,
            "function" => BlockKind::Function,
            other => BlockKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BlockKind::Starter => "starter",
            BlockKind::Router => "router",
            BlockKind::Condition => "condition",
            BlockKind::Agent => "agent",
            BlockKind::Evaluator => "evaluator",
            BlockKind::Api => "api",
            BlockKind::Function => "function",
            BlockKind::Other(s) => s,
        }
    }
}

/// Block metadata: semantic kind (`id`) and optional display name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Block configuration: raw parameter map plus an optional tool identifier
/// consumed by the api/function/generic handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockConfigSection {
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub tool: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedBlock {
    pub id: String,
    #[serde(default)]
    pub metadata: BlockMetadata,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: BlockConfigSection,
}

impl SerializedBlock {
    pub fn kind(&self) -> BlockKind {
        BlockKind::from_type_id(&self.metadata.id)
    }

    /// Display name falling back to the block id.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or(&self.id)
    }
}

/// A directed edge. Condition blocks annotate their outgoing edges with
/// `sourceHandle = "condition-<conditionId>"`; any other handle value is
/// treated as a plain edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedConnection {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
}

impl SerializedConnection {
    /// The condition id encoded in a `condition-<id>` source handle.
    pub fn condition_handle(&self) -> Option<&str> {
        self.source_handle
            .as_deref()
            .and_then(|h| h.strip_prefix("condition-"))
    }
}

fn default_max_iterations() -> u32 {
    5
}

/// A declared feedback loop over an ordered set of block ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedLoop {
    pub id: String,
    pub nodes: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

/// The full workflow definition handed to the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedWorkflow {
    pub blocks: Vec<SerializedBlock>,
    #[serde(default)]
    pub connections: Vec<SerializedConnection>,
    #[serde(default)]
    pub loops: HashMap<String, SerializedLoop>,
}

impl SerializedWorkflow {
    pub fn block(&self, id: &str) -> Option<&SerializedBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Connections targeting `id`.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &SerializedConnection> {
        self.connections.iter().filter(move |c| c.target == id)
    }

    /// Connections originating from `id`.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &SerializedConnection> {
        self.connections.iter().filter(move |c| c.source == id)
    }

    /// Whether `id` is a member of any declared loop.
    pub fn in_loop(&self, id: &str) -> bool {
        self.loops.values().any(|l| l.nodes.iter().any(|n| n == id))
    }

    /// The single enabled starter block, when the workflow is valid.
    pub fn starter(&self) -> Option<&SerializedBlock> {
        self.blocks
            .iter()
            .find(|b| b.enabled && b.kind() == BlockKind::Starter)
    }
}

/// Lowercase a block name and strip all whitespace, producing the form used
/// as a reference head in `<name.path>` expressions.
pub fn normalize_block_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Pre-built id and normalized-name lookup for O(1) reference resolution.
#[derive(Debug, Default)]
pub struct WorkflowIndex {
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl WorkflowIndex {
    pub fn build(workflow: &SerializedWorkflow) -> Self {
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();
        for (pos, block) in workflow.blocks.iter().enumerate() {
            by_id.insert(block.id.clone(), pos);
            if let Some(name) = &block.metadata.name {
                by_name.insert(normalize_block_name(name), pos);
            }
        }
        Self { by_id, by_name }
    }

    /// Resolve a reference head: block id first, then normalized name.
    pub fn resolve<'w>(
        &self,
        workflow: &'w SerializedWorkflow,
        head: &str,
    ) -> Option<&'w SerializedBlock> {
        self.by_id
            .get(head)
            .or_else(|| self.by_name.get(&normalize_block_name(head)))
            .and_then(|pos| workflow.blocks.get(*pos))
    }
}

/// Validate the workflow before execution. All failures surface as
/// [`ExecutorError::WorkflowInvalid`] and no block runs.
pub fn validate_workflow(workflow: &SerializedWorkflow) -> Result<(), ExecutorError> {
    let starters: Vec<&SerializedBlock> = workflow
        .blocks
        .iter()
        .filter(|b| b.enabled && b.kind() == BlockKind::Starter)
        .collect();
    if starters.len() != 1 {
        return Err(ExecutorError::WorkflowInvalid(format!(
            "workflow must contain exactly one enabled starter block, found {}",
            starters.len()
        )));
    }
    let starter = starters[0];
    if workflow.incoming(&starter.id).next().is_some() {
        return Err(ExecutorError::WorkflowInvalid(format!(
            "starter block {} must not have incoming connections",
            starter.id
        )));
    }
    if workflow.outgoing(&starter.id).next().is_none() {
        return Err(ExecutorError::WorkflowInvalid(format!(
            "starter block {} must have at least one outgoing connection",
            starter.id
        )));
    }

    for conn in &workflow.connections {
        for endpoint in [&conn.source, &conn.target] {
            if workflow.block(endpoint).is_none() {
                return Err(ExecutorError::WorkflowInvalid(format!(
                    "connection references unknown block: {endpoint}"
                )));
            }
        }
    }

    for lp in workflow.loops.values() {
        if lp.nodes.len() < 2 {
            return Err(ExecutorError::WorkflowInvalid(format!(
                "loop {} must contain at least two nodes",
                lp.id
            )));
        }
        if lp.max_iterations == 0 {
            return Err(ExecutorError::WorkflowInvalid(format!(
                "loop {} must have a positive iteration cap",
                lp.id
            )));
        }
        for node in &lp.nodes {
            if workflow.block(node).is_none() {
                return Err(ExecutorError::WorkflowInvalid(format!(
                    "loop {} references unknown block: {node}",
                    lp.id
                )));
            }
        }
    }

    Ok(())
}
