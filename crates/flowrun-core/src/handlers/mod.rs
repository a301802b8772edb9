//! Block handlers, one per semantic kind. Handlers are probed in a fixed
//! order and the first match wins; the generic handler matches everything
//! and sits last, so every block dispatches somewhere.
//!
//! A handler receives the block, its resolved inputs and a read-only view of
//! the execution context, and returns a raw JSON value the executor then
//! normalizes (see [`crate::output::normalize_output`]).

pub mod agent;
pub mod condition;
pub mod evaluator;
pub mod router;
pub mod tool;

use serde_json::{Map, Value};

use crate::collaborators::Collaborators;
use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::workflow::{BlockKind, SerializedBlock};

/// Handler kinds in probe order. Generic is the fallback and must stay last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Agent,
    Router,
    Condition,
    Evaluator,
    Api,
    Function,
    Generic,
}

pub const HANDLER_ORDER: [HandlerKind; 7] = [
    HandlerKind::Agent,
    HandlerKind::Router,
    HandlerKind::Condition,
    HandlerKind::Evaluator,
    HandlerKind::Api,
    HandlerKind::Function,
    HandlerKind::Generic,
];

impl HandlerKind {
    pub fn can_handle(self, block: &SerializedBlock) -> bool {
        match self {
            HandlerKind::Agent => block.kind() == BlockKind::Agent,
            HandlerKind::Router => block.kind() == BlockKind::Router,
            HandlerKind::Condition => block.kind() == BlockKind::Condition,
            HandlerKind::Evaluator => block.kind() == BlockKind::Evaluator,
            HandlerKind::Api => block.kind() == BlockKind::Api,
            HandlerKind::Function => block.kind() == BlockKind::Function,
            HandlerKind::Generic => true,
        }
    }
}

/// First handler in probe order that accepts the block.
pub fn handler_for(block: &SerializedBlock) -> Result<HandlerKind, ExecutorError> {
    HANDLER_ORDER
        .iter()
        .copied()
        .find(|kind| kind.can_handle(block))
        .ok_or_else(|| ExecutorError::NoHandlerForBlock(block.id.clone()))
}

/// Run one block through its handler.
pub async fn dispatch(
    kind: HandlerKind,
    block: &SerializedBlock,
    inputs: &Map<String, Value>,
    ctx: &ExecutionContext,
    collaborators: &Collaborators,
) -> Result<Value, ExecutorError> {
    match kind {
        HandlerKind::Agent => agent::execute(block, inputs, collaborators).await,
        HandlerKind::Router => router::execute(block, inputs, ctx, collaborators).await,
        HandlerKind::Condition => condition::execute(block, inputs, ctx),
        HandlerKind::Evaluator => evaluator::execute(block, inputs, collaborators).await,
        HandlerKind::Api | HandlerKind::Function | HandlerKind::Generic => {
            tool::execute(block, inputs, collaborators).await
        }
    }
}
