use thiserror::Error;

/// Execution error taxonomy. Every error raised by the resolver, a handler,
/// or the executor itself is fatal to the workflow run: the executor
/// finalizes the failing block's log and returns an unsuccessful
/// [`crate::context::ExecutionResult`] instead of propagating a panic.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("invalid workflow: {0}")]
    WorkflowInvalid(String),
    #[error("disabled block cannot be executed: {0}")]
    DisabledBlockExecuted(String),
    #[error("reference to disabled block: {0}")]
    DisabledDependency(String),
    #[error("referenced block not found: {0}")]
    ReferenceNotFound(String),
    #[error("invalid reference path \"{path}\" into block {block}")]
    InvalidReferencePath { block: String, path: String },
    #[error("unresolved reference to block {0} (no output available)")]
    UnresolvedReference(String),
    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("no handler for block: {0}")]
    NoHandlerForBlock(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool execution failed: {0}")]
    ToolExecutionFailed(String),
    #[error("invalid response format: {0}")]
    InvalidResponseFormat(String),
    #[error("invalid routing decision: {0}")]
    InvalidRoutingDecision(String),
    #[error("no condition path selected for block {0}")]
    NoConditionPath(String),
    #[error("condition evaluation error: {0}")]
    ConditionEvaluationError(String),
    #[error("condition block {0} has no executed source")]
    MissingConditionSource(String),
    #[error("Timeout")]
    Timeout,
    #[error("provider error: {0}")]
    Provider(String),
}

impl ExecutorError {
    /// Stable machine-readable kind for log payloads and console events.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::WorkflowInvalid(_) => "WorkflowInvalid",
            ExecutorError::DisabledBlockExecuted(_) => "DisabledBlockExecuted",
            ExecutorError::DisabledDependency(_) => "DisabledDependency",
            ExecutorError::ReferenceNotFound(_) => "ReferenceNotFound",
            ExecutorError::InvalidReferencePath { .. } => "InvalidReferencePath",
            ExecutorError::UnresolvedReference(_) => "UnresolvedReference",
            ExecutorError::EnvVarNotFound(_) => "EnvVarNotFound",
            ExecutorError::NoHandlerForBlock(_) => "NoHandlerForBlock",
            ExecutorError::ToolNotFound(_) => "ToolNotFound",
            ExecutorError::ToolExecutionFailed(_) => "ToolExecutionFailed",
            ExecutorError::InvalidResponseFormat(_) => "InvalidResponseFormat",
            ExecutorError::InvalidRoutingDecision(_) => "InvalidRoutingDecision",
            ExecutorError::NoConditionPath(_) => "NoConditionPath",
            ExecutorError::ConditionEvaluationError(_) => "ConditionEvaluationError",
            ExecutorError::MissingConditionSource(_) => "MissingConditionSource",
            ExecutorError::Timeout => "Timeout",
            ExecutorError::Provider(_) => "Provider",
        }
    }
}
