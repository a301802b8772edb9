//! # flowrun-core
//!
//! Execution engine for workflows expressed as directed graphs of typed
//! blocks. The executor drives the graph layer by layer: every block that is
//! ready runs concurrently with its layer siblings, router and condition
//! blocks steer the active execution path, and declared loops re-run their
//! member blocks until a feedback branch stops being selected or the
//! iteration cap is hit.
//!
//! External effects (model provider calls, tool invocations, console sinks)
//! are reached through the traits in [`collaborators`]; the engine itself
//! performs no I/O beyond those seams.

pub mod collaborators;
pub mod context;
pub mod error;
pub mod executor;
pub mod expression;
pub mod handlers;
pub mod loops;
pub mod observability;
pub mod output;
pub mod path;
pub mod resolver;
pub mod workflow;

pub use collaborators::{
    Collaborators, ConsoleEvent, ConsoleSink, MemoryConsole, NullConsole, ProviderClient,
    ProviderRequest, ProviderResponse, StaticToolRegistry, TokenUsage, ToolOutcome, ToolParam,
    ToolRegistry, ToolSpec,
};
pub use context::{BlockLog, BlockState, ExecutionContext, ExecutionResult};
pub use error::ExecutorError;
pub use executor::Executor;
pub use output::NormalizedBlockOutput;
pub use workflow::{
    BlockKind, SerializedBlock, SerializedConnection, SerializedLoop, SerializedWorkflow,
};
