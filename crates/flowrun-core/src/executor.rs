//! The executor drives a workflow to completion. Each main-loop iteration
//! computes the set of ready blocks (one layer), runs the whole layer
//! concurrently, folds the results into the execution context, updates the
//! active path from any routing decisions, and asks the loop manager whether
//! a feedback cycle should re-run. The loop ends when no blocks are ready, a
//! loop reaches its iteration cap, the optional deadline expires, or a block
//! fails.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::collaborators::{Collaborators, ConsoleEvent, ConsoleSink, ProviderClient, ToolRegistry};
use crate::context::{BlockLog, BlockState, ExecutionContext, ExecutionResult, ResultMetadata};
use crate::error::ExecutorError;
use crate::handlers;
use crate::loops;
use crate::output::{self, NormalizedBlockOutput};
use crate::path;
use crate::resolver;
use crate::workflow::{BlockKind, SerializedBlock, SerializedConnection, SerializedWorkflow, validate_workflow};

/// Hard ceiling on main-loop iterations. Reaching it is treated as terminal
/// success: no further layers could be produced.
const MAX_LAYER_ITERATIONS: u32 = 100;

/// Workflow executor. Construct with the collaborator seams, optionally add
/// initial block states, environment variables and a deadline, then call
/// [`Executor::execute`].
pub struct Executor {
    workflow: Arc<SerializedWorkflow>,
    collaborators: Collaborators,
    initial_states: HashMap<String, BlockState>,
    environment: HashMap<String, String>,
    deadline: Option<Duration>,
}

impl Executor {
    pub fn new(
        workflow: SerializedWorkflow,
        provider: Arc<dyn ProviderClient>,
        tools: Arc<dyn ToolRegistry>,
        console: Arc<dyn ConsoleSink>,
    ) -> Self {
        Self {
            workflow: Arc::new(workflow),
            collaborators: Collaborators {
                provider,
                tools,
                console,
            },
            initial_states: HashMap::new(),
            environment: HashMap::new(),
            deadline: None,
        }
    }

    /// Pre-populate block states, e.g. outputs carried over from an earlier
    /// partial execution.
    pub fn with_initial_states(mut self, states: HashMap<String, BlockState>) -> Self {
        self.initial_states = states;
        self
    }

    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Stop launching new layers once this much wall-clock time has passed;
    /// the in-flight layer drains and the run fails with `Timeout`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run the workflow. Always returns an [`ExecutionResult`]; failures are
    /// reported through `success` and `error`, never as a panic.
    pub async fn execute(&self, workflow_id: impl Into<String>) -> ExecutionResult {
        let clock = Instant::now();
        let mut ctx = ExecutionContext::new(
            workflow_id,
            self.workflow.clone(),
            self.environment.clone(),
        );
        let start_time = ctx.metadata.start_time.clone();
        info!(workflow = %ctx.workflow_id, execution = %ctx.execution_id, "execution started");

        let mut final_output = NormalizedBlockOutput::default();
        let outcome = match validate_workflow(&self.workflow) {
            Ok(()) => {
                self.seed_context(&mut ctx);
                self.run_layers(&mut ctx, &mut final_output, clock).await
            }
            Err(e) => Err(e),
        };

        let end_time = chrono::Utc::now().to_rfc3339();
        ctx.metadata.end_time = Some(end_time.clone());
        let metadata = Some(ResultMetadata {
            duration_ms: clock.elapsed().as_millis() as u64,
            start_time,
            end_time,
        });
        match outcome {
            Ok(()) => {
                info!(workflow = %ctx.workflow_id, "execution completed");
                ExecutionResult {
                    success: true,
                    output: final_output,
                    error: None,
                    logs: ctx.block_logs,
                    metadata,
                }
            }
            Err(e) => {
                warn!(workflow = %ctx.workflow_id, error = %e, "execution failed");
                ExecutionResult {
                    success: false,
                    output: final_output,
                    error: Some(e.to_string()),
                    logs: ctx.block_logs,
                    metadata,
                }
            }
        }
    }

    /// Blocking convenience wrapper for synchronous callers.
    pub fn execute_blocking(&self, workflow_id: impl Into<String>) -> ExecutionResult {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");
        rt.block_on(self.execute(workflow_id))
    }

    /// Initial context: caller-supplied states, the starter pre-marked
    /// executed, and the starter's successors seeded into the active path.
    fn seed_context(&self, ctx: &mut ExecutionContext) {
        for (id, state) in &self.initial_states {
            ctx.block_states.insert(id.clone(), state.clone());
        }
        if let Some(starter) = self.workflow.starter() {
            let starter_id = starter.id.clone();
            ctx.mark_executed(&starter_id, output::starter_output(), 0);
            ctx.active_execution_path.insert(starter_id.clone());
            let successors: Vec<String> = self
                .workflow
                .outgoing(&starter_id)
                .map(|c| c.target.clone())
                .collect();
            for target in successors {
                ctx.active_execution_path.insert(target);
            }
        }
    }

    async fn run_layers(
        &self,
        ctx: &mut ExecutionContext,
        final_output: &mut NormalizedBlockOutput,
        clock: Instant,
    ) -> Result<(), ExecutorError> {
        for iteration in 0..MAX_LAYER_ITERATIONS {
            if let Some(deadline) = self.deadline
                && clock.elapsed() >= deadline
            {
                return Err(ExecutorError::Timeout);
            }
            let layer = ready_blocks(ctx);
            if layer.is_empty() {
                debug!(iteration, "no ready blocks, finishing");
                return Ok(());
            }
            debug!(iteration, size = layer.len(), "executing layer");

            let outcomes = self.execute_layer(&layer, ctx).await;
            apply_layer(ctx, outcomes, final_output, &self.collaborators)?;
            path::update_execution_paths(&layer, ctx);
            if loops::process_loop_iterations(ctx) {
                debug!(iteration, "loop iteration cap reached, finishing");
                return Ok(());
            }
        }
        warn!("main-loop iteration ceiling reached");
        Ok(())
    }

    /// Run every block of the layer concurrently, collecting outcomes in
    /// completion order.
    async fn execute_layer(&self, layer: &[String], ctx: &ExecutionContext) -> Vec<LayerOutcome> {
        let mut running = FuturesUnordered::new();
        for block_id in layer {
            if let Some(block) = ctx.workflow.block(block_id) {
                running.push(execute_block(block, ctx, &self.collaborators));
            }
        }
        let mut outcomes = Vec::with_capacity(layer.len());
        while let Some(outcome) = running.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

struct LayerOutcome {
    block_id: String,
    block_name: String,
    block_type: String,
    started_at: String,
    ended_at: String,
    duration_ms: u64,
    result: Result<NormalizedBlockOutput, ExecutorError>,
}

async fn execute_block(
    block: &SerializedBlock,
    ctx: &ExecutionContext,
    collaborators: &Collaborators,
) -> LayerOutcome {
    let started_at = chrono::Utc::now().to_rfc3339();
    let clock = Instant::now();
    let result = run_block(block, ctx, collaborators).await;
    LayerOutcome {
        block_id: block.id.clone(),
        block_name: block.name().to_string(),
        block_type: block.kind().as_str().to_string(),
        started_at,
        ended_at: chrono::Utc::now().to_rfc3339(),
        duration_ms: clock.elapsed().as_millis() as u64,
        result,
    }
}

async fn run_block(
    block: &SerializedBlock,
    ctx: &ExecutionContext,
    collaborators: &Collaborators,
) -> Result<NormalizedBlockOutput, ExecutorError> {
    if !block.enabled {
        return Err(ExecutorError::DisabledBlockExecuted(block.id.clone()));
    }
    let inputs = resolver::resolve_inputs(block, ctx)?;
    let kind = handlers::handler_for(block)?;
    let raw = handlers::dispatch(kind, block, &inputs, ctx, collaborators).await?;
    Ok(output::normalize_output(&block.kind(), raw))
}

/// Fold a drained layer into the context: append logs in completion order,
/// emit console events, store successful states, and surface the first
/// failure (fatal to the run).
fn apply_layer(
    ctx: &mut ExecutionContext,
    outcomes: Vec<LayerOutcome>,
    final_output: &mut NormalizedBlockOutput,
    collaborators: &Collaborators,
) -> Result<(), ExecutorError> {
    let mut first_error = None;
    for outcome in outcomes {
        let log = BlockLog {
            block_id: outcome.block_id.clone(),
            block_name: outcome.block_name,
            block_type: outcome.block_type,
            started_at: outcome.started_at,
            ended_at: outcome.ended_at,
            duration_ms: outcome.duration_ms,
            success: outcome.result.is_ok(),
            output: outcome.result.as_ref().ok().cloned(),
            error: outcome.result.as_ref().err().map(|e| e.to_string()),
        };
        collaborators.console.log(console_event(ctx, &log));
        ctx.block_logs.push(log);

        match outcome.result {
            Ok(block_output) => {
                info!(block = %outcome.block_id, ms = outcome.duration_ms, "block completed");
                *final_output = block_output.clone();
                ctx.mark_executed(&outcome.block_id, block_output, outcome.duration_ms);
            }
            Err(e) => {
                warn!(block = %outcome.block_id, error = %e, "block failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn console_event(ctx: &ExecutionContext, log: &BlockLog) -> ConsoleEvent {
    ConsoleEvent {
        workflow_id: ctx.workflow_id.clone(),
        execution_id: ctx.execution_id,
        block_id: log.block_id.clone(),
        block_name: log.block_name.clone(),
        block_type: log.block_type.clone(),
        started_at: log.started_at.clone(),
        ended_at: log.ended_at.clone(),
        duration_ms: log.duration_ms,
        success: log.success,
        timestamp: chrono::Utc::now().to_rfc3339(),
        output: log.output.clone(),
        error: log.error.clone(),
    }
}

/// The next layer: enabled, unexecuted, active-path blocks whose
/// dependencies are satisfied. Loop members relax the dependency rule to
/// "some predecessor has executed" so feedback edges do not deadlock the
/// first pass.
fn ready_blocks(ctx: &ExecutionContext) -> Vec<String> {
    ctx.workflow
        .blocks
        .iter()
        .filter(|block| {
            block.enabled
                && !ctx.executed_blocks.contains(&block.id)
                && ctx.active_execution_path.contains(&block.id)
                && dependencies_met(block, ctx)
        })
        .map(|block| block.id.clone())
        .collect()
}

fn dependencies_met(block: &SerializedBlock, ctx: &ExecutionContext) -> bool {
    if ctx.workflow.in_loop(&block.id) {
        return ctx
            .workflow
            .incoming(&block.id)
            .any(|c| ctx.executed_blocks.contains(&c.source));
    }
    ctx.workflow
        .incoming(&block.id)
        .all(|conn| dependency_met(conn, &block.id, ctx))
}

/// One incoming connection is satisfied when its source has run and the
/// edge matches the recorded decision, or when the dependency can be
/// ignored: the source was decided against, or pruned off the active path.
fn dependency_met(conn: &SerializedConnection, target: &str, ctx: &ExecutionContext) -> bool {
    let Some(source) = ctx.workflow.block(&conn.source) else {
        return false;
    };
    if !ctx.active_execution_path.contains(&source.id) {
        return true;
    }
    match source.kind() {
        BlockKind::Router => match ctx.decisions.router.get(&source.id) {
            Some(selected) if selected != target => true,
            Some(_) => ctx.executed_blocks.contains(&source.id),
            None => false,
        },
        BlockKind::Condition => {
            match (conn.condition_handle(), ctx.decisions.condition.get(&source.id)) {
                (Some(handle_id), Some(selected)) if handle_id != *selected => true,
                (Some(_), Some(_)) | (None, _) => ctx.executed_blocks.contains(&source.id),
                (Some(_), None) => false,
            }
        }
        _ => ctx.executed_blocks.contains(&source.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Map, Value, json};

    use crate::collaborators::{
        MemoryConsole, ProviderRequest, ProviderResponse, StaticToolRegistry, TokenUsage,
        ToolOutcome, ToolSpec,
    };
    use crate::workflow::{BlockConfigSection, BlockMetadata, SerializedLoop};

    /// Provider replaying a fixed reply, counting calls.
    struct MockProvider {
        content: String,
        tokens: Option<TokenUsage>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(content: &str) -> Arc<Self> {
            Arc::new(Self {
                content: content.to_string(),
                tokens: Some(TokenUsage {
                    prompt: 1,
                    completion: 2,
                    total: 3,
                }),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ProviderClient for MockProvider {
        async fn request(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderResponse {
                content: self.content.clone(),
                model: "m".to_string(),
                tokens: self.tokens,
                tool_calls: Vec::new(),
            })
        }
    }

    fn block(id: &str, kind: &str) -> SerializedBlock {
        SerializedBlock {
            id: id.to_string(),
            metadata: BlockMetadata {
                id: kind.to_string(),
                name: None,
            },
            enabled: true,
            config: BlockConfigSection::default(),
        }
    }

    fn tool_block(id: &str, kind: &str, tool: &str) -> SerializedBlock {
        let mut b = block(id, kind);
        b.config.tool = Some(tool.to_string());
        b
    }

    fn conn(source: &str, target: &str) -> SerializedConnection {
        SerializedConnection {
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
        }
    }

    fn cond_conn(source: &str, target: &str, condition_id: &str) -> SerializedConnection {
        SerializedConnection {
            source: source.to_string(),
            target: target.to_string(),
            source_handle: Some(format!("condition-{condition_id}")),
        }
    }

    fn simple_tool(registry: &StaticToolRegistry, id: &str, output: Value) {
        registry.register(
            ToolSpec {
                id: id.to_string(),
                name: id.to_string(),
                description: None,
                params: Vec::new(),
            },
            move |_| ToolOutcome {
                success: true,
                output: Some(output.clone()),
                error: None,
            },
        );
    }

    /// Tool that records the inputs it received.
    fn capturing_tool(
        registry: &StaticToolRegistry,
        id: &str,
    ) -> Arc<Mutex<Vec<Map<String, Value>>>> {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        registry.register(
            ToolSpec {
                id: id.to_string(),
                name: id.to_string(),
                description: None,
                params: Vec::new(),
            },
            move |inputs| {
                sink.lock().unwrap().push(inputs);
                ToolOutcome {
                    success: true,
                    output: Some(json!({"result": "done"})),
                    error: None,
                }
            },
        );
        captured
    }

    fn executor(
        workflow: SerializedWorkflow,
        provider: Arc<MockProvider>,
        registry: StaticToolRegistry,
    ) -> (Executor, Arc<MemoryConsole>) {
        let console = MemoryConsole::new();
        let exec = Executor::new(workflow, provider, Arc::new(registry), console.clone());
        (exec, console)
    }

    fn log_ids(result: &ExecutionResult) -> Vec<&str> {
        result.logs.iter().map(|l| l.block_id.as_str()).collect()
    }

    // Scenario: linear starter -> agent -> function chain.
    #[tokio::test]
    async fn linear_chain_returns_sink_output() {
        let mut b = tool_block("b", "function", "fn_run");
        b.config.params.insert("note".to_string(), json!("prefix-{{K}}-suffix"));
        let workflow = SerializedWorkflow {
            blocks: vec![block("start", "starter"), block("a", "agent"), b],
            connections: vec![conn("start", "a"), conn("a", "b")],
            loops: HashMap::new(),
        };
        let registry = StaticToolRegistry::new();
        let captured = capturing_tool(&registry, "fn_run");
        let (exec, console) = executor(workflow, MockProvider::new("hi"), registry);
        let exec = exec.with_environment(HashMap::from([("K".to_string(), "v".to_string())]));

        let result = exec.execute("wf-linear").await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.output.response.get("result"), Some(&json!("done")));
        // starter is not logged
        assert_eq!(log_ids(&result), vec!["a", "b"]);
        assert!(result.logs.iter().all(|l| l.success));
        assert_eq!(
            captured.lock().unwrap()[0].get("note"),
            Some(&json!("prefix-v-suffix"))
        );
        assert_eq!(console.events().len(), 2);
        assert!(result.metadata.is_some());
    }

    // Scenario: router picks one of two branches; the other never runs.
    #[tokio::test]
    async fn router_selects_single_branch() {
        let workflow = SerializedWorkflow {
            blocks: vec![
                block("start", "starter"),
                block("r", "router"),
                tool_block("x", "function", "x_tool"),
                tool_block("y", "function", "y_tool"),
            ],
            connections: vec![conn("start", "r"), conn("r", "x"), conn("r", "y")],
            loops: HashMap::new(),
        };
        let registry = StaticToolRegistry::new();
        simple_tool(&registry, "x_tool", json!({"result": "x-ran"}));
        simple_tool(&registry, "y_tool", json!({"result": "y-ran"}));
        let (exec, _) = executor(workflow, MockProvider::new("y"), registry);

        let result = exec.execute("wf-router").await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(log_ids(&result), vec!["r", "y"]);
        assert_eq!(result.output.response.get("result"), Some(&json!("y-ran")));
        let router_log = &result.logs[0];
        assert_eq!(
            router_log
                .output
                .as_ref()
                .unwrap()
                .walk(&["response", "selectedPath", "blockId"]),
            Some(json!("y"))
        );
    }

    // Router decisions are deterministic with a deterministic provider.
    #[tokio::test]
    async fn router_decision_is_idempotent_across_runs() {
        let build = || {
            let workflow = SerializedWorkflow {
                blocks: vec![
                    block("start", "starter"),
                    block("r", "router"),
                    tool_block("x", "function", "x_tool"),
                    tool_block("y", "function", "y_tool"),
                ],
                connections: vec![conn("start", "r"), conn("r", "x"), conn("r", "y")],
                loops: HashMap::new(),
            };
            let registry = StaticToolRegistry::new();
            simple_tool(&registry, "x_tool", json!({"result": "x-ran"}));
            simple_tool(&registry, "y_tool", json!({"result": "y-ran"}));
            executor(workflow, MockProvider::new("y"), registry).0
        };
        let first = build().execute("wf").await;
        let second = build().execute("wf").await;
        assert_eq!(log_ids(&first), log_ids(&second));
        assert_eq!(first.output, second.output);
    }

    // Scenario: condition if/else falls to the else branch.
    #[tokio::test]
    async fn condition_if_else_takes_else_branch() {
        let mut a = block("a", "agent");
        a.config
            .params
            .insert("responseFormat".to_string(), json!({"type": "object"}));
        let mut c = block("c", "condition");
        c.config.params.insert(
            "conditions".to_string(),
            json!([
                {"id": "i1", "title": "if", "value": "a.response.n > 0"},
                {"id": "i2", "title": "else", "value": "true"}
            ]),
        );
        let workflow = SerializedWorkflow {
            blocks: vec![
                block("start", "starter"),
                a,
                c,
                tool_block("p", "function", "p_tool"),
                tool_block("q", "function", "q_tool"),
            ],
            connections: vec![
                conn("start", "a"),
                conn("a", "c"),
                cond_conn("c", "p", "i1"),
                cond_conn("c", "q", "i2"),
            ],
            loops: HashMap::new(),
        };
        let registry = StaticToolRegistry::new();
        simple_tool(&registry, "p_tool", json!({"result": "p-ran"}));
        simple_tool(&registry, "q_tool", json!({"result": "q-ran"}));
        // structured agent reply: response becomes {n: -1}
        let (exec, _) = executor(workflow, MockProvider::new("{\"n\": -1}"), registry);

        let result = exec.execute("wf-condition").await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(log_ids(&result), vec!["a", "c", "q"]);
        let condition_log = &result.logs[1];
        assert_eq!(
            condition_log
                .output
                .as_ref()
                .unwrap()
                .walk(&["response", "selectedConditionId"]),
            Some(json!("i2"))
        );
        assert_eq!(result.output.response.get("result"), Some(&json!("q-ran")));
    }

    // Scenario: feedback loop runs its first node max_iterations + 1 times.
    #[tokio::test]
    async fn feedback_loop_respects_iteration_cap() {
        let mut c = block("c", "condition");
        c.config.params.insert(
            "conditions".to_string(),
            json!([{"id": "i1", "title": "if", "value": "true"}]),
        );
        let mut loops_map = HashMap::new();
        loops_map.insert(
            "l1".to_string(),
            SerializedLoop {
                id: "l1".to_string(),
                nodes: vec!["a".to_string(), "c".to_string()],
                max_iterations: 3,
            },
        );
        let workflow = SerializedWorkflow {
            blocks: vec![block("start", "starter"), block("a", "agent"), c],
            connections: vec![
                conn("start", "a"),
                conn("a", "c"),
                cond_conn("c", "a", "i1"),
            ],
            loops: loops_map,
        };
        let provider = MockProvider::new("hi");
        let (exec, _) = executor(workflow, provider.clone(), StaticToolRegistry::new());

        let result = exec.execute("wf-loop").await;

        assert!(result.success, "error: {:?}", result.error);
        let a_runs = result.logs.iter().filter(|l| l.block_id == "a").count();
        assert_eq!(a_runs, 4); // initial pass + 3 iterations
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    // Scenario: referencing a disabled block fails the run.
    #[tokio::test]
    async fn disabled_dependency_fails_run() {
        let mut a = tool_block("a", "function", "fn_run");
        a.config
            .params
            .insert("m".to_string(), json!("<x.response.y>"));
        let mut x = block("x", "function");
        x.enabled = false;
        let workflow = SerializedWorkflow {
            blocks: vec![block("start", "starter"), a, x],
            connections: vec![conn("start", "a")],
            loops: HashMap::new(),
        };
        let registry = StaticToolRegistry::new();
        simple_tool(&registry, "fn_run", json!({"result": "done"}));
        let (exec, _) = executor(workflow, MockProvider::new(""), registry);

        let result = exec.execute("wf-disabled").await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("disabled"));
        assert_eq!(result.logs.len(), 1);
        assert!(!result.logs[0].success);
    }

    // Scenario: forward reference inside a loop resolves to empty on the
    // first pass instead of failing.
    #[tokio::test]
    async fn forward_reference_inside_loop_is_tolerated() {
        let mut b = tool_block("b", "function", "fn_run");
        b.config
            .params
            .insert("m".to_string(), json!("<c.response.z>"));
        let mut c = block("c", "condition");
        c.config.params.insert(
            "conditions".to_string(),
            json!([
                {"id": "i1", "title": "if", "value": "false"},
                {"id": "i2", "title": "else", "value": ""}
            ]),
        );
        let mut loops_map = HashMap::new();
        loops_map.insert(
            "l1".to_string(),
            SerializedLoop {
                id: "l1".to_string(),
                nodes: vec!["b".to_string(), "c".to_string()],
                max_iterations: 3,
            },
        );
        let workflow = SerializedWorkflow {
            blocks: vec![
                block("start", "starter"),
                b,
                c,
                tool_block("d", "function", "exit_tool"),
            ],
            connections: vec![
                conn("start", "b"),
                conn("b", "c"),
                cond_conn("c", "b", "i1"),
                cond_conn("c", "d", "i2"),
            ],
            loops: loops_map,
        };
        let registry = StaticToolRegistry::new();
        let captured = capturing_tool(&registry, "fn_run");
        simple_tool(&registry, "exit_tool", json!({"result": "exited"}));
        let (exec, _) = executor(workflow, MockProvider::new(""), registry);

        let result = exec.execute("wf-forward").await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(captured.lock().unwrap()[0].get("m"), Some(&json!("")));
        assert_eq!(result.output.response.get("result"), Some(&json!("exited")));
    }

    // Invalid workflows fail before any block runs.
    #[tokio::test]
    async fn validation_failure_runs_no_blocks() {
        let workflow = SerializedWorkflow {
            blocks: vec![block("a", "agent")],
            connections: Vec::new(),
            loops: HashMap::new(),
        };
        let (exec, console) = executor(workflow, MockProvider::new(""), StaticToolRegistry::new());

        let result = exec.execute("wf-invalid").await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("starter"));
        assert!(result.logs.is_empty());
        assert!(console.events().is_empty());
        assert_eq!(result.output, NormalizedBlockOutput::default());
    }

    // A perpetually-iterating loop is stopped by the 100-layer safety cap
    // and still reported as success.
    #[tokio::test]
    async fn safety_cap_terminates_pathological_workflow() {
        let mut c = block("c", "condition");
        c.config.params.insert(
            "conditions".to_string(),
            json!([{"id": "i1", "title": "if", "value": "true"}]),
        );
        let mut loops_map = HashMap::new();
        loops_map.insert(
            "l1".to_string(),
            SerializedLoop {
                id: "l1".to_string(),
                nodes: vec!["a".to_string(), "c".to_string()],
                max_iterations: 1000,
            },
        );
        let workflow = SerializedWorkflow {
            blocks: vec![block("start", "starter"), block("a", "agent"), c],
            connections: vec![
                conn("start", "a"),
                conn("a", "c"),
                cond_conn("c", "a", "i1"),
            ],
            loops: loops_map,
        };
        let (exec, _) = executor(workflow, MockProvider::new("hi"), StaticToolRegistry::new());

        let result = exec.execute("wf-pathological").await;

        assert!(result.success);
        assert_eq!(result.logs.len(), 100);
    }

    // Expired deadline stops the run with the bare "Timeout" error.
    #[tokio::test]
    async fn expired_deadline_times_out() {
        let workflow = SerializedWorkflow {
            blocks: vec![block("start", "starter"), block("a", "agent")],
            connections: vec![conn("start", "a")],
            loops: HashMap::new(),
        };
        let (exec, _) = executor(workflow, MockProvider::new("hi"), StaticToolRegistry::new());
        let exec = exec.with_deadline(Duration::ZERO);

        let result = exec.execute("wf-deadline").await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Timeout"));
        assert!(result.logs.is_empty());
    }

    // Caller-supplied states resolve references before the owning block
    // re-runs.
    #[tokio::test]
    async fn initial_states_feed_references() {
        let mut a = tool_block("a", "function", "fn_run");
        a.config
            .params
            .insert("m".to_string(), json!("<d.response.v>"));
        let workflow = SerializedWorkflow {
            blocks: vec![
                block("start", "starter"),
                a,
                tool_block("d", "function", "d_tool"),
            ],
            connections: vec![conn("start", "a"), conn("start", "d")],
            loops: HashMap::new(),
        };
        let registry = StaticToolRegistry::new();
        let captured = capturing_tool(&registry, "fn_run");
        simple_tool(&registry, "d_tool", json!({"v": "fresh"}));
        let (exec, _) = executor(workflow, MockProvider::new(""), registry);

        let mut response = Map::new();
        response.insert("v".to_string(), json!("seed"));
        let state = BlockState {
            output: NormalizedBlockOutput::from_response(response),
            executed: true,
            execution_time_ms: 0,
        };
        let exec = exec.with_initial_states(HashMap::from([("d".to_string(), state)]));

        let result = exec.execute("wf-seeded").await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(captured.lock().unwrap()[0].get("m"), Some(&json!("seed")));
    }

    // Fan-out layers run both branches and log them in completion order.
    #[tokio::test]
    async fn fan_out_executes_whole_layer() {
        let workflow = SerializedWorkflow {
            blocks: vec![
                block("start", "starter"),
                tool_block("left", "function", "l_tool"),
                tool_block("right", "function", "r_tool"),
            ],
            connections: vec![conn("start", "left"), conn("start", "right")],
            loops: HashMap::new(),
        };
        let registry = StaticToolRegistry::new();
        simple_tool(&registry, "l_tool", json!({"result": "l"}));
        simple_tool(&registry, "r_tool", json!({"result": "r"}));
        let (exec, _) = executor(workflow, MockProvider::new(""), registry);

        let result = exec.execute("wf-fanout").await;

        assert!(result.success);
        let mut ids = log_ids(&result);
        ids.sort_unstable();
        assert_eq!(ids, vec!["left", "right"]);
    }

    #[test]
    fn execute_blocking_wraps_async_entrypoint() {
        let workflow = SerializedWorkflow {
            blocks: vec![
                block("start", "starter"),
                tool_block("a", "function", "fn_run"),
            ],
            connections: vec![conn("start", "a")],
            loops: HashMap::new(),
        };
        let registry = StaticToolRegistry::new();
        simple_tool(&registry, "fn_run", json!({"result": "done"}));
        let (exec, _) = executor(workflow, MockProvider::new(""), registry);

        let result = exec.execute_blocking("wf-blocking");
        assert!(result.success);
        assert_eq!(result.output.response.get("result"), Some(&json!("done")));
    }
}
