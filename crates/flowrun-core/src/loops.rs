//! Loop management. A declared loop iterates again when every member has
//! executed and some condition block inside it selected a feedback edge (a
//! target earlier in the loop's node ordering). Iterating resets the
//! members' execution bookkeeping so the scheduler re-runs them; block
//! states stay in place and are overwritten on re-execution.

use tracing::debug;

use crate::context::ExecutionContext;
use crate::workflow::{BlockKind, SerializedLoop};

/// Check every declared loop once, after a layer completes. Loops that
/// should iterate are reset; the return value is true iff any loop has
/// reached its iteration cap, which tells the executor to stop.
pub fn process_loop_iterations(ctx: &mut ExecutionContext) -> bool {
    let mut any_at_cap = false;
    let loops: Vec<SerializedLoop> = ctx.workflow.loops.values().cloned().collect();
    for lp in loops {
        let iterations = ctx.loop_iterations.get(&lp.id).copied().unwrap_or(0);
        if iterations >= lp.max_iterations {
            any_at_cap = true;
            continue;
        }
        if should_iterate(&lp, ctx) {
            ctx.loop_iterations.insert(lp.id.clone(), iterations + 1);
            debug!(loop_id = %lp.id, iteration = iterations + 1, "loop iterating");
            reset_loop(&lp, ctx);
        }
    }
    any_at_cap
}

/// A loop iterates when all of its nodes have executed and at least one
/// condition block inside it selected a feedback edge.
fn should_iterate(lp: &SerializedLoop, ctx: &ExecutionContext) -> bool {
    if !lp.nodes.iter().all(|n| ctx.executed_blocks.contains(n)) {
        return false;
    }
    lp.nodes.iter().enumerate().any(|(pos, node)| {
        let Some(block) = ctx.workflow.block(node) else {
            return false;
        };
        if block.kind() != BlockKind::Condition {
            return false;
        }
        selected_feedback_target(node, ctx)
            .and_then(|target| lp.nodes.iter().position(|n| *n == target))
            .is_some_and(|target_pos| target_pos < pos)
    })
}

fn selected_feedback_target(condition_id: &str, ctx: &ExecutionContext) -> Option<String> {
    ctx.output_of(condition_id)?
        .walk(&["response", "selectedPath", "blockId"])?
        .as_str()
        .map(str::to_string)
}

/// Clear execution bookkeeping for every loop member so the next layer
/// computation picks them up again. Decisions owned by reset blocks are
/// cleared so they can decide afresh; block states are left for overwrite.
fn reset_loop(lp: &SerializedLoop, ctx: &mut ExecutionContext) {
    for node in &lp.nodes {
        ctx.executed_blocks.remove(node);
        ctx.active_execution_path.insert(node.clone());
        ctx.decisions.router.remove(node);
        ctx.decisions.condition.remove(node);
    }
    if let Some(entry) = entry_node(lp, ctx) {
        ctx.active_execution_path.insert(entry);
    }
}

/// The loop's entry node: the member with the fewest incoming connections,
/// ties broken by node order.
fn entry_node(lp: &SerializedLoop, ctx: &ExecutionContext) -> Option<String> {
    lp.nodes
        .iter()
        .min_by_key(|node| ctx.workflow.incoming(node).count())
        .cloned()
}
