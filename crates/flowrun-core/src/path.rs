//! Active-path tracking. Router and condition blocks choose one successor;
//! this module records those decisions after each layer and keeps the
//! `active_execution_path` set consistent, pruning downstream subgraphs that
//! lose their last active predecessor.

use std::collections::HashSet;

use tracing::debug;

use crate::context::ExecutionContext;
use crate::workflow::{BlockKind, SerializedConnection};

/// Whether a block is reachable given the decisions made so far: either it
/// is already in the active path, or some incoming connection delivers it
/// from an active source.
pub fn is_in_active_path(block_id: &str, ctx: &ExecutionContext) -> bool {
    if ctx.active_execution_path.contains(block_id) {
        return true;
    }
    ctx.workflow
        .incoming(block_id)
        .any(|conn| connection_activates(conn, block_id, ctx))
}

fn connection_activates(
    conn: &SerializedConnection,
    target: &str,
    ctx: &ExecutionContext,
) -> bool {
    let Some(source) = ctx.workflow.block(&conn.source) else {
        return false;
    };
    match source.kind() {
        BlockKind::Router => ctx
            .decisions
            .router
            .get(&source.id)
            .is_some_and(|selected| selected == target),
        BlockKind::Condition => match conn.condition_handle() {
            Some(handle_id) => ctx
                .decisions
                .condition
                .get(&source.id)
                .is_some_and(|selected| selected == handle_id),
            None => {
                ctx.executed_blocks.contains(&source.id)
                    && ctx.active_execution_path.contains(&source.id)
            }
        },
        _ => {
            ctx.executed_blocks.contains(&source.id)
                && ctx.active_execution_path.contains(&source.id)
        }
    }
}

/// Fold the blocks that just finished a layer into the active path: record
/// router/condition decisions, activate the chosen successors, and prune the
/// branches that were decided against.
pub fn update_execution_paths(just_executed: &[String], ctx: &mut ExecutionContext) {
    for block_id in just_executed {
        let Some(block) = ctx.workflow.block(block_id).cloned() else {
            continue;
        };
        match block.kind() {
            BlockKind::Router => update_router_path(&block.id, ctx),
            BlockKind::Condition => update_condition_path(&block.id, ctx),
            _ => {
                let successors: Vec<String> = ctx
                    .workflow
                    .outgoing(block_id)
                    .map(|c| c.target.clone())
                    .collect();
                for target in successors {
                    ctx.active_execution_path.insert(target);
                }
            }
        }
    }
}

fn update_router_path(router_id: &str, ctx: &mut ExecutionContext) {
    let selected = ctx
        .decisions
        .router
        .get(router_id)
        .cloned()
        .or_else(|| emitted_path_target(router_id, ctx));
    let Some(selected) = selected else {
        return;
    };
    ctx.decisions
        .router
        .insert(router_id.to_string(), selected.clone());
    ctx.active_execution_path.insert(selected.clone());
    debug!(router = router_id, target = %selected, "router decision recorded");

    let rejected: Vec<String> = ctx
        .workflow
        .outgoing(router_id)
        .map(|c| c.target.clone())
        .filter(|t| *t != selected)
        .collect();
    prune_branches(&rejected, ctx);
}

fn update_condition_path(condition_id: &str, ctx: &mut ExecutionContext) {
    let selected = ctx
        .decisions
        .condition
        .get(condition_id)
        .cloned()
        .or_else(|| emitted_condition_id(condition_id, ctx));
    let Some(selected) = selected else {
        return;
    };
    ctx.decisions
        .condition
        .insert(condition_id.to_string(), selected.clone());
    debug!(condition = condition_id, id = %selected, "condition decision recorded");

    let mut rejected = Vec::new();
    let mut chosen = None;
    for conn in ctx.workflow.outgoing(condition_id) {
        match conn.condition_handle() {
            Some(handle_id) if handle_id == selected => chosen = Some(conn.target.clone()),
            Some(_) => rejected.push(conn.target.clone()),
            None => {}
        }
    }
    if let Some(target) = chosen {
        ctx.active_execution_path.insert(target);
    }
    prune_branches(&rejected, ctx);
}

/// The target a router emitted in its output (`response.selectedPath.blockId`).
fn emitted_path_target(block_id: &str, ctx: &ExecutionContext) -> Option<String> {
    ctx.output_of(block_id)?
        .walk(&["response", "selectedPath", "blockId"])?
        .as_str()
        .map(str::to_string)
}

fn emitted_condition_id(block_id: &str, ctx: &ExecutionContext) -> Option<String> {
    ctx.output_of(block_id)?
        .walk(&["response", "selectedConditionId"])?
        .as_str()
        .map(str::to_string)
}

/// Remove rejected successors and, recursively, any downstream block left
/// without an incoming edge from an active-path source. The active set only
/// shrinks during one call, so the walk terminates on cycles.
fn prune_branches(rejected: &[String], ctx: &mut ExecutionContext) {
    let mut visited = HashSet::new();
    for target in rejected {
        prune(target, ctx, &mut visited);
    }
}

fn prune(block_id: &str, ctx: &mut ExecutionContext, visited: &mut HashSet<String>) {
    if !visited.insert(block_id.to_string()) {
        return;
    }
    if has_active_support(block_id, ctx) {
        return;
    }
    if !ctx.active_execution_path.remove(block_id) {
        return;
    }
    debug!(block = block_id, "pruned from active path");
    let successors: Vec<String> = ctx
        .workflow
        .outgoing(block_id)
        .map(|c| c.target.clone())
        .collect();
    for target in successors {
        prune(&target, ctx, visited);
    }
}

/// Whether some incoming edge still delivers this block from the active
/// path, honoring recorded router/condition decisions.
fn has_active_support(block_id: &str, ctx: &ExecutionContext) -> bool {
    for conn in ctx.workflow.incoming(block_id) {
        let Some(source) = ctx.workflow.block(&conn.source) else {
            continue;
        };
        if !ctx.active_execution_path.contains(&source.id) {
            continue;
        }
        let supports = match source.kind() {
            BlockKind::Router => match ctx.decisions.router.get(&source.id) {
                Some(selected) => selected == block_id,
                None => true,
            },
            BlockKind::Condition => {
                match (conn.condition_handle(), ctx.decisions.condition.get(&source.id)) {
                    (Some(handle_id), Some(selected)) => handle_id == selected,
                    _ => true,
                }
            }
            _ => true,
        };
        if supports {
            return true;
        }
    }
    false
}
