//! Parallel graph traversal.
//!
//! A path is one in-flight walk through the graph. Every fan-out adds the
//! child count to the run's active-path counter before the children start
//! and removes it after they all return; the walk that brings the counter
//! back to zero while the run is still `Running` completes the run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::core::run_context::RunContext;
use crate::model::{active_params, Edge, Node, NodeOutput, NodeType, Param, RunStatus};
use crate::nodes::{Decision, NodeContext, OutputRecord};
use crate::template::{resolve_node_data, TemplateContext};

/// Per-branch map of node id to recorded output. Shared by every path of
/// one branch; parallel entries get their own copy.
pub(crate) type SharedOutputs = Arc<Mutex<HashMap<String, NodeOutput>>>;

pub(crate) fn new_outputs() -> SharedOutputs {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Visit one node and recurse along its outgoing edges. Boxed because the
/// recursion depth follows the graph, not the stack.
pub(crate) fn visit_node(
    ctx: Arc<RunContext>,
    branch: u32,
    node_id: String,
    previous_id: Option<String>,
    outputs: SharedOutputs,
    variables: Vec<Param>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(node) = ctx.graph.node(&node_id).cloned() else {
            tracing::warn!(run_id = %ctx.run_id, node_id = %node_id, "edge target missing from graph");
            return;
        };

        if ctx.is_stopped() {
            ctx.log(
                branch,
                Some(&node),
                "Workflow run has already been stopped, skipping node processing",
                None,
                true,
            )
            .await;
            return;
        }

        let previous = previous_id
            .as_ref()
            .and_then(|id| outputs.lock().get(id).cloned());
        let vars = active_params(&variables);

        // Resolution always starts from the pristine authored payload;
        // parallel branches never see each other's resolved values.
        let template_ctx = TemplateContext {
            previous_input: previous.as_ref().and_then(|p| p.input.clone()),
            input: previous.as_ref().and_then(|p| p.output.clone()),
            vars: vars.clone(),
            env: ctx.environment.clone(),
        };
        let resolved = resolve_node_data(&node.data, &template_ctx);
        for error in &resolved.errors {
            ctx.log(
                branch,
                Some(&node),
                "Error",
                Some(Value::String(error.clone())),
                true,
            )
            .await;
        }

        let message = match node.node_type {
            NodeType::Start => "Starting workflow run",
            NodeType::End => "Ending workflow run",
            _ => "Processing node",
        };
        let payload_empty = matches!(&resolved.data, Value::Object(m) if m.is_empty());
        let log_data = if payload_empty {
            None
        } else if vars.is_empty() {
            Some(resolved.data.clone())
        } else {
            Some(json!({"$vars": vars, "parsedNodeData": resolved.data.clone()}))
        };
        ctx.log(branch, Some(&node), message, log_data, false).await;

        let node_ctx = NodeContext {
            run: ctx.clone(),
            branch,
            node: Node {
                data: resolved.data,
                ..node.clone()
            },
            previous: previous.clone(),
        };
        let handled = match ctx.handlers.get(&node.node_type).handle(&node_ctx).await {
            Ok(handled) => handled,
            Err(e) => {
                ctx.log(
                    branch,
                    Some(&node),
                    "Error",
                    Some(Value::String(e.to_string())),
                    false,
                )
                .await;
                ctx.mark_failed(branch).await;
                return;
            }
        };

        match handled.record {
            OutputRecord::Skip => {}
            OutputRecord::Output(value) => {
                let record = NodeOutput {
                    input: previous.as_ref().and_then(|p| p.output.clone()),
                    output: value,
                };
                outputs.lock().insert(node_id.clone(), record);
            }
            OutputRecord::CloneOfPrevious => {
                outputs
                    .lock()
                    .insert(node_id.clone(), previous.clone().unwrap_or_default());
            }
        }

        let mut variables = variables;
        variables.extend(handled.append_variables);

        match handled.decision {
            Decision::FailRun => {
                ctx.mark_failed(branch).await;
            }
            Decision::EndBranch => {}
            Decision::Branch(label) => {
                let edge = ctx
                    .graph
                    .edges_from(&node_id)
                    .iter()
                    .find(|e| e.source_handle == label)
                    .cloned();
                match edge {
                    Some(edge) => {
                        visit_node(ctx.clone(), branch, edge.target, Some(node_id), outputs, variables)
                            .await;
                    }
                    None => {
                        ctx.log(
                            branch,
                            Some(&node),
                            format!("No matching connection found for condition {label}"),
                            None,
                            true,
                        )
                        .await;
                    }
                }
            }
            decision @ (Decision::Continue | Decision::Parallel(_)) => {
                let edges = ctx.graph.edges_from(&node_id).to_vec();
                if edges.is_empty() {
                    ctx.log(branch, Some(&node), "No connections found", None, true)
                        .await;
                    return;
                }
                let plural = if edges.len() == 1 { "" } else { "s" };
                ctx.log(
                    branch,
                    Some(&node),
                    format!("Found {} connection{}", edges.len(), plural),
                    None,
                    true,
                )
                .await;

                if let Decision::Parallel(entries) = decision {
                    // Each entry becomes its own branch with a copy of the
                    // outputs recorded so far and its own variable set.
                    // `fan_out` raises the counter when called, so collecting
                    // the futures first reserves every entry's paths before
                    // any of them is polled; an entry whose subtree finishes
                    // without yielding cannot drain the counter to zero while
                    // sibling entries are still pending.
                    let snapshot = outputs.lock().clone();
                    let branches: Vec<_> = entries
                        .into_iter()
                        .enumerate()
                        .map(|(index, entry)| {
                            fan_out(
                                ctx.clone(),
                                (index + 1) as u32,
                                node_id.clone(),
                                edges.clone(),
                                Arc::new(Mutex::new(snapshot.clone())),
                                entry.variables,
                            )
                        })
                        .collect();
                    futures::future::join_all(branches).await;
                } else {
                    fan_out(ctx.clone(), branch, node_id, edges, outputs, variables).await;
                }
            }
        }
    })
}

/// Follow every edge in parallel, bracketing the children with the
/// active-path counter. The counter is raised in the synchronous part of
/// the call, before the returned future is first polled, so concurrent
/// walks always see each other's reservations. The walk that drains the
/// counter completes the run.
fn fan_out(
    ctx: Arc<RunContext>,
    branch: u32,
    from: String,
    edges: Vec<Edge>,
    outputs: SharedOutputs,
    variables: Vec<Param>,
) -> impl Future<Output = ()> + Send {
    let count = edges.len() as i64;
    ctx.active_paths.fetch_add(count, Ordering::SeqCst);

    async move {
        let children = edges.into_iter().map(|edge| {
            visit_node(
                ctx.clone(),
                branch,
                edge.target,
                Some(from.clone()),
                outputs.clone(),
                variables.clone(),
            )
        });
        futures::future::join_all(children).await;

        let remaining = ctx.active_paths.fetch_sub(count, Ordering::SeqCst) - count;
        if remaining == 0 && !ctx.is_stopped() && ctx.status() == RunStatus::Running {
            ctx.mark_completed().await;
        }
    }
}
