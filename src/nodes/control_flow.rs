//! Start, End, and IfCondition handlers.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::NodeResult;
use crate::model::{IfConditionData, StartData};
use crate::nodes::executor::{Decision, Handled, NodeContext, NodeHandler, OutputRecord};
use crate::template::expr;

/// Entry point of the graph. With parallel entries configured it fans the
/// run out into one branch per entry; otherwise traversal just continues.
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: StartData = ctx.config().unwrap_or_default();
        if data.parallel_entries.is_empty() {
            Ok(Handled::next())
        } else {
            Ok(Handled::next().decide(Decision::Parallel(data.parallel_entries)))
        }
    }
}

/// Terminates one path and releases the connections this branch opened.
/// Other branches of the run keep their connections and keep going.
pub struct EndHandler;

#[async_trait]
impl NodeHandler for EndHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        ctx.run
            .connections
            .close_branch(&ctx.run.run_id, ctx.branch)
            .await;
        Ok(Handled::next().decide(Decision::EndBranch))
    }
}

/// Two-way branch on a binary comparison of two already-resolved string
/// operands. Numeric comparison when both operands parse as numbers,
/// lexicographic otherwise.
pub struct IfConditionHandler;

#[async_trait]
impl NodeHandler for IfConditionHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: IfConditionData = ctx.config()?;

        let Some(met) = expr::compare_operands(&data.left_operand, &data.operator, &data.right_operand)
        else {
            ctx.log(format!("Unsupported operator: {}", data.operator), None, true)
                .await;
            return Ok(Handled::output(None).decide(Decision::EndBranch));
        };

        let message = if met { "Condition met" } else { "Condition not met" };
        ctx.log(message, None, false).await;

        let label = if met { "true" } else { "false" };
        Ok(Handled {
            record: OutputRecord::Output(Some(Value::Bool(met))),
            decision: Decision::Branch(label.to_string()),
            append_variables: Vec::new(),
        })
    }
}
