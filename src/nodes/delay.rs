//! Delay node handler.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::NodeResult;
use crate::model::DelayData;
use crate::nodes::executor::{Decision, Handled, NodeContext, NodeHandler};

/// Pauses the path for a configured number of milliseconds. The sleep is
/// raced against the run's stop signal so stopped runs never wait out the
/// remainder of a long delay.
pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: DelayData = ctx.config()?;

        ctx.log(
            format!("Starting delay of {} ms", data.delay_in_ms),
            None,
            false,
        )
        .await;

        tokio::select! {
            _ = ctx.run.cancel.cancelled() => {
                return Ok(Handled::next().decide(Decision::EndBranch));
            }
            _ = tokio::time::sleep(Duration::from_millis(data.delay_in_ms)) => {}
        }

        ctx.log("Delay completed", None, false).await;
        Ok(Handled::next())
    }
}
