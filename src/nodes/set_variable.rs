//! SetVariable node handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::NodeResult;
use crate::model::SetVariableData;
use crate::nodes::executor::{Decision, Handled, NodeContext, NodeHandler, OutputRecord};

/// Appends the node's variables to the branch's variable list. Later
/// definitions of the same name shadow earlier ones at resolution time.
/// The node is transparent to data flow: its recorded output is a copy of
/// the previous node's record.
pub struct SetVariableHandler;

#[async_trait]
impl NodeHandler for SetVariableHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: SetVariableData = ctx.config().unwrap_or_default();

        let flattened: serde_json::Map<String, Value> = data
            .variables
            .iter()
            .map(|p| (p.name.clone(), Value::String(p.value.clone())))
            .collect();
        ctx.log("", Some(Value::Object(flattened)), false).await;

        Ok(Handled {
            record: OutputRecord::CloneOfPrevious,
            decision: Decision::Continue,
            append_variables: data.variables,
        })
    }
}
