//! HTTPRequest node handler.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::core::capability::{HttpPayload, HttpRequestSpec};
use crate::error::{NodeError, NodeResult};
use crate::model::HttpRequestData;
use crate::nodes::executor::{Decision, Handled, NodeContext, NodeHandler};

/// Issues one HTTP request with resolved URL, query params, headers, and
/// body. The request's abort token is registered in the connection
/// registry for the duration of the call so a stop request cuts it short.
pub struct HttpRequestHandler;

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: HttpRequestData = ctx.config()?;

        let Ok(mut url) = Url::parse(&data.url) else {
            ctx.log("Invalid URL", Some(Value::String(data.url.clone())), false)
                .await;
            return Ok(Handled::next().decide(Decision::EndBranch));
        };

        {
            let mut pairs = url.query_pairs_mut();
            for param in data.query_params.iter().filter(|p| !p.disabled) {
                pairs.append_pair(&param.name, &param.value);
            }
        }

        let headers: Vec<(String, String)> = data
            .headers
            .iter()
            .filter(|p| !p.disabled)
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();

        // GET requests never carry a body.
        let body = if data.method.eq_ignore_ascii_case("GET") {
            None
        } else {
            match data.body.mime_type.as_deref() {
                Some("application/json") => Some(HttpPayload::Json(data.body.text.clone())),
                Some("application/x-www-form-urlencoded") => Some(HttpPayload::Form(
                    data.body
                        .params
                        .iter()
                        .filter(|p| !p.disabled)
                        .map(|p| (p.name.clone(), p.value.clone()))
                        .collect(),
                )),
                _ => None,
            }
        };

        let spec = HttpRequestSpec {
            method: data.method.clone(),
            url,
            headers,
            body,
        };

        let key = ctx.connection_key();
        let abort = ctx.run.connections.register_http(key.clone());
        let result = ctx.run.http.request(spec, abort).await;
        ctx.run.connections.deregister(&key);

        match result {
            Ok(response) => {
                let value = match serde_json::from_str::<Value>(&response.body) {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        ctx.log(
                            "Failed to parse response to JSON",
                            Some(Value::String(response.body.clone())),
                            true,
                        )
                        .await;
                        Value::String(response.body)
                    }
                };
                ctx.log("Response", Some(value.clone()), false).await;
                Ok(Handled::output(Some(value)))
            }
            Err(NodeError::Aborted) => {
                ctx.log(NodeError::Aborted.to_string(), None, true).await;
                Ok(Handled::next().decide(Decision::FailRun))
            }
            Err(e) => {
                ctx.log("Error", Some(Value::String(e.to_string())), false)
                    .await;
                Ok(Handled::next().decide(Decision::FailRun))
            }
        }
    }
}
