//! Per-visit resolution of `{{ expr }}` tokens in node data.
//!
//! Resolution always starts from the node's pristine authored payload.
//! The same logical node may be visited by several parallel branches, and
//! each visit must re-resolve against its own context rather than reuse
//! another branch's resolved values.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::expr;

/// Guard against expressions whose result reintroduces a token.
const MAX_SUBSTITUTIONS: usize = 64;

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("token regex"))
}

/// Evaluation context for one node visit.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// The previous node's own input (`$previousInput`).
    pub previous_input: Option<Value>,
    /// The previous node's output (`$input`).
    pub input: Option<Value>,
    /// Flattened active variables (`$vars`).
    pub vars: HashMap<String, String>,
    /// Selected environment (`$env`).
    pub env: HashMap<String, String>,
}

impl TemplateContext {
    fn root(&self, name: &str) -> Option<Value> {
        match name {
            "$previousInput" => Some(self.previous_input.clone().unwrap_or(Value::Null)),
            "$input" => Some(self.input.clone().unwrap_or(Value::Null)),
            "$vars" => Some(string_map_value(&self.vars)),
            "$env" => Some(string_map_value(&self.env)),
            _ => None,
        }
    }
}

fn string_map_value(map: &HashMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Outcome of resolving one node's data payload.
#[derive(Debug)]
pub struct ResolvedData {
    pub data: Value,
    /// One message per key whose expression failed to evaluate; the
    /// caller logs these at debug level.
    pub errors: Vec<String>,
}

/// Resolve every top-level key of `data` against `ctx`.
///
/// Non-string values are serialized to JSON text before substitution and
/// re-parsed afterwards. An evaluation failure in one key leaves that
/// key's entire value as the original unresolved literal; sibling keys
/// and the run itself are unaffected.
pub fn resolve_node_data(data: &Value, ctx: &TemplateContext) -> ResolvedData {
    let Value::Object(map) = data else {
        return ResolvedData {
            data: data.clone(),
            errors: Vec::new(),
        };
    };

    let lookup = |name: &str| ctx.root(name);
    let mut resolved = serde_json::Map::with_capacity(map.len());
    let mut errors = Vec::new();

    for (key, original) in map {
        let is_string = original.is_string();
        let mut text = match original {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let mut failed = false;
        for _ in 0..MAX_SUBSTITUTIONS {
            let Some(captures) = token_regex().captures(&text) else {
                break;
            };
            let token = captures.get(0).expect("whole match").as_str().to_string();
            let expression = captures.get(1).expect("inner group").as_str().trim();

            match expr::evaluate(expression, &lookup) {
                Ok(value) => {
                    text = text.replace(&token, &expr::to_display_string(&value));
                }
                Err(err) => {
                    errors.push(err.to_string());
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            resolved.insert(key.clone(), original.clone());
            continue;
        }

        let value = if is_string {
            Value::String(text)
        } else {
            // Substitution may have produced text that is no longer valid
            // JSON; keep it as a string rather than aborting the visit.
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        resolved.insert(key.clone(), value);
    }

    ResolvedData {
        data: Value::Object(resolved),
        errors,
    }
}
