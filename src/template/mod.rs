//! Template resolution for node data payloads.
//!
//! Workflow authors embed `{{ expr }}` tokens in node data; each node
//! visit resolves them against the visit's [`TemplateContext`] using a
//! restricted expression grammar ([`expr`]).

pub mod expr;
pub mod resolver;

pub use resolver::{resolve_node_data, ResolvedData, TemplateContext};
