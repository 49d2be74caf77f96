//! Node handlers, one per node type.

pub mod control_flow;
pub mod delay;
pub mod executor;
pub mod http;
pub mod set_variable;
pub mod socket_io;
pub mod web_socket;

pub use executor::{Decision, Handled, HandlerRegistry, NodeContext, NodeHandler, OutputRecord};
