//! Workflow-level error types.

use super::NodeError;
use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Graph build error: {0}")]
    GraphBuildError(String),
    #[error("Run not found: {0}")]
    RunNotFound(String),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        assert_eq!(
            WorkflowError::GraphBuildError("g".into()).to_string(),
            "Graph build error: g"
        );
        assert_eq!(
            WorkflowError::RunNotFound("r1".into()).to_string(),
            "Run not found: r1"
        );
    }

    #[test]
    fn test_workflow_error_from_node_error() {
        let wf_err: WorkflowError = NodeError::ConnectionTimeout.into();
        assert!(matches!(wf_err, WorkflowError::NodeError(_)));
        assert!(wf_err.to_string().contains("Connection timeout"));
    }
}
