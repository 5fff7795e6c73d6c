//! Compiler error types.
//!
//! Every variant is fatal: compilation stops at the first error and the
//! error propagates to the caller unchanged.

use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::model::StepId;

/// Errors that can occur while loading or compiling a workflow.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Neither the step key nor its `run` tag resolves in the registry.
    #[error("unknown step '{key}' in workflow '{workflow}': no tool or subworkflow named {step_id}")]
    UnknownStep {
        workflow: String,
        key: String,
        step_id: StepId,
    },

    /// A step's interface declares a class the compiler cannot handle.
    #[error("step '{key}' has unsupported class '{class}' (expected CommandLineTool or Workflow)")]
    UnknownStepClass { key: String, class: String },

    /// The same `!&` label is defined more than once.
    #[error("explicit edge '{label}' is defined more than once; edge labels must be unique")]
    DuplicateEdgeDefinition { label: String },

    /// A step references an edge that it defines itself.
    #[error("step '{step}' references explicit edge '{label}' that it defines itself")]
    SelfReference { step: String, label: String },

    /// A `!*` reference with no matching `!&` definition.
    #[error("explicit edge '{label}' used by '{step}' is never defined with !&")]
    UndefinedEdge { step: String, label: String },

    /// A bare string binding that names no workflow input.
    #[error(
        "'{name}' bound to '{step}/{param}' is not a workflow input; inline literal values need the !ii tag"
    )]
    UnboundVariable {
        step: String,
        param: String,
        name: String,
    },

    /// A binding for a parameter the target does not declare.
    #[error("step '{step}' has no input parameter named '{param}'")]
    UnknownParameter { step: String, param: String },

    /// Required parameters were left unbound with inference disabled.
    #[error("workflow '{workflow}' has unbound required parameters: {}", .params.join(", "))]
    IncompleteWorkflow {
        workflow: String,
        params: Vec<String>,
    },

    /// Structural problems found before compilation.
    #[error("workflow '{workflow}' is invalid: {}", .reasons.join("; "))]
    InvalidWorkflow {
        workflow: String,
        reasons: Vec<String>,
    },

    /// The rewriter kept changing the AST.
    #[error("workflow '{workflow}' did not converge after {iterations} compiler passes; last AST:\n{last_ast}")]
    FixedPointDivergence {
        workflow: String,
        iterations: usize,
        last_ast: String,
    },

    /// A namespace computation produced an inconsistent result.
    #[error("internal compiler error: {0}")]
    Internal(String),

    /// A subworkflow includes itself, directly or transitively.
    #[error("recursive include of '{}'", .0.display())]
    RecursiveInclude(PathBuf),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{}': {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

impl CompileError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompileError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        CompileError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_step_message_names_the_step() {
        let err = CompileError::UnknownStep {
            workflow: "main".to_string(),
            key: "tuoch".to_string(),
            step_id: StepId::global("tuoch"),
        };
        let msg = err.to_string();
        assert!(msg.contains("tuoch"));
        assert!(msg.contains("global"));
    }

    #[test]
    fn test_incomplete_workflow_lists_params() {
        let err = CompileError::IncompleteWorkflow {
            workflow: "main".to_string(),
            params: vec!["a___x".to_string(), "b___y".to_string()],
        };
        assert!(err.to_string().ends_with("a___x, b___y"));
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error;
        let err = CompileError::io("missing.wic", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("missing.wic"));
    }
}
