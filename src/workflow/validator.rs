//! Workflow Validation
//!
//! Structural checks that run before and after compilation:
//! - Empty workflows and empty step keys (fatal)
//! - Malformed or dangling per-step override keys
//! - Scatter over parameters that are never bound
//! - Required parameters left unbound after compilation

use log::{debug, info, warn};

use super::model::{WorkflowAst, WorkflowTree};
use super::namespace::parse_override_key;
use crate::compiler::error::{CompileError, Result};
use crate::compiler::types::RoseTree;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyWorkflow,
    EmptyStepKey(usize),
    MalformedOverrideKey(String),
    DanglingOverride(String),
    UnboundScatter { step: String, param: String },
}

impl ValidationError {
    /// Fatal errors stop compilation; the rest are reported as warnings.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyWorkflow | Self::EmptyStepKey(_) | Self::MalformedOverrideKey(_)
        )
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "Workflow has no steps"),
            Self::EmptyStepKey(index) => write!(f, "Step {} has an empty key", index + 1),
            Self::MalformedOverrideKey(key) => {
                write!(f, "Step override key '{}' is not of the form '(i, key)'", key)
            }
            Self::DanglingOverride(key) => {
                write!(f, "Step override '{}' does not match any step", key)
            }
            Self::UnboundScatter { step, param } => {
                write!(f, "Step '{}' scatters over '{}' but never binds it", step, param)
            }
        }
    }
}

/// Checks one workflow body (not its subtrees).
pub fn validate_ast(ast: &WorkflowAst) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if ast.steps.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
        return errors;
    }

    for (i, step) in ast.steps.iter().enumerate() {
        if step.key.is_empty() {
            errors.push(ValidationError::EmptyStepKey(i));
            continue;
        }

        let overridden = ast
            .step_override(i)
            .map(|o| o.bindings.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for param in &step.scatter {
            if !step.bindings.contains_key(param) && !overridden.contains(param) {
                errors.push(ValidationError::UnboundScatter {
                    step: step.key.clone(),
                    param: param.clone(),
                });
            }
        }
    }

    for key in ast.meta.steps.keys() {
        match parse_override_key(key) {
            None => errors.push(ValidationError::MalformedOverrideKey(key.clone())),
            Some((num, name)) => {
                let matches = num >= 1
                    && ast
                        .steps
                        .get(num - 1)
                        .map(|s| s.key == name)
                        .unwrap_or(false);
                if !matches {
                    errors.push(ValidationError::DanglingOverride(key.clone()));
                }
            }
        }
    }

    errors
}

/// Validates a workflow tree, recursing into embedded subworkflows.
///
/// Warnings are logged; any fatal error fails with
/// [`CompileError::InvalidWorkflow`].
pub fn validate_tree(tree: &WorkflowTree) -> Result<()> {
    let mut fatal = Vec::new();
    collect(&tree.stem(), &tree.ast, &mut fatal);

    if !fatal.is_empty() {
        return Err(CompileError::InvalidWorkflow {
            workflow: tree.step_id.stem.clone(),
            reasons: fatal,
        });
    }

    info!("Workflow '{}' validated", tree.step_id.stem);
    Ok(())
}

fn collect(name: &str, ast: &WorkflowAst, fatal: &mut Vec<String>) {
    for error in validate_ast(ast) {
        if error.is_fatal() {
            fatal.push(format!("{}: {}", name, error));
        } else {
            warn!("{}: {}", name, error);
        }
    }

    for step in &ast.steps {
        if let Some(sub) = &step.subtree {
            debug!("Validating subworkflow {}", step.key);
            collect(&step.key, sub, fatal);
        }
    }
}

/// Fails if any workflow in the compiled tree left required parameters
/// unbound.
pub fn check_completeness(rose: &RoseTree) -> Result<()> {
    let params: Vec<String> = rose
        .flatten()
        .iter()
        .flat_map(|node| node.data.unresolved.iter().cloned())
        .collect();

    if params.is_empty() {
        return Ok(());
    }
    Err(CompileError::IncompleteWorkflow {
        workflow: rose.data.name.clone(),
        params,
    })
}

/// Quick validation that returns a list of error messages.
///
/// Unlike [`validate_tree`] it never fails and includes warnings.
pub fn quick_validate(ast: &WorkflowAst) -> Vec<String> {
    validate_ast(ast).iter().map(|e| e.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::NodeData;
    use crate::registry::tool::ToolInterface;
    use crate::workflow::model::{Binding, Step, StepId, StepOverride};

    fn tree(ast: WorkflowAst) -> WorkflowTree {
        WorkflowTree::new(StepId::global("main.wic"), ast)
    }

    #[test]
    fn test_valid_workflow() {
        let ast = WorkflowAst::from_steps(vec![
            Step::new("touch").with_binding("filename", Binding::literal("empty.txt")),
            Step::new("append"),
        ]);
        assert!(validate_ast(&ast).is_empty());
        assert!(validate_tree(&tree(ast)).is_ok());
    }

    #[test]
    fn test_empty_workflow() {
        let errors = validate_ast(&WorkflowAst::default());
        assert_eq!(errors, vec![ValidationError::EmptyWorkflow]);
        assert!(validate_tree(&tree(WorkflowAst::default())).is_err());
    }

    #[test]
    fn test_empty_subworkflow_is_fatal() {
        let ast = WorkflowAst::from_steps(vec![Step::new("sub.wic").with_subtree(WorkflowAst::default())]);
        let err = validate_tree(&tree(ast)).unwrap_err();
        assert!(err.to_string().contains("sub.wic"));
    }

    #[test]
    fn test_malformed_override_key() {
        let mut ast = WorkflowAst::from_steps(vec![Step::new("touch")]);
        ast.meta.steps.insert("touch".to_string(), StepOverride::default());

        let errors = validate_ast(&ast);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MalformedOverrideKey(_))));
        assert!(validate_tree(&tree(ast)).is_err());
    }

    #[test]
    fn test_dangling_override_is_warning() {
        let mut ast = WorkflowAst::from_steps(vec![Step::new("touch")]);
        ast.meta.steps.insert("(2, touch)".to_string(), StepOverride::default());

        let errors = validate_ast(&ast);
        assert_eq!(errors, vec![ValidationError::DanglingOverride("(2, touch)".to_string())]);
        assert!(!errors[0].is_fatal());
        assert!(validate_tree(&tree(ast)).is_ok());
    }

    #[test]
    fn test_unbound_scatter() {
        let mut step = Step::new("touch");
        step.scatter.push("filename".to_string());
        let errors = validate_ast(&WorkflowAst::from_steps(vec![step]));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnboundScatter { .. })));
    }

    #[test]
    fn test_check_completeness() {
        let mut root = NodeData::leaf(vec![], "main".to_string(), String::new(), ToolInterface::command_line_tool());
        assert!(check_completeness(&RoseTree::new(root.clone(), vec![])).is_ok());

        root.unresolved.push("main__step__1__append___file".to_string());
        let err = check_completeness(&RoseTree::new(root, vec![])).unwrap_err();
        assert!(matches!(err, CompileError::IncompleteWorkflow { ref params, .. } if params.len() == 1));
    }

    #[test]
    fn test_quick_validate_empty() {
        let errors = quick_validate(&WorkflowAst::default());
        assert!(errors[0].contains("no steps"));
    }
}
