//! Workflow Loader
//!
//! Reads workflow DSL files from disk and attaches the body of every
//! subworkflow step (`*.wic` / `*.yml` keys) as that step's subtree, so the
//! compiler can work on a single in-memory tree.
//!
//! Subworkflow files are looked up next to the including file first, then
//! in each configured search path, in order.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::model::{StepId, WorkflowAst, WorkflowTree};
use crate::compiler::error::{CompileError, Result};

/// File extensions that mark a step key as a subworkflow reference.
const SUBWORKFLOW_EXTENSIONS: [&str; 2] = ["wic", "yml"];

/// True if the step key names a subworkflow file.
pub fn is_subworkflow_key(key: &str) -> bool {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SUBWORKFLOW_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Parses a workflow file without resolving its subworkflows.
pub fn read_workflow(path: &Path) -> Result<WorkflowAst> {
    let content = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
    debug!("YAML content loaded ({} bytes) from {}", content.len(), path.display());

    WorkflowAst::from_yaml_str(&content).map_err(|e| CompileError::parse(path, e))
}

/// Loads a root workflow and every subworkflow it (transitively) includes.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::{Path, PathBuf};
/// use rustweaver::workflow::parser::load_workflow_tree;
///
/// let tree = load_workflow_tree(Path::new("pipeline.wic"), &[PathBuf::from("workflows")])?;
/// println!("Loaded {} with {} steps", tree.step_id.stem, tree.ast.steps.len());
/// # Ok::<(), rustweaver::compiler::CompileError>(())
/// ```
pub fn load_workflow_tree(path: &Path, search_paths: &[PathBuf]) -> Result<WorkflowTree> {
    info!("Loading workflow from: {}", path.display());

    let mut ast = read_workflow(path)?;
    let mut stack = vec![canonical(path)];
    attach_subtrees(&mut ast, parent_dir(path), search_paths, &mut stack)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    info!("Loaded workflow '{}' with {} top-level steps", file_name, ast.steps.len());
    Ok(WorkflowTree::new(StepId::global(file_name), ast))
}

fn attach_subtrees(
    ast: &mut WorkflowAst,
    dir: &Path,
    search_paths: &[PathBuf],
    stack: &mut Vec<PathBuf>,
) -> Result<()> {
    for step in ast.steps.iter_mut() {
        if let Some(subtree) = step.subtree.as_mut() {
            // Inline bodies can still reference files of their own.
            attach_subtrees(subtree, dir, search_paths, stack)?;
            continue;
        }

        if !is_subworkflow_key(&step.key) {
            continue;
        }

        let path = resolve_subworkflow(&step.key, dir, search_paths)?;
        let key = canonical(&path);
        if stack.contains(&key) {
            return Err(CompileError::RecursiveInclude(path));
        }

        debug!("Attaching subworkflow {} from {}", step.key, path.display());
        let mut sub = read_workflow(&path)?;
        stack.push(key);
        attach_subtrees(&mut sub, parent_dir(&path), search_paths, stack)?;
        stack.pop();

        step.subtree = Some(Box::new(sub));
    }
    Ok(())
}

fn resolve_subworkflow(key: &str, dir: &Path, search_paths: &[PathBuf]) -> Result<PathBuf> {
    let local = dir.join(key);
    if local.is_file() {
        return Ok(local);
    }

    search_paths
        .iter()
        .map(|p| p.join(key))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            CompileError::io(
                local,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("subworkflow '{}' not found in {} search paths", key, search_paths.len()),
                ),
            )
        })
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Saves a workflow AST to a YAML file.
pub fn save_workflow(ast: &WorkflowAst, path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(ast).map_err(|e| CompileError::parse(path, e))?;
    fs::write(path, yaml).map_err(|e| CompileError::io(path, e))?;

    info!("Workflow saved to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_subworkflow_key() {
        assert!(is_subworkflow_key("sub.wic"));
        assert!(is_subworkflow_key("sub.yml"));
        assert!(!is_subworkflow_key("touch"));
    }

    #[test]
    fn test_load_workflow_file_not_found() {
        let result = load_workflow_tree(Path::new("/nonexistent/path/main.wic"), &[]);
        assert!(matches!(result, Err(CompileError::Io { .. })));
    }

    #[test]
    fn test_load_workflow_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.wic");
        fs::write(&path, "steps: [[[").unwrap();

        let result = load_workflow_tree(&path, &[]);
        assert!(matches!(result, Err(CompileError::Parse { .. })));
    }

    #[test]
    fn test_attaches_nested_subworkflows() {
        let temp_dir = tempdir().unwrap();
        let lib = temp_dir.path().join("lib");
        fs::create_dir(&lib).unwrap();

        fs::write(temp_dir.path().join("main.wic"), "steps:\n  - touch:\n  - outer.wic:\n").unwrap();
        fs::write(temp_dir.path().join("outer.wic"), "steps:\n  - inner.wic:\n").unwrap();
        fs::write(lib.join("inner.wic"), "steps:\n  - cat:\n").unwrap();

        let tree = load_workflow_tree(&temp_dir.path().join("main.wic"), &[lib]).unwrap();
        assert_eq!(tree.step_id, StepId::global("main.wic"));
        assert_eq!(tree.stem(), "main");

        let outer = tree.ast.steps[1].subtree.as_ref().unwrap();
        let inner = outer.steps[0].subtree.as_ref().unwrap();
        assert_eq!(inner.steps[0].key, "cat");
        assert!(tree.ast.steps[0].subtree.is_none());
    }

    #[test]
    fn test_recursive_include_rejected() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.wic"), "steps:\n  - b.wic:\n").unwrap();
        fs::write(temp_dir.path().join("b.wic"), "steps:\n  - a.wic:\n").unwrap();

        let result = load_workflow_tree(&temp_dir.path().join("a.wic"), &[]);
        assert!(matches!(result, Err(CompileError::RecursiveInclude(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("saved.wic");

        let ast = WorkflowAst::from_yaml_str("steps:\n  - touch:\n      in:\n        filename: !ii a.txt\n").unwrap();
        save_workflow(&ast, &path).unwrap();

        let reloaded = read_workflow(&path).unwrap();
        assert_eq!(ast, reloaded);
    }
}
