//! Compiled Tree Writer
//!
//! Writes every unit of a compiled [`RoseTree`] at the path its parent's
//! `run:` field refers to:
//!
//! - `<dir>/<stem>.cwl`: the root workflow
//! - `<dir>/<stem>_inputs.yml`: values extracted from inline literals
//! - `<dir>/<stem>.graph.json`: the root graph snapshot
//!
//! With relative run paths every step gets its own subdirectory and the
//! children of a subworkflow are written below it. Otherwise everything is
//! written flat into `dir`.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::compiler::error::{CompileError, Result};
use crate::compiler::types::{CompiledUnit, RoseTree};

/// Writes the compiled tree below `dir`, returning every path written.
pub fn write_to_disk(rose: &RoseTree, dir: &Path, relative_run_path: bool) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| CompileError::io(dir, e))?;

    let mut written = Vec::new();
    let stem = &rose.data.name;

    let root_path = dir.join(format!("{}.cwl", stem));
    write_unit(rose, &root_path, dir, dir, relative_run_path, &mut written)?;

    let inputs_path = dir.join(format!("{}_inputs.yml", stem));
    write_yaml(&inputs_path, &rose.data.inputs_file)?;
    written.push(inputs_path);

    let graph_path = dir.join(format!("{}.graph.json", stem));
    let graph = serde_json::to_string_pretty(&rose.data.graph).map_err(|e| CompileError::parse(&graph_path, e))?;
    fs::write(&graph_path, graph).map_err(|e| CompileError::io(&graph_path, e))?;
    written.push(graph_path);

    info!("Wrote {} files to {}", written.len(), dir.display());
    Ok(written)
}

/// Writes one unit at `path`, then its children relative to `base`.
fn write_unit(
    node: &RoseTree,
    path: &Path,
    base: &Path,
    root: &Path,
    relative_run_path: bool,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    match &node.data.compiled {
        CompiledUnit::Tool(interface) => write_yaml(path, interface)?,
        CompiledUnit::Workflow(wf) => write_yaml(path, wf)?,
    }
    debug!("Wrote {}", path.display());
    written.push(path.to_path_buf());

    for child in &node.children {
        let child_path = base.join(&child.data.run_path);
        let child_base = if relative_run_path {
            child_path.parent().unwrap_or(base).to_path_buf()
        } else {
            root.to_path_buf()
        };
        write_unit(child, &child_path, &child_base, root, relative_run_path, written)?;
    }
    Ok(())
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CompileError::io(parent, e))?;
    }
    let content = serde_yaml::to_string(value).map_err(|e| CompileError::parse(path, e))?;
    fs::write(path, content).map_err(|e| CompileError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::config::CompilerConfig;
    use crate::compiler::driver::compile;
    use crate::compiler::types::CompiledWorkflow;
    use crate::registry::discovery::ToolRegistry;
    use crate::registry::tool::{InputParam, OutputParam, ParamType, Tool, ToolInterface};
    use crate::workflow::model::{Binding, Step, StepId, WorkflowAst, WorkflowTree};
    use tempfile::tempdir;

    fn compile_nested(relative_run_path: bool) -> RoseTree {
        let touch = ToolInterface::command_line_tool()
            .with_input("filename", InputParam::new(ParamType::named("string")))
            .with_output("file", OutputParam::new(ParamType::named("File")));
        let mut registry = ToolRegistry::new().with_tool(StepId::global("touch"), Tool::new("touch.cwl", touch));

        let sub = WorkflowAst::from_steps(vec![Step::new("touch").with_binding("filename", Binding::literal("a.txt"))]);
        let ast = WorkflowAst::from_steps(vec![Step::new("sub.wic").with_subtree(sub)]);
        let config = CompilerConfig {
            relative_run_path,
            ..CompilerConfig::default()
        };

        compile(&WorkflowTree::new(StepId::global("main.wic"), ast), &config, &mut registry)
            .unwrap()
            .rose
    }

    #[test]
    fn test_write_relative_layout() {
        let temp_dir = tempdir().unwrap();
        let rose = compile_nested(true);
        let written = write_to_disk(&rose, temp_dir.path(), true).unwrap();

        let dir = temp_dir.path();
        assert!(dir.join("main.cwl").exists());
        assert!(dir.join("main_inputs.yml").exists());
        assert!(dir.join("main.graph.json").exists());
        assert!(dir.join("main__step__1__sub.wic/sub.cwl").exists());
        assert!(dir.join("main__step__1__sub.wic/sub__step__1__touch/touch.cwl").exists());
        assert_eq!(written.len(), 5);
    }

    #[test]
    fn test_write_flat_layout() {
        let temp_dir = tempdir().unwrap();
        let rose = compile_nested(false);
        write_to_disk(&rose, temp_dir.path(), false).unwrap();

        let dir = temp_dir.path();
        assert!(dir.join("main__step__1__sub.wic___sub.cwl").exists());
        assert!(dir.join("touch.cwl").exists());
    }

    #[test]
    fn test_written_workflow_reads_back() {
        let temp_dir = tempdir().unwrap();
        let rose = compile_nested(true);
        write_to_disk(&rose, temp_dir.path(), true).unwrap();

        let content = fs::read_to_string(temp_dir.path().join("main.cwl")).unwrap();
        let wf: CompiledWorkflow = serde_yaml::from_str(&content).unwrap();
        assert_eq!(wf.steps[0].run, "main__step__1__sub.wic/sub.cwl");

        let inputs = fs::read_to_string(temp_dir.path().join("main_inputs.yml")).unwrap();
        assert!(inputs.contains("main__step__1__sub.wic___sub__step__1__touch___filename: a.txt"));
    }
}
