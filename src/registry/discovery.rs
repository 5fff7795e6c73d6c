//! Tool Registry
//!
//! Maps each [`StepId`] to the [`Tool`] it resolves to. The registry is
//! filled from tool description directories before compilation and only
//! grows during compilation, as compiled subworkflows are registered under
//! their own StepId.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use super::tool::{StepClass, Tool, ToolInterface};
use crate::compiler::error::{CompileError, Result};
use crate::workflow::model::StepId;

/// Extensions of tool description files.
const TOOL_EXTENSIONS: [&str; 2] = ["cwl", "yml"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRegistry {
    tools: BTreeMap<StepId, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous entry.
    pub fn insert(&mut self, id: StepId, tool: Tool) {
        self.tools.insert(id, tool);
    }

    /// Adds a tool (builder form, used in tests and setup code).
    pub fn with_tool(mut self, id: StepId, tool: Tool) -> Self {
        self.insert(id, tool);
        self
    }

    pub fn get(&self, id: &StepId) -> Option<&Tool> {
        self.tools.get(id)
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.tools.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterates in StepId order.
    pub fn iter(&self) -> impl Iterator<Item = (&StepId, &Tool)> {
        self.tools.iter()
    }

    /// Iterates over atomic command line tools only.
    pub fn command_line_tools(&self) -> impl Iterator<Item = (&StepId, &Tool)> {
        self.tools
            .iter()
            .filter(|(_, tool)| tool.interface.step_class() == Some(StepClass::CommandLineTool))
    }

    /// Loads every tool description in `dir` under the plugin namespace `ns`.
    ///
    /// Files that fail to parse are skipped with a warning so one broken
    /// description does not hide the rest of the directory. Returns the
    /// number of tools loaded.
    pub fn load_dir(&mut self, ns: &str, dir: &Path) -> Result<usize> {
        let entries = fs::read_dir(dir).map_err(|e| CompileError::io(dir, e))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| TOOL_EXTENSIONS.contains(&e))
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match read_tool(&path) {
                Ok(interface) => {
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string();
                    debug!("Registered tool {} ({})", stem, path.display());
                    self.insert(
                        StepId::new(stem, ns),
                        Tool::new(path.to_string_lossy().into_owned(), interface),
                    );
                    loaded += 1;
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        info!("Loaded {} tools from {} (namespace '{}')", loaded, dir.display(), ns);
        Ok(loaded)
    }
}

fn read_tool(path: &Path) -> Result<ToolInterface> {
    let content = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
    serde_yaml::from_str(&content).map_err(|e| CompileError::parse(path, e))
}
