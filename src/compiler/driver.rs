//! Fixed-Point Driver
//!
//! Compiling a workflow can modify its own AST (edge inference may insert
//! conversion steps), so a single pass is not enough. The driver repeats
//! the single-pass rewriter until the AST it returns equals the AST it was
//! given.
//!
//! Every pass runs against a private copy of the ancestor graph stack.
//! Only the copy from the converged pass is written back, so abandoned
//! passes leave no duplicate nodes or edges behind.

use indexmap::IndexMap;
use log::{debug, info};

use super::config::CompilerConfig;
use super::error::{CompileError, Result};
use super::graph::GraphData;
use super::types::{CompilerInfo, ExplicitEdgeCalls, ExplicitEdgeDefs};
use crate::registry::discovery::ToolRegistry;
use crate::workflow::model::WorkflowTree;
use crate::workflow::validator::{check_completeness, validate_tree};

/// Upper bound on rewriter passes per workflow.
pub const MAX_FIXED_POINT_ITERATIONS: usize = 100;

/// Inherited state for compiling one workflow.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    /// Path of synthetic step names from the root to this workflow
    pub namespaces: Vec<String>,
    pub explicit_edge_defs: ExplicitEdgeDefs,
    pub explicit_edge_calls: ExplicitEdgeCalls,
    pub input_mapping: IndexMap<String, Vec<String>>,
    pub output_mapping: IndexMap<String, String>,
    pub is_root: bool,
}

impl CompileContext {
    /// Context of a root workflow.
    pub fn root() -> Self {
        Self {
            is_root: true,
            ..Self::default()
        }
    }
}

/// Recursive workflow compiler.
///
/// Holds the configuration and a mutable borrow of the tool registry, into
/// which every compiled subworkflow is registered.
pub struct Compiler<'a> {
    pub(crate) config: &'a CompilerConfig,
    pub(crate) registry: &'a mut ToolRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(config: &'a CompilerConfig, registry: &'a mut ToolRegistry) -> Self {
        Self { config, registry }
    }

    /// Compiles a root workflow and checks that nothing was left unbound.
    pub fn compile_root(&mut self, tree: &WorkflowTree) -> Result<CompilerInfo> {
        validate_tree(tree)?;

        let mut stack = vec![GraphData::new(tree.stem())];
        let info = self.compile_workflow(tree, &CompileContext::root(), &mut stack)?;

        check_completeness(&info.rose)?;
        info!(
            "Compiled '{}' ({} units)",
            tree.step_id.stem,
            info.rose.flatten().len()
        );
        Ok(info)
    }

    /// Compiles one workflow to a fixed point.
    ///
    /// `stack` holds the graphs of this workflow and all of its ancestors,
    /// innermost last.
    pub fn compile_workflow(
        &mut self,
        tree: &WorkflowTree,
        ctx: &CompileContext,
        stack: &mut Vec<GraphData>,
    ) -> Result<CompilerInfo> {
        let mut current = tree.clone();

        for iteration in 0..MAX_FIXED_POINT_ITERATIONS {
            let mut speculative = stack.clone();
            let (info, ast) = self.compile_workflow_once(&current, ctx, &mut speculative)?;

            if ast == current.ast {
                for (graph, committed) in stack.iter_mut().zip(speculative) {
                    *graph = committed;
                }
                return Ok(info);
            }

            debug!(
                "AST of '{}' modified on pass {}, recompiling",
                tree.step_id.stem,
                iteration + 1
            );
            current = WorkflowTree::new(tree.step_id.clone(), ast);
        }

        Err(CompileError::FixedPointDivergence {
            workflow: tree.step_id.stem.clone(),
            iterations: MAX_FIXED_POINT_ITERATIONS,
            last_ast: serde_yaml::to_string(&current.ast).unwrap_or_default(),
        })
    }
}

/// Compiles a root workflow with the given configuration.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use rustweaver::compiler::{compile, CompilerConfig};
/// use rustweaver::registry::ToolRegistry;
/// use rustweaver::workflow::parser::load_workflow_tree;
///
/// let mut registry = ToolRegistry::new();
/// registry.load_dir("global", Path::new("cwl_adapters"))?;
/// let tree = load_workflow_tree(Path::new("main.wic"), &[])?;
/// let info = compile(&tree, &CompilerConfig::default(), &mut registry)?;
/// println!("{} steps", info.rose.children.len());
/// # Ok::<(), rustweaver::compiler::CompileError>(())
/// ```
pub fn compile(tree: &WorkflowTree, config: &CompilerConfig, registry: &mut ToolRegistry) -> Result<CompilerInfo> {
    Compiler::new(config, registry).compile_root(tree)
}
