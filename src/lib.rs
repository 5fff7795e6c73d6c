//! RustWeaver - Hierarchical Workflow Compiler
//!
//! Compiles workflows written in a compact YAML workflow language into
//! flat, fully namespaced workflow documents. Steps only name the tools
//! they run; the compiler infers the edges between them, inserts format
//! conversion steps where needed and inlines subworkflows recursively.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Workflow ASTs, namespaces, loading and validation
//! - [`registry`]: Tool interfaces and the tool registry
//! - [`compiler`]: The fixed-point compiler and its artifacts
//! - [`output`]: Writing compiled trees to disk
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use rustweaver::{compile, load_workflow_tree, write_to_disk, CompilerConfig, ToolRegistry};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Register the available tools
//!     let mut registry = ToolRegistry::new();
//!     registry.load_dir("global", Path::new("cwl_adapters"))?;
//!
//!     // Load the workflow and its subworkflows
//!     let tree = load_workflow_tree(Path::new("main.wic"), &[])?;
//!
//!     // Compile and write the results
//!     let config = CompilerConfig::default();
//!     let info = compile(&tree, &config, &mut registry)?;
//!     write_to_disk(&info.rose, Path::new("autogenerated"), config.relative_run_path)?;
//!     Ok(())
//! }
//! ```

pub mod compiler;
pub mod output;
pub mod registry;
pub mod workflow;

// Re-export commonly used types
pub use compiler::{compile, CompileError, CompilerConfig, CompilerInfo, GlobalConfig, RoseTree};
pub use output::write_to_disk;
pub use registry::ToolRegistry;
pub use workflow::model::{Binding, Step, StepId, WorkflowAst, WorkflowTree};
pub use workflow::parser::load_workflow_tree;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "RustWeaver";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "RustWeaver");
    }

    #[test]
    fn test_module_exports_step() {
        let step = Step::new("touch").with_binding("filename", Binding::literal("empty.txt"));
        assert_eq!(step.key, "touch");
        assert_eq!(step.bindings.len(), 1);
    }

    #[test]
    fn test_module_exports_registry() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
