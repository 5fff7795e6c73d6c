//! Compiler Module
//!
//! Turns a tree of workflow ASTs into a tree of flat, namespaced workflow
//! documents plus the tool interfaces they reference.
//!
//! # Structure
//!
//! - [`driver`]: Fixed-point iteration over the single-pass rewriter
//! - [`rewriter`]: One compilation pass over a workflow
//! - [`inference`]: Implicit edge inference and step insertion
//! - [`inputs`]: Inputs file population
//! - [`graph`]: Graph snapshot accumulation
//! - [`types`]: Compiled artifacts and the compiled tree
//! - [`config`]: Compiler switches and global configuration
//! - [`error`]: Error types

pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod inference;
pub mod inputs;
pub mod rewriter;
pub mod types;

pub use config::{CompilerConfig, GlobalConfig, GraphOptions, InferenceConfig, InferenceRule};
pub use driver::{compile, CompileContext, Compiler};
pub use error::{CompileError, Result};
pub use graph::GraphData;
pub use types::{CompiledStep, CompiledUnit, CompiledWorkflow, CompilerInfo, EnvData, NodeData, RoseTree};
