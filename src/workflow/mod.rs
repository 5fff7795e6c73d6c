//! Workflow Definition Module
//!
//! Provides data structures and utilities for parsing and validating
//! workflows written in the YAML workflow language.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, Binding, WorkflowAst)
//! - [`namespace`]: Synthetic step names and namespace paths
//! - [`parser`]: YAML parsing and subworkflow tree loading
//! - [`validator`]: Structural checks before and after compilation

pub mod model;
pub mod namespace;
pub mod parser;
pub mod validator;

pub use model::{Binding, OutputEntry, SourceRef, Step, StepId, WorkflowAst, WorkflowTree};
pub use parser::{load_workflow_tree, read_workflow, save_workflow};
pub use validator::{validate_tree, ValidationError};
