//! Tool Registry Module
//!
//! Resolves step keys to the interfaces of the tools and subworkflows they
//! refer to.
//!
//! # Structure
//!
//! - [`tool`]: Tool interface model (parameters, types, formats)
//! - [`discovery`]: The registry and loading of tool descriptions

pub mod discovery;
pub mod tool;

pub use discovery::ToolRegistry;
pub use tool::{InputParam, OutputParam, ParamType, StepClass, Tool, ToolInterface};
