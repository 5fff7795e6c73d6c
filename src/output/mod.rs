//! Output Module
//!
//! Serializes a compiled tree to disk.
//!
//! - [`writer`]: Workflow, tool, inputs file and graph snapshot writers

pub mod writer;

pub use writer::write_to_disk;
