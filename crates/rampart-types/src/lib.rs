//! Core types shared across all Rampart crates.
//!
//! Defines the catalog data model, parameter kinds/values, and the shared
//! error enum used by the policy compiler, template engine, runners, and
//! server.

pub mod catalog;
pub mod error;
pub mod param;

pub use catalog::{
    Catalog, McpSection, OutputSpec, ParamSpec, PromptConfig, Requirements, RunDefaults,
    RunnerCandidate, RunnerKind, ToolConfig, ToolRun, DEFAULT_SHELL,
};
pub use error::RampartError;
pub use param::{ParamKind, ParamValue};
