//! Graphbind - Live entity graphs bound to views
//!
//! This crate ties the workspace together:
//! - Schema configuration via `graphbind_schema`
//! - The deduplicated, observable entity graph via `graphbind_model`
//! - Dependency-tracked element bindings via `graphbind_view`
//! - Project loading and the command implementations behind the CLI

// Re-export core crates
pub use graphbind_model;
pub use graphbind_schema;
pub use graphbind_view;

// Configuration and fixture loading
pub mod project;

// `hydrate` and `render`
pub mod commands;
