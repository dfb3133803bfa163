//! Graphbind Schema - Declarative model definitions
//!
//! This crate contains the pure data structures that describe an API: which
//! model types exist, how their attributes are typed, where they live on the
//! server and how they are validated. It has no knowledge of live entities;
//! `graphbind_model` consumes a [`SchemaRegistry`] to hydrate and sync them.

mod definitions;
mod registry;
mod types;

pub use definitions::*;
pub use registry::*;
pub use types::*;
