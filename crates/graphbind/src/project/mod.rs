//! Project management
//!
//! A project is an API configuration (`graphbind.toml` or a JSON file)
//! turned into a checked [`SchemaRegistry`](graphbind_schema::SchemaRegistry).

mod loader;

pub use loader::*;
