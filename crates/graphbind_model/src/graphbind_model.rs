//! Graphbind Model - Live entity graph
//!
//! This crate turns schema definitions into live, observable data:
//! entities with change cycles, ordered collections, a registry that keeps
//! one instance per identifier, nested-path change subscriptions and the
//! transport glue that keeps everything in step with a remote API.
//!
//! Everything here is single-threaded. Handles are `Rc` based and events
//! are dispatched synchronously.

pub use graphbind_schema;

mod change_map;
mod coercion;
mod collection;
mod entity;
mod error;
mod events;
mod registry;
mod store;
mod sync;
mod tracking;
mod transport;
mod validation;
mod value;

pub use coercion::coerce_date;
pub use collection::*;
pub use entity::*;
pub use error::*;
pub use events::*;
pub use registry::*;
pub use store::*;
pub use sync::*;
pub use tracking::*;
pub use transport::*;
pub use validation::{ValidationErrors, Validator};
pub use value::*;
