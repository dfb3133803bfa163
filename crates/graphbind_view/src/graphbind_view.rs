//! Graphbind View - Declarative element bindings
//!
//! Elements carry binding strings in their `data-bind` attribute
//! (`text: ~user:name; visible: ~user:active`). A [`View`] parses them into
//! rules, runs each rule's handler inside a [`DependencyBinding`] and reruns
//! it exactly when an entity attribute or collection it read changes.
//!
//! The element tree is in-memory ([`Element`]) and renders to HTML.

mod binder;
mod binding;
mod element;
mod error;
pub mod expr;
mod handler;
mod handlers;
mod parser;
mod scope;
mod view;

pub use binder::*;
pub use binding::*;
pub use element::*;
pub use error::*;
pub use handler::*;
pub use parser::*;
pub use scope::*;
pub use view::*;
