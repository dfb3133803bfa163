//! Binding handlers
//!
//! A handler is the element side effect of a rule. Every bound rule gets its
//! own handler instance, created from a factory in the [`HandlerRegistry`],
//! and drives it through a fixed life cycle:
//!
//! ```text
//! Unattached --first run--> setup + exec --> Active --each run--> exec
//!                                               |
//!                                            cleanup --> Cleaned
//! ```
//!
//! `cleanup` must release everything the handler attached outside its
//! binding: element listeners, collection listeners, child views.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use graphbind_model::Value;
use tracing::{trace, warn};

use crate::element::Element;
use crate::error::BindingError;
use crate::parser::Rule;
use crate::view::View;

// ─────────────────────────────────────────────────────────────────────────────
// Handler Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a handler sees on one run
pub struct HandlerContext<'a> {
    pub element: &'a Element,
    pub view: &'a View,
    pub rule: &'a Rule,
    /// Evaluated arguments of this run. Empty during cleanup
    pub values: &'a [Value],
}

impl HandlerContext<'_> {
    /// Argument `index`, `Null` when absent
    pub fn value(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or_default()
    }

    /// Error for this handler
    pub fn invalid(&self, message: impl Into<String>) -> BindingError {
        BindingError::invalid(&self.rule.handler, message)
    }
}

pub trait BindHandler {
    /// First run only, before `exec`
    fn setup(&mut self, _ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        Ok(())
    }

    /// Every run
    fn exec(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError>;

    /// Release external state. Called once
    fn cleanup(&mut self, _ctx: &HandlerContext<'_>) {}
}

/// Stateless handler from a closure
pub struct FnHandler<F>
where
    F: Fn(&HandlerContext<'_>) -> Result<(), BindingError>,
{
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&HandlerContext<'_>) -> Result<(), BindingError>,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> BindHandler for FnHandler<F>
where
    F: Fn(&HandlerContext<'_>) -> Result<(), BindingError>,
{
    fn exec(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        (self.func)(ctx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler Slot
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    Unattached,
    Active,
    Cleaned,
}

/// One handler instance and its life-cycle phase
pub struct HandlerSlot {
    handler: RefCell<Box<dyn BindHandler>>,
    phase: Cell<HandlerPhase>,
}

impl HandlerSlot {
    pub fn new(handler: Box<dyn BindHandler>) -> Self {
        Self {
            handler: RefCell::new(handler),
            phase: Cell::new(HandlerPhase::Unattached),
        }
    }

    pub fn phase(&self) -> HandlerPhase {
        self.phase.get()
    }

    pub fn run(&self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        let Ok(mut handler) = self.handler.try_borrow_mut() else {
            trace!(handler = %ctx.rule.handler, "Handler already running, skipping nested run");
            return Ok(());
        };
        match self.phase.get() {
            HandlerPhase::Cleaned => Ok(()),
            HandlerPhase::Unattached => {
                handler.setup(ctx)?;
                self.phase.set(HandlerPhase::Active);
                handler.exec(ctx)
            }
            HandlerPhase::Active => handler.exec(ctx),
        }
    }

    pub fn cleanup(&self, ctx: &HandlerContext<'_>) {
        let was_active = self.phase.replace(HandlerPhase::Cleaned) == HandlerPhase::Active;
        if !was_active {
            return;
        }
        match self.handler.try_borrow_mut() {
            Ok(mut handler) => handler.cleanup(ctx),
            Err(_) => warn!(handler = %ctx.rule.handler, "Handler cleaned up while running"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Creates a fresh handler for each bound rule
pub type HandlerFactory = Rc<dyn Fn() -> Box<dyn BindHandler>>;

/// Handlers by rule name
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFactory>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry holding the built-in handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::handlers::register_builtins(&mut registry);
        registry
    }

    /// Register a handler factory, replacing any handler of the same name
    pub fn set_handler(&mut self, name: &str, factory: HandlerFactory) {
        if self.handlers.insert(name.to_string(), factory).is_some() {
            warn!(handler = name, "Overriding binding handler");
        }
    }

    /// Register a stateless handler
    pub fn register_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&HandlerContext<'_>) -> Result<(), BindingError> + Clone + 'static,
    {
        self.set_handler(
            name,
            Rc::new(move || Box::new(FnHandler::new(func.clone())) as Box<dyn BindHandler>),
        );
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn BindHandler>, BindingError> {
        self.handlers
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| BindingError::UnknownHandler(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
