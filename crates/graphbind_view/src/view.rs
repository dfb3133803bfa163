//! Views
//!
//! A [`View`] pairs an element tree with a [`Scope`] and the bindings built
//! from the tree's rules. Named view templates live in a [`ViewRegistry`] so
//! the `collection` and `view` handlers can create child views by name.
//! Handlers, templates and the rule cache are shared through a
//! [`BindRuntime`].

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use graphbind_model::Value;
use tracing::{debug, trace};

use crate::binder::ViewBinder;
use crate::element::Element;
use crate::error::BindingError;
use crate::handler::{HandlerFactory, HandlerRegistry};
use crate::parser::RuleCache;
use crate::scope::Scope;

/// Function a view exposes to the `fn` handler
pub type ViewFunction = Rc<dyn Fn(&View, &Element, &[Value]) -> Result<(), BindingError>>;

// ─────────────────────────────────────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────────────────────────────────────

/// Blueprint for a named view
#[derive(Clone)]
pub struct ViewTemplate {
    build: Rc<dyn Fn() -> Element>,
    functions: HashMap<String, ViewFunction>,
}

impl ViewTemplate {
    /// `build` creates a fresh element tree for every view instance
    pub fn new(build: impl Fn() -> Element + 'static) -> Self {
        Self {
            build: Rc::new(build),
            functions: HashMap::new(),
        }
    }

    /// Builder: expose a function to the `fn` handler
    pub fn function(
        mut self,
        name: &str,
        func: impl Fn(&View, &Element, &[Value]) -> Result<(), BindingError> + 'static,
    ) -> Self {
        self.functions.insert(name.to_string(), Rc::new(func));
        self
    }
}

#[derive(Default)]
pub struct ViewRegistry {
    templates: HashMap<String, ViewTemplate>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, template: ViewTemplate) -> Result<(), BindingError> {
        if self.templates.contains_key(name) {
            return Err(BindingError::DuplicateView(name.to_string()));
        }
        self.templates.insert(name.to_string(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ViewTemplate> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Handlers, view templates and parsed rules shared by a tree of views
pub struct BindRuntime {
    handlers: RefCell<HandlerRegistry>,
    views: RefCell<ViewRegistry>,
    rules: RuleCache,
}

impl BindRuntime {
    /// Runtime with the built-in handlers
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            handlers: RefCell::new(HandlerRegistry::with_builtins()),
            views: RefCell::new(ViewRegistry::new()),
            rules: RuleCache::new(),
        })
    }

    pub fn handlers(&self) -> Ref<'_, HandlerRegistry> {
        self.handlers.borrow()
    }

    pub fn handlers_mut(&self) -> RefMut<'_, HandlerRegistry> {
        self.handlers.borrow_mut()
    }

    pub fn set_handler(&self, name: &str, factory: HandlerFactory) {
        self.handlers.borrow_mut().set_handler(name, factory);
    }

    pub fn register_view(&self, name: &str, template: ViewTemplate) -> Result<(), BindingError> {
        self.views.borrow_mut().register(name, template)
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.views.borrow().contains(name)
    }

    pub fn rules(&self) -> &RuleCache {
        &self.rules
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// View
// ─────────────────────────────────────────────────────────────────────────────

struct ViewInner {
    name: Option<String>,
    element: Element,
    scope: RefCell<Scope>,
    runtime: Rc<BindRuntime>,
    binder: ViewBinder,
    functions: RefCell<HashMap<String, ViewFunction>>,
    children: RefCell<Vec<View>>,
    removed: Cell<bool>,
}

/// Shared handle to a view
#[derive(Clone)]
pub struct View(Rc<ViewInner>);

/// Non-owning handle, held by element listeners and bindings
#[derive(Clone)]
pub struct WeakView(Weak<ViewInner>);

impl WeakView {
    pub fn upgrade(&self) -> Option<View> {
        self.0.upgrade().map(View)
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("name", &self.0.name)
            .field("element", &self.0.element)
            .field("removed", &self.0.removed.get())
            .finish()
    }
}

impl View {
    /// Anonymous view over an existing element
    pub fn new(runtime: Rc<BindRuntime>, element: Element, scope: Scope) -> Self {
        Self::with_parts(runtime, None, element, scope, HashMap::new())
    }

    /// Instantiate the registered template `name`
    pub fn create(runtime: &Rc<BindRuntime>, name: &str, scope: Scope) -> Result<Self, BindingError> {
        let template = runtime
            .views
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| BindingError::UnknownView(name.to_string()))?;
        let element = (template.build)();
        trace!(view = name, "Creating view");
        Ok(Self::with_parts(
            runtime.clone(),
            Some(name.to_string()),
            element,
            scope,
            template.functions,
        ))
    }

    fn with_parts(
        runtime: Rc<BindRuntime>,
        name: Option<String>,
        element: Element,
        scope: Scope,
        functions: HashMap<String, ViewFunction>,
    ) -> Self {
        View(Rc::new_cyclic(|weak| ViewInner {
            name,
            element,
            scope: RefCell::new(scope),
            runtime,
            binder: ViewBinder::new(WeakView(weak.clone())),
            functions: RefCell::new(functions),
            children: RefCell::new(Vec::new()),
            removed: Cell::new(false),
        }))
    }

    pub fn downgrade(&self) -> WeakView {
        WeakView(Rc::downgrade(&self.0))
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn element(&self) -> &Element {
        &self.0.element
    }

    pub fn runtime(&self) -> &Rc<BindRuntime> {
        &self.0.runtime
    }

    pub fn binder(&self) -> &ViewBinder {
        &self.0.binder
    }

    /// Snapshot of the scope
    pub fn scope(&self) -> Scope {
        self.0.scope.borrow().clone()
    }

    /// Rebind `name` and rerun the bindings against the new scope
    pub fn set_scope(&self, name: &str, value: impl Into<Value>) -> Result<(), BindingError> {
        self.0.scope.borrow_mut().set(name, value);
        if self.0.binder.binding_count() > 0 {
            self.0.binder.build_bindings()?;
        }
        Ok(())
    }

    /// Parse the element tree and build its bindings
    pub fn bind(&self) -> Result<(), BindingError> {
        if self.is_removed() {
            return Err(BindingError::ViewRemoved);
        }
        if self.0.binder.element_count() == 0 {
            self.0.binder.parse_elements(&self.0.element)?;
        }
        self.0.binder.build_bindings()
    }

    pub fn add_function(
        &self,
        name: &str,
        func: impl Fn(&View, &Element, &[Value]) -> Result<(), BindingError> + 'static,
    ) {
        self.0
            .functions
            .borrow_mut()
            .insert(name.to_string(), Rc::new(func));
    }

    /// Call a view function on behalf of `element`
    pub fn call(&self, name: &str, element: &Element, args: &[Value]) -> Result<(), BindingError> {
        let func = self
            .0
            .functions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| BindingError::UnknownFunction(name.to_string()))?;
        func(self, element, args)
    }

    /// Own `child`: it is removed together with this view
    pub fn add_child(&self, child: View) {
        self.0.children.borrow_mut().push(child);
    }

    pub fn children(&self) -> Vec<View> {
        self.0.children.borrow().clone()
    }

    pub fn is_removed(&self) -> bool {
        self.0.removed.get()
    }

    /// Tear the view down
    ///
    /// Child views go first, then every binding is cleared and its handler
    /// cleaned up, then the element leaves its parent.
    pub fn remove(&self) {
        if self.0.removed.get() {
            return;
        }
        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in children {
            child.remove();
        }
        self.0.binder.clear_bindings();
        self.0.removed.set(true);
        self.0.element.remove();
        debug!(view = ?self.0.name, "View removed");
    }

    /// Current markup of the element tree
    pub fn render(&self) -> String {
        self.0.element.to_html()
    }
}
