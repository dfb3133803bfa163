//! View binder
//!
//! Collects the bound elements of a view, turns each rule into a handler
//! plus a [`DependencyBinding`], and tears them down again.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use graphbind_model::{ReadTracker, Value};
use tracing::debug;

use crate::binding::DependencyBinding;
use crate::element::{BIND_ATTR, Element};
use crate::error::BindingError;
use crate::handler::{HandlerContext, HandlerSlot};
use crate::parser::Rule;
use crate::view::WeakView;

struct BoundRule {
    element: Element,
    rules: Rc<Vec<Rule>>,
    index: usize,
    slot: Rc<HandlerSlot>,
    binding: DependencyBinding,
}

pub struct ViewBinder {
    view: WeakView,
    elements: RefCell<Vec<(Element, Rc<Vec<Rule>>)>>,
    bound: RefCell<Vec<BoundRule>>,
    built: Cell<bool>,
}

impl ViewBinder {
    pub(crate) fn new(view: WeakView) -> Self {
        Self {
            view,
            elements: RefCell::new(Vec::new()),
            bound: RefCell::new(Vec::new()),
            built: Cell::new(false),
        }
    }

    /// Register `root` and its descendants that carry binding rules
    ///
    /// Rules are parsed and their handlers checked now, so a malformed
    /// string or an unknown handler fails here. Returns the number of
    /// elements registered.
    pub fn parse_elements(&self, root: &Element) -> Result<usize, BindingError> {
        let mut found = Vec::new();
        if let Some(source) = root.attr(BIND_ATTR) {
            found.push((root.clone(), source));
        }
        for element in root.find_bound() {
            if let Some(source) = element.attr(BIND_ATTR) {
                found.push((element, source));
            }
        }

        let mut parsed = Vec::with_capacity(found.len());
        for (element, source) in found {
            parsed.push((element, self.parse(&source)?));
        }
        let count = parsed.len();
        self.elements.borrow_mut().extend(parsed);
        Ok(count)
    }

    /// Register one element with explicit rules
    ///
    /// When bindings are already built, the element is bound right away.
    pub fn add_element(&self, element: &Element, source: &str) -> Result<(), BindingError> {
        let rules = self.parse(source)?;
        self.elements
            .borrow_mut()
            .push((element.clone(), rules.clone()));
        if self.built.get() {
            self.bind_element(element, &rules)?;
        }
        Ok(())
    }

    fn parse(&self, source: &str) -> Result<Rc<Vec<Rule>>, BindingError> {
        let view = self.view.upgrade().ok_or(BindingError::ViewRemoved)?;
        let runtime = view.runtime();
        let rules = runtime.rules().parse(source)?;
        let handlers = runtime.handlers();
        if let Some(rule) = rules.iter().find(|rule| !handlers.contains(&rule.handler)) {
            return Err(BindingError::UnknownHandler(rule.handler.clone()));
        }
        Ok(rules)
    }

    /// Bind every registered element, replacing earlier bindings
    pub fn build_bindings(&self) -> Result<(), BindingError> {
        self.clear_bindings();
        self.built.set(true);
        let elements = self.elements.borrow().clone();
        for (element, rules) in &elements {
            self.bind_element(element, rules)?;
        }
        debug!(bindings = self.binding_count(), "Bindings built");
        Ok(())
    }

    fn bind_element(&self, element: &Element, rules: &Rc<Vec<Rule>>) -> Result<(), BindingError> {
        let view = self.view.upgrade().ok_or(BindingError::ViewRemoved)?;
        for index in 0..rules.len() {
            let handler = view.runtime().handlers().create(&rules[index].handler)?;
            let slot = Rc::new(HandlerSlot::new(handler));
            let binding = DependencyBinding::new(self.run_fn(element, rules, index, &slot));
            self.bound.borrow_mut().push(BoundRule {
                element: element.clone(),
                rules: rules.clone(),
                index,
                slot,
                binding: binding.clone(),
            });
            binding.build()?;
        }
        Ok(())
    }

    fn run_fn(
        &self,
        element: &Element,
        rules: &Rc<Vec<Rule>>,
        index: usize,
        slot: &Rc<HandlerSlot>,
    ) -> Box<dyn Fn(&ReadTracker) -> Result<(), BindingError>> {
        let view = self.view.clone();
        let element = element.clone();
        let rules = rules.clone();
        let slot = slot.clone();
        Box::new(move |tracker: &ReadTracker| {
            let Some(view) = view.upgrade() else {
                return Ok(());
            };
            if view.is_removed() {
                return Ok(());
            }
            let rule = &rules[index];
            let scope = view.scope();
            let values: Vec<Value> = rule
                .args
                .iter()
                .map(|arg| arg.evaluate(&scope, tracker))
                .collect();
            slot.run(&HandlerContext {
                element: &element,
                view: &view,
                rule,
                values: &values,
            })
        })
    }

    /// Unsubscribe every binding and clean up its handler
    pub fn clear_bindings(&self) {
        self.built.set(false);
        let bound = std::mem::take(&mut *self.bound.borrow_mut());
        let view = self.view.upgrade();
        for entry in bound {
            entry.binding.clear();
            if let Some(view) = &view {
                entry.slot.cleanup(&HandlerContext {
                    element: &entry.element,
                    view,
                    rule: &entry.rules[entry.index],
                    values: &[],
                });
            }
        }
    }

    pub fn binding_count(&self) -> usize {
        self.bound.borrow().len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.borrow().len()
    }

    /// Live bindings in bind order
    pub fn bindings(&self) -> Vec<DependencyBinding> {
        self.bound
            .borrow()
            .iter()
            .map(|entry| entry.binding.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindRuntime, Scope, View};

    #[test]
    fn test_parse_elements_includes_root() {
        let root = Element::new("div")
            .with_bind("text: a")
            .with_child(Element::new("span").with_bind("text: b; visible: `true`"));
        let view = View::new(BindRuntime::new(), root, Scope::new());
        assert_eq!(view.binder().parse_elements(view.element()).unwrap(), 2);
        view.binder().build_bindings().unwrap();
        assert_eq!(view.binder().binding_count(), 3);

        view.binder().build_bindings().unwrap();
        assert_eq!(view.binder().binding_count(), 3);
    }

    #[test]
    fn test_unknown_handler_fails_at_parse() {
        let root = Element::new("div").with_bind("nope: x");
        let view = View::new(BindRuntime::new(), root, Scope::new());
        assert_eq!(
            view.binder().parse_elements(view.element()),
            Err(BindingError::UnknownHandler("nope".into()))
        );
        assert_eq!(view.binder().element_count(), 0);
    }

    #[test]
    fn test_add_element_after_build_binds_now() {
        let view = View::new(BindRuntime::new(), Element::new("div"), Scope::new().with("n", 2));
        view.bind().unwrap();

        let extra = Element::new("b");
        view.element().append(&extra);
        view.binder().add_element(&extra, "text: `n * 2`").unwrap();
        assert_eq!(extra.text(), "4");

        view.binder().clear_bindings();
        assert_eq!(view.binder().binding_count(), 0);
    }
}
