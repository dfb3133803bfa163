//! In-memory element tree
//!
//! [`Element`] is the surface binding handlers write to: attributes, inline
//! styles, text or markup content, a form value and child elements. It
//! renders to HTML for inspection and emits `change` notifications when its
//! value is edited through [`Element::input`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use graphbind_model::escape_html;

/// Attribute holding binding rules
pub const BIND_ATTR: &str = "data-bind";

/// Handle of a change listener on an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeListenerId(u64);

type ChangeCallback = Rc<dyn Fn(&Element)>;

#[derive(Debug, Clone, PartialEq)]
enum Content {
    Empty,
    Text(String),
    Html(String),
}

struct ElementState {
    attrs: BTreeMap<String, String>,
    styles: BTreeMap<String, String>,
    content: Content,
    value: String,
    children: Vec<Element>,
    parent: Option<Weak<ElementInner>>,
}

struct ElementInner {
    tag: String,
    state: RefCell<ElementState>,
    listeners: RefCell<Vec<(ChangeListenerId, ChangeCallback)>>,
    next_listener: Cell<u64>,
}

/// Shared handle to an element
#[derive(Clone)]
pub struct Element(Rc<ElementInner>);

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Element {}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Element(<{}>)", self.0.tag)
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_html())
    }
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Element(Rc::new(ElementInner {
            tag: tag.into(),
            state: RefCell::new(ElementState {
                attrs: BTreeMap::new(),
                styles: BTreeMap::new(),
                content: Content::Empty,
                value: String::new(),
                children: Vec::new(),
                parent: None,
            }),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        }))
    }

    /// Builder: set an attribute
    pub fn with_attr(self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder: set the binding rules
    pub fn with_bind(self, rules: impl Into<String>) -> Self {
        self.with_attr(BIND_ATTR, rules)
    }

    /// Builder: append a child
    pub fn with_child(self, child: Element) -> Self {
        self.append(&child);
        self
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    // ─────────────────────────────────────────────────────────────────────
    // Attributes and Styles
    // ─────────────────────────────────────────────────────────────────────

    pub fn attr(&self, name: &str) -> Option<String> {
        self.0.state.borrow().attrs.get(name).cloned()
    }

    pub fn set_attr(&self, name: &str, value: impl Into<String>) {
        self.0
            .state
            .borrow_mut()
            .attrs
            .insert(name.to_string(), value.into());
    }

    pub fn remove_attr(&self, name: &str) -> Option<String> {
        self.0.state.borrow_mut().attrs.remove(name)
    }

    pub fn css(&self, name: &str) -> Option<String> {
        self.0.state.borrow().styles.get(name).cloned()
    }

    /// Set an inline style. An empty value removes it
    pub fn set_css(&self, name: &str, value: &str) {
        let mut state = self.0.state.borrow_mut();
        if value.is_empty() {
            state.styles.remove(name);
        } else {
            state.styles.insert(name.to_string(), value.to_string());
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────────────

    /// Text content, including descendants
    pub fn text(&self) -> String {
        let state = self.0.state.borrow();
        match &state.content {
            Content::Text(text) => text.clone(),
            Content::Html(html) => html.clone(),
            Content::Empty => state.children.iter().map(Element::text).collect(),
        }
    }

    /// Replace the content with text. Children are detached
    pub fn set_text(&self, text: impl Into<String>) {
        self.replace_content(Content::Text(text.into()));
    }

    /// Inner markup
    pub fn html(&self) -> String {
        let state = self.0.state.borrow();
        match &state.content {
            Content::Text(text) => escape_html(text),
            Content::Html(html) => html.clone(),
            Content::Empty => state.children.iter().map(Element::to_html).collect(),
        }
    }

    /// Replace the content with raw markup. Children are detached
    pub fn set_html(&self, html: impl Into<String>) {
        self.replace_content(Content::Html(html.into()));
    }

    fn replace_content(&self, content: Content) {
        let children = {
            let mut state = self.0.state.borrow_mut();
            state.content = content;
            std::mem::take(&mut state.children)
        };
        for child in children {
            child.0.state.borrow_mut().parent = None;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Form Value
    // ─────────────────────────────────────────────────────────────────────

    pub fn value(&self) -> String {
        self.0.state.borrow().value.clone()
    }

    /// Set the value programmatically. No change notification fires
    pub fn set_value(&self, value: impl Into<String>) {
        self.0.state.borrow_mut().value = value.into();
    }

    /// Set the value as a user edit and notify change listeners
    pub fn input(&self, value: impl Into<String>) {
        self.set_value(value);
        self.dispatch_change();
    }

    pub fn on_change(&self, callback: Rc<dyn Fn(&Element)>) -> ChangeListenerId {
        let id = ChangeListenerId(self.0.next_listener.get() + 1);
        self.0.next_listener.set(id.0);
        self.0.listeners.borrow_mut().push((id, callback));
        id
    }

    pub fn off_change(&self, id: ChangeListenerId) -> bool {
        let mut listeners = self.0.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        before != listeners.len()
    }

    pub fn change_listener_count(&self) -> usize {
        self.0.listeners.borrow().len()
    }

    /// Notify change listeners
    pub fn dispatch_change(&self) {
        let snapshot: Vec<ChangeCallback> = self
            .0
            .listeners
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in snapshot {
            callback(self);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tree
    // ─────────────────────────────────────────────────────────────────────

    pub fn children(&self) -> Vec<Element> {
        self.0.state.borrow().children.clone()
    }

    pub fn parent(&self) -> Option<Element> {
        self.0
            .state
            .borrow()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Element)
    }

    /// Append a child, moving it out of its current parent
    pub fn append(&self, child: &Element) {
        self.insert(child, usize::MAX);
    }

    /// Insert a child first
    pub fn prepend(&self, child: &Element) {
        self.insert(child, 0);
    }

    /// Insert a child at `index`, clamped to the number of children
    pub fn insert(&self, child: &Element, index: usize) {
        child.remove();
        let mut state = self.0.state.borrow_mut();
        state.content = Content::Empty;
        let index = index.min(state.children.len());
        state.children.insert(index, child.clone());
        child.0.state.borrow_mut().parent = Some(Rc::downgrade(&self.0));
    }

    /// Detach from the parent
    pub fn remove(&self) {
        let Some(parent) = self.parent() else {
            return;
        };
        parent
            .0
            .state
            .borrow_mut()
            .children
            .retain(|c| c != self);
        self.0.state.borrow_mut().parent = None;
    }

    /// Descendants carrying binding rules, in document order
    pub fn find_bound(&self) -> Vec<Element> {
        let mut found = Vec::new();
        for child in self.children() {
            if child.attr(BIND_ATTR).is_some() {
                found.push(child.clone());
            }
            found.extend(child.find_bound());
        }
        found
    }

    /// Outer markup
    pub fn to_html(&self) -> String {
        let state = self.0.state.borrow();
        let mut out = format!("<{}", self.0.tag);
        for (name, value) in &state.attrs {
            out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
        }
        if !state.styles.is_empty() {
            let style: Vec<String> = state
                .styles
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect();
            out.push_str(&format!(" style=\"{}\"", escape_html(&style.join("; "))));
        }
        if !state.value.is_empty() {
            out.push_str(&format!(" value=\"{}\"", escape_html(&state.value)));
        }
        out.push('>');
        drop(state);
        out.push_str(&self.html());
        out.push_str(&format!("</{}>", self.0.tag));
        out
    }
}
