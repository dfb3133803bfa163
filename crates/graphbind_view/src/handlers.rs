//! Built-in binding handlers

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use graphbind_model::{ALL, Collection, Entity, Event, EventData, ListenerId, Value, coerce_date};
use tracing::{debug, info, warn};

use crate::element::{ChangeListenerId, Element};
use crate::error::BindingError;
use crate::handler::{BindHandler, HandlerContext, HandlerRegistry};
use crate::parser::Arg;
use crate::scope::{DEFAULT_SCOPE, Scope};
use crate::view::{BindRuntime, View, WeakView};

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn register_builtins(registry: &mut HandlerRegistry) {
    registry.register_fn("text", |ctx: &HandlerContext<'_>| {
        ctx.element.set_text(joined(ctx.values));
        Ok(())
    });
    registry.register_fn("html", |ctx: &HandlerContext<'_>| {
        ctx.element.set_html(joined(ctx.values));
        Ok(())
    });
    registry.register_fn("attr", |ctx: &HandlerContext<'_>| {
        let name = ctx.value(0).to_display_string();
        if name.is_empty() {
            return Err(ctx.invalid("missing attribute name"));
        }
        set_or_remove_attr(ctx.element, &name, &ctx.value(1));
        Ok(())
    });
    for name in ["href", "src", "alt"] {
        registry.register_fn(name, move |ctx: &HandlerContext<'_>| {
            set_or_remove_attr(ctx.element, name, &ctx.value(0));
            Ok(())
        });
    }
    registry.register_fn("css", |ctx: &HandlerContext<'_>| {
        let property = ctx.value(0).to_display_string();
        if property.is_empty() {
            return Err(ctx.invalid("missing style property"));
        }
        ctx.element.set_css(&property, &ctx.value(1).to_display_string());
        Ok(())
    });
    registry.register_fn("value", |ctx: &HandlerContext<'_>| {
        ctx.element.set_value(ctx.value(0).to_display_string());
        Ok(())
    });
    registry.register_fn("visible", |ctx: &HandlerContext<'_>| {
        let display = if ctx.value(0).is_truthy() { "" } else { "none" };
        ctx.element.set_css("display", display);
        Ok(())
    });
    registry.register_fn("log", |ctx: &HandlerContext<'_>| {
        let values: Vec<String> = ctx.values.iter().map(Value::to_display_string).collect();
        info!(element = %ctx.element.tag(), ?values, "Binding log");
        Ok(())
    });
    registry.register_fn("date", |ctx: &HandlerContext<'_>| {
        let format = match ctx.values.get(1) {
            Some(format) => format.to_display_string(),
            None => DEFAULT_DATE_FORMAT.to_string(),
        };
        let text = format_date(&ctx.value(0), &format).ok_or_else(|| ctx.invalid(format!("invalid date format {format:?}")))?;
        ctx.element.set_text(text);
        Ok(())
    });
    registry.register_fn("fn", |ctx: &HandlerContext<'_>| {
        let name = ctx.value(0).to_display_string();
        if name.is_empty() {
            return Err(ctx.invalid("missing function name"));
        }
        ctx.view.call(&name, ctx.element, ctx.values.get(1..).unwrap_or_default())
    });

    registry.set_handler("class", Rc::new(|| Box::new(ClassHandler::default()) as Box<dyn BindHandler>));
    registry.set_handler("length", Rc::new(|| Box::new(LengthHandler::default()) as Box<dyn BindHandler>));
    registry.set_handler("input", Rc::new(|| Box::new(InputHandler::default()) as Box<dyn BindHandler>));
    registry.set_handler("collection", Rc::new(|| Box::new(CollectionHandler::default()) as Box<dyn BindHandler>));
    registry.set_handler("view", Rc::new(|| Box::new(ViewHandler::default()) as Box<dyn BindHandler>));
}

fn joined(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `null` and `false` remove the attribute
fn set_or_remove_attr(element: &Element, name: &str, value: &Value) {
    match value {
        Value::Null | Value::Bool(false) => {
            element.remove_attr(name);
        }
        other => element.set_attr(name, other.to_display_string()),
    }
}

/// `None` when the format string is invalid
fn format_date(value: &Value, format: &str) -> Option<String> {
    let date = match value {
        Value::Null => return Some(String::new()),
        Value::Date(date) => *date,
        Value::String(_) | Value::Int(_) | Value::Float(_) => match coerce_date(value.to_json()) {
            Value::Date(date) => date,
            other => return Some(other.to_display_string()),
        },
        other => return Some(other.to_display_string()),
    };
    let mut out = String::new();
    write!(out, "{}", date.format(format)).ok()?;
    Some(out)
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Entity(a), Value::Entity(b)) => a == b,
        (Value::Collection(a), Value::Collection(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// class
// ─────────────────────────────────────────────────────────────────────────────

/// `class: name ~flag` toggles `name`; `class: ~value` keeps one class
/// named after the value
#[derive(Default)]
struct ClassHandler {
    added: Option<String>,
}

fn toggle_class(element: &Element, class: &str, on: bool) {
    let current = element.attr("class").unwrap_or_default();
    let mut classes: Vec<&str> = current.split_whitespace().filter(|c| *c != class).collect();
    if on {
        classes.push(class);
    }
    if classes.is_empty() {
        element.remove_attr("class");
    } else {
        element.set_attr("class", classes.join(" "));
    }
}

impl BindHandler for ClassHandler {
    fn exec(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        if ctx.values.len() >= 2 {
            let class = ctx.value(0).to_display_string();
            if !class.is_empty() {
                toggle_class(ctx.element, &class, ctx.value(1).is_truthy());
            }
            return Ok(());
        }
        if let Some(previous) = self.added.take() {
            toggle_class(ctx.element, &previous, false);
        }
        let class = ctx.value(0).to_display_string();
        if !class.is_empty() {
            toggle_class(ctx.element, &class, true);
            self.added = Some(class);
        }
        Ok(())
    }

    fn cleanup(&mut self, ctx: &HandlerContext<'_>) {
        if let Some(previous) = self.added.take() {
            toggle_class(ctx.element, &previous, false);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// length
// ─────────────────────────────────────────────────────────────────────────────

/// Size of a string, array or collection. Collections stay live
#[derive(Default)]
struct LengthHandler {
    watched: Option<(Collection, ListenerId)>,
}

impl LengthHandler {
    fn unwatch(&mut self) {
        if let Some((collection, id)) = self.watched.take() {
            collection.off(id);
        }
    }
}

impl BindHandler for LengthHandler {
    fn exec(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        let value = ctx.value(0);
        match &value {
            Value::Collection(collection) => {
                let watching = self.watched.as_ref().is_some_and(|(c, _)| c == collection);
                if !watching {
                    self.unwatch();
                    let element = ctx.element.clone();
                    let weak = collection.downgrade();
                    let id = collection.on(
                        ALL,
                        Rc::new(move |_event: &Event| {
                            if let Some(collection) = weak.upgrade() {
                                element.set_text(collection.len().to_string());
                            }
                        }),
                    );
                    self.watched = Some((collection.clone(), id));
                }
            }
            _ => self.unwatch(),
        }
        ctx.element.set_text(value.len().unwrap_or(0).to_string());
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &HandlerContext<'_>) {
        self.unwatch();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// input
// ─────────────────────────────────────────────────────────────────────────────

/// Two-way binding between the element value and an entity attribute
#[derive(Default)]
struct InputHandler {
    listener: Option<ChangeListenerId>,
}

impl BindHandler for InputHandler {
    fn setup(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        let accessor = ctx
            .rule
            .args
            .first()
            .and_then(Arg::as_accessor)
            .filter(|accessor| accessor.path.is_some())
            .ok_or_else(|| ctx.invalid("expects an accessor with a path"))?;
        let scope_name = accessor.scope.clone();
        let path = accessor.path.clone().unwrap_or_default();
        let view: WeakView = ctx.view.downgrade();

        let id = ctx.element.on_change(Rc::new(move |element: &Element| {
            let Some(view) = view.upgrade() else {
                return;
            };
            write_back(&view.scope(), &scope_name, &path, element.value());
        }));
        self.listener = Some(id);
        Ok(())
    }

    fn exec(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        let text = ctx.value(0).to_display_string();
        if ctx.element.value() != text {
            ctx.element.set_value(text);
        }
        Ok(())
    }

    fn cleanup(&mut self, ctx: &HandlerContext<'_>) {
        if let Some(id) = self.listener.take() {
            ctx.element.off_change(id);
        }
    }
}

/// Write `text` at `path` into the deepest entity along it
fn write_back(scope: &Scope, scope_name: &str, path: &str, text: String) {
    let Some(Value::Entity(root)) = scope.get(scope_name).cloned() else {
        warn!(scope = scope_name, path, "Input scope is not an entity");
        return;
    };
    let segments: Vec<&str> = path.split('.').collect();
    let mut target: Entity = root;
    let mut index = 0;
    while index + 1 < segments.len() {
        match target.attribute(segments[index]) {
            Some(Value::Entity(next)) => {
                target = next;
                index += 1;
            }
            _ => break,
        }
    }
    let rest = segments[index..].join(".");
    if matches!(target.get(&rest), Some(Value::Entity(_) | Value::Collection(_))) {
        warn!(path, "Refusing to overwrite a nested entity with input text");
        return;
    }
    if let Err(error) = target.set(&rest, Value::String(text)) {
        debug!(%error, path, "Input rejected");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// collection
// ─────────────────────────────────────────────────────────────────────────────

/// `collection: ~items ViewName [limit=N] [prepend]`
///
/// Renders one child view per member and keeps the list in step with
/// add, remove and reset.
#[derive(Default)]
struct CollectionHandler {
    current: Option<Collection>,
    listeners: Vec<ListenerId>,
    renderer: Option<Rc<ListRenderer>>,
}

struct ListRenderer {
    container: Element,
    runtime: Rc<BindRuntime>,
    view_name: String,
    limit: Option<usize>,
    prepend: bool,
    children: RefCell<Vec<(Entity, View)>>,
}

impl ListRenderer {
    fn child(&self, entity: &Entity) -> Result<View, BindingError> {
        let scope = Scope::new().with(DEFAULT_SCOPE, entity.clone());
        let view = View::create(&self.runtime, &self.view_name, scope)?;
        view.bind()?;
        Ok(view)
    }

    fn clear(&self) {
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for (_, view) in children {
            view.remove();
        }
    }

    fn render_all(&self, collection: &Collection) -> Result<(), BindingError> {
        self.clear();
        self.container.set_text("");
        let mut members = collection.models();
        if self.prepend {
            members.reverse();
        }
        if let Some(limit) = self.limit {
            members.truncate(limit);
        }
        for entity in members {
            let view = self.child(&entity)?;
            self.container.append(view.element());
            self.children.borrow_mut().push((entity, view));
        }
        Ok(())
    }

    fn insert(&self, collection: &Collection, entity: &Entity, index: usize) -> Result<(), BindingError> {
        if self.limit.is_some() {
            return self.render_all(collection);
        }
        let view = self.child(entity)?;
        let mut children = self.children.borrow_mut();
        let position = if self.prepend {
            children.len().saturating_sub(index)
        } else {
            index
        }
        .min(children.len());
        self.container.insert(view.element(), position);
        children.insert(position, (entity.clone(), view));
        Ok(())
    }

    fn remove(&self, collection: &Collection, entity: &Entity) -> Result<(), BindingError> {
        let removed = {
            let mut children = self.children.borrow_mut();
            children
                .iter()
                .position(|(e, _)| e == entity)
                .map(|i| children.remove(i))
        };
        if let Some((_, view)) = removed {
            view.remove();
        }
        if self.limit.is_some() {
            return self.render_all(collection);
        }
        Ok(())
    }
}

impl CollectionHandler {
    fn detach(&mut self) {
        if let Some(collection) = self.current.take() {
            for id in self.listeners.drain(..) {
                collection.off(id);
            }
        }
        if let Some(renderer) = self.renderer.take() {
            renderer.clear();
        }
    }

    fn renderer(ctx: &HandlerContext<'_>) -> Result<ListRenderer, BindingError> {
        let view_name = ctx.value(1).to_display_string();
        if view_name.is_empty() {
            return Err(ctx.invalid("missing view name"));
        }
        if !ctx.view.runtime().has_view(&view_name) {
            return Err(BindingError::UnknownView(view_name));
        }
        let mut limit = None;
        let mut prepend = false;
        for option in ctx.values.iter().skip(2).map(Value::to_display_string) {
            match option.split_once('=') {
                Some(("limit", n)) => {
                    limit = Some(n.parse().map_err(|_| ctx.invalid(format!("invalid limit {n:?}")))?);
                }
                None if option == "prepend" => prepend = true,
                _ => return Err(ctx.invalid(format!("unknown option {option:?}"))),
            }
        }
        Ok(ListRenderer {
            container: ctx.element.clone(),
            runtime: ctx.view.runtime().clone(),
            view_name,
            limit,
            prepend,
            children: RefCell::new(Vec::new()),
        })
    }
}

impl BindHandler for CollectionHandler {
    fn exec(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        let collection = match ctx.value(0) {
            Value::Collection(collection) => Some(collection),
            Value::Null => None,
            other => return Err(ctx.invalid(format!("expected a collection, got {}", other.type_name()))),
        };
        if self.current == collection && self.renderer.is_some() {
            return Ok(());
        }
        self.detach();
        let renderer = Rc::new(Self::renderer(ctx)?);
        self.renderer = Some(renderer.clone());
        let Some(collection) = collection else {
            ctx.element.set_text("");
            return Ok(());
        };
        renderer.render_all(&collection)?;

        let on_add = renderer.clone();
        self.listeners.push(collection.on(
            "add",
            Rc::new(move |event: &Event| {
                if let EventData::Add { entity, collection, index } = &event.data {
                    if let Err(error) = on_add.insert(collection, entity, *index) {
                        warn!(%error, "Rendering added member failed");
                    }
                }
            }),
        ));
        let on_remove = renderer.clone();
        self.listeners.push(collection.on(
            "remove",
            Rc::new(move |event: &Event| {
                if let EventData::Remove { entity, collection, .. } = &event.data {
                    if let Err(error) = on_remove.remove(collection, entity) {
                        warn!(%error, "Rendering after removal failed");
                    }
                }
            }),
        ));
        let on_reset = renderer;
        self.listeners.push(collection.on(
            "reset",
            Rc::new(move |event: &Event| {
                if let Some(collection) = event.collection() {
                    if let Err(error) = on_reset.render_all(collection) {
                        warn!(%error, "Rendering reset collection failed");
                    }
                }
            }),
        ));
        self.current = Some(collection);
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &HandlerContext<'_>) {
        self.detach();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// view
// ─────────────────────────────────────────────────────────────────────────────

/// `view: ~value ViewName`: one child view bound to an entity or collection
#[derive(Default)]
struct ViewHandler {
    current: Option<Value>,
    child: Option<View>,
}

impl BindHandler for ViewHandler {
    fn exec(&mut self, ctx: &HandlerContext<'_>) -> Result<(), BindingError> {
        let value = ctx.value(0);
        if self.current.as_ref().is_some_and(|current| same_value(current, &value)) {
            return Ok(());
        }
        if let Some(child) = self.child.take() {
            child.remove();
        }
        self.current = Some(value.clone());
        ctx.element.set_text("");
        if value.is_null() {
            return Ok(());
        }
        let name = ctx.value(1).to_display_string();
        if name.is_empty() {
            return Err(ctx.invalid("missing view name"));
        }
        let child = View::create(ctx.view.runtime(), &name, Scope::new().with(DEFAULT_SCOPE, value))?;
        child.bind()?;
        ctx.element.append(child.element());
        self.child = Some(child);
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &HandlerContext<'_>) {
        self.current = None;
        if let Some(child) = self.child.take() {
            child.remove();
        }
    }
}
