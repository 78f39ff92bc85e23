#![forbid(unsafe_code)]

//! Built-in structural and event queries.
//!
//! Element-method queries (`html`, `attr`, `css`, ...) are table entries in
//! the registry; the queries here carry their own handlers.

use std::ops::ControlFlow;

use blocks_dom::{DomEvent, NodeId};

use crate::BlocksError;
use crate::debug;
use crate::elements::EachData;
use crate::expression::Expression;
use crate::expression::eval::call_value;
use crate::observable::Observable;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::virtual_element::html_element::write_style;
use crate::virtual_element::{
    Child, RenderMode, ScopeExit, VirtualElement, children_markup, create_child_list,
};

use super::{DomQuery, QueryDescriptor, QueryFlags, QueryInvocation};

const CONTINUE: Result<ControlFlow<()>, BlocksError> = Ok(ControlFlow::Continue(()));

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// `with(value, 'name')`: render the content against `value`.
pub(crate) fn with() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::PASS_DOM_QUERY | QueryFlags::PASS_RAW_VALUES).with_preprocess(
        |invocation, element| {
            let value = invocation.arg(0);
            let name = invocation.arg(1).as_str().map(str::to_owned);
            if let Some(query) = invocation.dom_query() {
                open_scope(query, element, value, name);
            }
            CONTINUE
        },
    )
}

/// `define('name', value)`: a property visible to the content only.
pub(crate) fn define() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::PASS_DOM_QUERY).with_preprocess(|invocation, element| {
        let name = invocation.arg(0).to_display_string();
        let value = invocation.arg(1);
        let Some(query) = invocation.dom_query() else {
            return CONTINUE;
        };
        if element.render_mode() == RenderMode::None {
            return CONTINUE;
        }
        let current = query.context().cloned();
        query.set_context(current.as_ref().map(crate::Context::duplicate));
        query.add_property(&name, value);
        element.push_scope_exit(ScopeExit::RestoreContext(current));
        element.push_scope_exit(ScopeExit::RemoveProperty(name));
        CONTINUE
    })
}

/// Push a scope for `value` that closes with `element`. Exits unwind in
/// reverse: the property goes before the scope.
fn open_scope(query: &mut DomQuery, element: &VirtualElement, value: Value, name: Option<String>) {
    if element.render_mode() == RenderMode::None {
        return;
    }
    query.push_context(value.clone());
    element.push_scope_exit(ScopeExit::PopContext);
    if let Some(name) = name {
        query.add_property(&name, value);
        element.push_scope_exit(ScopeExit::RemoveProperty(name));
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// `template(source, value)`: replace the content with a template.
///
/// `source` is a node, the id of an element holding the markup (typically a
/// `<script type="blocks-template">`), or the markup itself. With `value`
/// the template renders against it, reachable as `$template`.
pub(crate) fn template() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::PASS_DOM_QUERY | QueryFlags::PASS_RAW_VALUES).with_preprocess(
        |invocation, element| {
            let runtime = invocation.runtime().clone();
            let source = invocation.arg(0).unwrap();
            let value = invocation.arg(1);
            let Some(html) = template_markup(&runtime, &source) else {
                return Err(BlocksError::Template(format!(
                    "no markup for {}",
                    source.to_display_string()
                )));
            };
            if !value.is_nullish()
                && let Some(query) = invocation.dom_query()
            {
                open_scope(query, element, value, Some("$template".to_owned()));
            }

            let id = runtime.record_of_virtual(element).map(|record| record.borrow().id);
            if id.is_some_and(|id| runtime.server_template(id)) {
                return CONTINUE;
            }

            element.html(&runtime, html.clone());
            match element.node().filter(|_| !element.is_each()) {
                Some(node) => element.set_children(create_child_list(&runtime, element, node)),
                None => element.set_children(parse_children(&runtime, element, &html)),
            }
            element.set_inner_html_raw(None);
            if let Some(id) = id {
                runtime.note_template(id);
            }
            CONTINUE
        },
    )
}

fn template_markup(runtime: &Runtime, source: &Value) -> Option<String> {
    let document = runtime.document();
    let html = match source {
        Value::Node(node) => document.inner_html(*node),
        Value::String(text) => match document.get_element_by_id(text) {
            Some(node) => document.inner_html(node),
            None => text.to_string(),
        },
        _ => return None,
    };
    (!html.is_empty()).then_some(html)
}

/// Virtual children for `html`, built through a detached container and
/// released from it.
fn parse_children(runtime: &Runtime, element: &VirtualElement, html: &str) -> Vec<Child> {
    let document = runtime.document();
    let container = document.create_element("div");
    document.set_inner_html(container, html);
    let children = create_child_list(runtime, element, container);
    document.destroy(container);
    release(&children);
    children
}

fn release(children: &[Child]) {
    for child in children {
        if let Child::Element(element) = child {
            element.restore_el(None);
            element.set_comment_end(None);
            release(&element.children());
        }
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// `each(collection, 'alias')`: render the template once per item.
pub(crate) fn each() -> QueryDescriptor {
    QueryDescriptor::new(
        QueryFlags::PASS_DOM_QUERY | QueryFlags::PASS_RAW_VALUES | QueryFlags::SUPPORTS_COMMENTS,
    )
    .with_preprocess(|invocation, element| {
        let collection = invocation.arg(0);
        let alias = invocation.arg(1).as_str().map(str::to_owned);
        match invocation.dom_query() {
            Some(query) => expand_each(query, element, &collection, alias).map(|()| ControlFlow::Continue(())),
            None => CONTINUE,
        }
    })
}

fn expand_each(
    query: &mut DomQuery,
    element: &VirtualElement,
    collection: &Value,
    alias: Option<String>,
) -> Result<(), BlocksError> {
    let runtime = query.runtime().clone();
    let record = runtime.ensure_virtual_record(element);
    let id = record.borrow().id;
    element.set_children_each(true);

    if runtime.has_server_data()
        && let Some(markup) = runtime.take_server_each(id)
    {
        let children = parse_children(&runtime, element, &markup);
        element.set_template(children.clone());
        element.set_children(children);
    }
    let (headers, footers) = split_statics(element);

    if runtime.is_collecting() {
        let mut authored: Vec<Child> = headers.iter().cloned().map(Child::Element).collect();
        authored.extend(element.template_children());
        authored.extend(footers.iter().cloned().map(Child::Element));
        runtime.note_each_template(id, &children_markup(&authored));
    }

    let mut html = String::new();
    for header in &headers {
        html.push_str(&header.render(query)?);
    }
    let mut footer_html = String::new();
    for footer in &footers {
        footer_html.push_str(&footer.render(query)?);
    }

    let observable = collection.as_observable();
    if let Some(observable) = observable {
        let template = element.template_children();
        let declared = (!template.is_empty()
            && template
                .iter()
                .all(|child| matches!(child, Child::Element(e) if !e.is_comment())))
        .then_some(template.len());
        record.borrow_mut().each_data = Some(EachData {
            observable_id: observable.id(),
            element: element.clone(),
            start_offset: headers.len(),
            end_offset: footers.len(),
            declared,
            alias: alias.clone(),
        });
    }

    let items: Vec<Value> = match collection.unwrap() {
        Value::Array(items) => items.borrow().clone(),
        Value::Object(map) => map.borrow().values().cloned().collect(),
        _ => Vec::new(),
    };
    for (i, item) in items.iter().enumerate() {
        let index = match observable {
            Some(observable) => observable.index_observable(i, false),
            None => Observable::new(i),
        };
        html.push_str(&render_with(query, element, alias.as_deref(), index, item)?);
    }
    html.push_str(&footer_html);

    element.html(&runtime, html);
    Ok(())
}

/// Split `data-role="header"`/`"footer"` children off the template once.
/// Whitespace-only text between items is dropped.
fn split_statics(element: &VirtualElement) -> (Vec<VirtualElement>, Vec<VirtualElement>) {
    if let Some(split) = element.headers() {
        return split;
    }
    let mut headers = Vec::new();
    let mut footers = Vec::new();
    let mut template = Vec::new();
    for child in element.template_children() {
        match child {
            Child::Text(text) if text.trim().is_empty() => {}
            Child::Element(child) => {
                child.set_each(true);
                match child.attribute("data-role").as_deref() {
                    Some("header") => headers.push(child),
                    Some("footer") => footers.push(child),
                    _ => template.push(Child::Element(child)),
                }
            }
            other => template.push(other),
        }
    }
    element.set_headers(headers.clone(), footers.clone());
    element.set_template(template.clone());
    element.set_children(template);
    (headers, footers)
}

/// Render one item of the `each` binding `each` against `item`.
pub(crate) fn render_item(
    query: &mut DomQuery,
    each: &EachData,
    index: Observable,
    item: &Value,
) -> Result<String, BlocksError> {
    render_with(query, &each.element, each.alias.as_deref(), index, item)
}

fn render_with(
    query: &mut DomQuery,
    element: &VirtualElement,
    alias: Option<&str>,
    index: Observable,
    item: &Value,
) -> Result<String, BlocksError> {
    query.set_data_index(Some(index));
    query.push_context(item.clone());
    query.set_data_index(None);
    if let Some(alias) = alias {
        query.add_property(alias, item.clone());
    }
    let html = element.render_children(query);
    if let Some(alias) = alias {
        query.remove_property(alias);
    }
    query.pop_context();
    html
}

/// `options(collection, {text, value, caption})`: `<option>`s for a
/// `<select>`, one per item.
pub(crate) fn options() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::PASS_DOM_QUERY | QueryFlags::PASS_RAW_VALUES).with_preprocess(
        |invocation, element| {
            let collection = invocation.arg(0);
            let settings = invocation.arg(1).unwrap();
            if !element.has_template() {
                build_options(element, &settings);
            }
            match invocation.dom_query() {
                Some(query) => expand_each(query, element, &collection, None).map(|()| ControlFlow::Continue(())),
                None => CONTINUE,
            }
        },
    )
}

fn build_options(element: &VirtualElement, settings: &Value) {
    let setting = |name: &str| {
        let value = settings.get_member(name).unwrap();
        (!value.is_nullish()).then(|| value.to_display_string())
    };
    let text = setting("text").unwrap_or_else(|| "$this".to_owned());
    let value = setting("value").unwrap_or_else(|| "$this".to_owned());

    let mut children: Vec<Child> = element
        .children()
        .into_iter()
        .filter(|child| matches!(child, Child::Element(e) if e.attribute("data-role").is_some()))
        .collect();

    let option = VirtualElement::new("option");
    option.set_parent(Some(element));
    option.set_attribute_expressions(
        Expression::create(&format!("{{{{{value}}}}}"), Some("value"))
            .into_iter()
            .collect(),
    );
    option.set_children(
        Expression::create(&format!("{{{{{text}}}}}"), None)
            .map(Child::Expression)
            .into_iter()
            .collect(),
    );
    children.push(Child::Element(option));

    if let Some(caption) = setting("caption") {
        let header = VirtualElement::new("option");
        header.set_parent(Some(element));
        header.insert_attribute_raw("data-role", "header");
        header.set_inner_html_raw(Some(caption));
        children.push(Child::Element(header));
    }
    element.set_children(children);
}

/// `render(condition)`: inside an `each` template, defer the content while
/// `condition` is false and render it on the first show.
pub(crate) fn render() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::PASS_DETAIL_VALUES)
        .with_preprocess(|invocation, element| {
            if !element.is_each() {
                return Err(BlocksError::RenderOutsideEach);
            }
            let runtime = invocation.runtime().clone();
            let (visible, observed) = invocation
                .detail(0)
                .map_or((false, false), |arg| (arg.value.truthy(), arg.contains_observable));
            if visible {
                element.set_render_mode(RenderMode::All);
            } else if observed {
                element.set_render_mode(RenderMode::ElementOnly);
                element.css(&runtime, "display", &Value::from(false));
                runtime.ensure_virtual_record(element).borrow_mut().render_cache = Some(element.clone());
            } else {
                element.set_render_mode(RenderMode::None);
            }
            CONTINUE
        })
        .with_update(|invocation, node| {
            let runtime = invocation.runtime().clone();
            let visible = invocation.detail(0).is_some_and(|arg| arg.value.truthy());
            let cached = runtime
                .record_of_node(node)
                .filter(|_| visible)
                .and_then(|record| record.borrow_mut().render_cache.take());
            if let Some(cached) = cached {
                let mut query = DomQuery::new(runtime.clone());
                query.set_context(runtime.context_of_node(node, false));
                let html = cached.render_children(&mut query)?;
                let document = runtime.document();
                document.set_inner_html(node, &html);
                query.bind_nodes(&document.children(node));
            }
            write_style(&runtime, node, "display", if visible { "" } else { "none" });
            Ok(())
        })
}

// ---------------------------------------------------------------------------
// Element state
// ---------------------------------------------------------------------------

/// `setClass(classes, condition)`.
pub(crate) fn set_class() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::empty())
        .with_preprocess(|invocation, element| {
            apply_class(invocation, element);
            CONTINUE
        })
        .with_update(|invocation, node| {
            let runtime = invocation.runtime().clone();
            let element = runtime
                .record_of_node(node)
                .and_then(|record| record.borrow().virtual_element.clone())
                .filter(|element| !element.is_each() && element.node() == Some(node))
                .unwrap_or_else(|| VirtualElement::fake(&runtime, node));
            apply_class(invocation, &element);
            Ok(())
        })
}

fn apply_class(invocation: &QueryInvocation<'_>, element: &VirtualElement) {
    let classes = invocation.arg(0);
    let condition = (invocation.len() > 1).then(|| invocation.arg(1).truthy());
    element.toggle_class(invocation.runtime(), &classes, condition);
}

/// `focused(condition)`: focus the element while `condition` holds.
pub(crate) fn focused() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::empty())
        .with_preprocess(|_, _| CONTINUE)
        .with_update(|invocation, node| {
            if invocation.arg(0).truthy() {
                invocation.runtime().document().focus(node);
            }
            Ok(())
        })
}

/// `updateOn('event')`: the event that writes a bound control's value back.
pub(crate) fn update_on() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::empty()).with_preprocess(|invocation, element| {
        let event = invocation.arg(0).to_display_string();
        invocation
            .runtime()
            .ensure_virtual_record(element)
            .borrow_mut()
            .update_on = Some(event);
        CONTINUE
    })
}

/// `animate(callback)`: route adds, removes, shows and hides of the element
/// through `callback(node, ready, kind)`.
pub(crate) fn animate() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::empty()).with_preprocess(|invocation, element| {
        let callback = invocation.arg(0);
        invocation
            .runtime()
            .ensure_virtual_record(element)
            .borrow_mut()
            .animate_callback = Some(callback);
        CONTINUE
    })
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// `on(events, callbacks, data)`.
pub(crate) fn on() -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::empty()).with_ready(|invocation, node| {
        let events = match invocation.arg(0) {
            Value::Array(items) => items.borrow().iter().map(Value::to_display_string).collect(),
            other => other
                .to_display_string()
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
        };
        let callbacks = match invocation.arg(1) {
            Value::Array(items) => items.borrow().clone(),
            other => vec![other],
        };
        listen(invocation.runtime(), node, events, &callbacks, &invocation.arg(2));
        Ok(())
    })
}

/// The query form of a DOM event: `click(handler, data)`.
pub(crate) fn event(name: &'static str) -> QueryDescriptor {
    QueryDescriptor::new(QueryFlags::PASS_RAW_VALUES).with_ready(move |invocation, node| {
        let callbacks = [invocation.arg(0)];
        listen(invocation.runtime(), node, vec![name.to_owned()], &callbacks, &invocation.arg(1));
        Ok(())
    })
}

/// Handlers run with `this` set to the nearest `$template`, `$view` or
/// root model, and receive the event object and `data`.
fn listen(runtime: &Runtime, node: NodeId, events: Vec<String>, callbacks: &[Value], data: &Value) {
    for event in events {
        let weak = runtime.downgrade();
        let callbacks = callbacks.to_vec();
        let data = data.clone();
        let label = event.clone();
        runtime.document().add_event_listener(node, &event, move |dom_event: &DomEvent| {
            let Some(runtime) = weak.upgrade() else {
                return;
            };
            let this = runtime.context_of_node(node, false).map_or(Value::Undefined, |context| {
                ["$template", "$view"]
                    .into_iter()
                    .find_map(|name| context.lookup(name).filter(|value| !value.is_nullish()))
                    .unwrap_or_else(|| context.root_value())
            });
            let args = [event_object(&runtime, dom_event), data.clone()];
            for callback in &callbacks {
                if let Err(err) = call_value(callback, &this, &args, &label) {
                    debug::expression_fail(runtime.config().debug, &label, &err);
                }
            }
        });
    }
}

fn event_object(runtime: &Runtime, event: &DomEvent) -> Value {
    let target = event.target();
    Value::object([
        ("type", Value::from(event.kind())),
        ("target", Value::Node(target)),
        ("key", event.key().map_or(Value::Undefined, Value::from)),
        ("value", Value::from(runtime.document().value(target))),
    ])
}
