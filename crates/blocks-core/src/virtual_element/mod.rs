#![forbid(unsafe_code)]

//! Virtual element tree.
//!
//! A [`VirtualElement`] mirrors one element (or one `<!-- blocks ... -->`
//! comment range) of the live tree: tag, attributes, inline style and an
//! ordered child list of nested elements, literal markup and text
//! [`Expression`]s. The tree is built from live markup by
//! [`create_virtual`] and then either
//!
//! - **rendered** to a string (server path, and every `each` item), or
//! - **synced** against the live nodes it was built from (client path).
//!
//! Both paths run the element's `data-query` pipeline first, which may
//! change attributes, replace the content or switch the render mode.
//!
//! # Invariants
//!
//! 1. Content is governed either by `inner_html` (when set) or by the child
//!    list, never both: [`VirtualElement::html`] clears the children.
//! 2. A template inside `each` is one object rendered once per item. Its
//!    writes are tracked while it renders and rolled back before the next
//!    item, so no item sees state left by the previous one.
//! 3. Attribute values are stored decoded; markup escaping happens when the
//!    element renders.
//! 4. Every write goes to the virtual model and, when the element is bound
//!    to a live node, to that node.

mod create;
pub(crate) mod html_element;
mod render;
pub(crate) mod style;

pub(crate) use create::{create_child_list, create_root, create_virtual};
pub(crate) use render::children_markup;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;
use blocks_dom::NodeId;
use indexmap::IndexMap;

use crate::context::Context;
use crate::elements::{DATA_ID_ATTR, ElementId, ElementRecord};
use crate::expression::{Expression, escape_value};
use crate::runtime::Runtime;
use crate::value::Value;

/// Input types whose `value` is edited as text.
const VALUE_TYPES: &[&str] = &[
    "color",
    "date",
    "datetime",
    "datetime-local",
    "email",
    "file",
    "hidden",
    "month",
    "number",
    "password",
    "range",
    "search",
    "tel",
    "text",
    "time",
    "url",
    "week",
];

/// Attribute holding an element's query pipeline.
pub const DATA_QUERY_ATTR: &str = "data-query";

/// How much of an element [`render`](VirtualElement::render) emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Tags and content.
    #[default]
    All,
    /// Tags only; the content renders later (see the `render` query).
    ElementOnly,
    /// Nothing.
    None,
}

/// One entry of a virtual child list.
#[derive(Clone)]
pub(crate) enum Child {
    Element(VirtualElement),
    /// Literal markup.
    Text(String),
    Expression(Expression),
}

/// Work undone when an element's end tag is reached.
pub(crate) enum ScopeExit {
    RemoveProperty(String),
    PopContext,
    RestoreContext(Option<Context>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Element,
    /// A `<!-- blocks ... -->` range; `text` has no id prefix.
    Comment { text: String, end: Option<NodeId> },
}

#[derive(Default)]
struct Changes {
    attributes: Vec<(String, Option<String>)>,
    styles: Vec<(String, Option<String>)>,
    class: Option<String>,
    inner_html: Option<String>,
    tag: String,
}

struct VirtualData {
    tag: String,
    kind: Kind,
    attributes: IndexMap<String, String>,
    attribute_expressions: Vec<Expression>,
    /// Camel-cased property names.
    style: IndexMap<String, String>,
    children: Vec<Child>,
    template: Option<Vec<Child>>,
    /// `data-role="header"` / `"footer"` children split off by `each`.
    headers: Option<(Vec<VirtualElement>, Vec<VirtualElement>)>,
    parent: Weak<RefCell<VirtualData>>,
    inner_html: Option<String>,
    render_mode: RenderMode,
    each: bool,
    children_each: bool,
    changes: Option<Changes>,
    /// Selected values of a `select`, consulted by its options.
    values: Option<AHashSet<String>>,
    el: Option<NodeId>,
    fake: bool,
    scope_exits: Vec<ScopeExit>,
}

impl VirtualData {
    fn new(tag: &str, kind: Kind) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            kind,
            attributes: IndexMap::new(),
            attribute_expressions: Vec::new(),
            style: IndexMap::new(),
            children: Vec::new(),
            template: None,
            headers: None,
            parent: Weak::new(),
            inner_html: None,
            render_mode: RenderMode::All,
            each: false,
            children_each: false,
            changes: None,
            values: None,
            el: None,
            fake: false,
            scope_exits: Vec::new(),
        }
    }
}

/// A node of the virtual tree. Cloning clones the handle.
#[derive(Clone)]
pub struct VirtualElement(Rc<RefCell<VirtualData>>);

impl VirtualElement {
    /// A detached element with no live counterpart.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self(Rc::new(RefCell::new(VirtualData::new(tag, Kind::Element))))
    }

    pub(crate) fn comment(text: &str, start: Option<NodeId>, end: Option<NodeId>) -> Self {
        let mut data = VirtualData::new(
            "",
            Kind::Comment {
                text: text.trim().to_owned(),
                end,
            },
        );
        data.el = start;
        Self(Rc::new(RefCell::new(data)))
    }

    /// A stand-in used to run element methods straight on a live node.
    pub(crate) fn fake(runtime: &Runtime, node: NodeId) -> Self {
        let element = Self::new(&runtime.document().tag_name(node));
        {
            let mut data = element.0.borrow_mut();
            data.el = Some(node);
            data.fake = true;
        }
        element
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Lower-case tag name; empty for a comment range.
    #[must_use]
    pub fn tag_name(&self) -> String {
        self.0.borrow().tag.clone()
    }

    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(self.0.borrow().kind, Kind::Comment { .. })
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.0.borrow().attributes.get(name).cloned()
    }

    /// Inline style property, by either camel or kebab name.
    #[must_use]
    pub fn style(&self, name: &str) -> Option<String> {
        self.0.borrow().style.get(&style::camel_case(name)).cloned()
    }

    #[must_use]
    pub fn inner_html(&self) -> Option<String> {
        self.0.borrow().inner_html.clone()
    }

    #[must_use]
    pub fn render_mode(&self) -> RenderMode {
        self.0.borrow().render_mode
    }

    #[must_use]
    pub fn is_each(&self) -> bool {
        self.0.borrow().each
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.0.borrow().children.len()
    }

    /// Nested elements among the children.
    #[must_use]
    pub fn element_children(&self) -> Vec<VirtualElement> {
        self.0
            .borrow()
            .children
            .iter()
            .filter_map(|child| match child {
                Child::Element(element) => Some(element.clone()),
                _ => None,
            })
            .collect()
    }

    /// The live node this element was built from, if any.
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        self.0.borrow().el
    }

    #[must_use]
    pub fn parent(&self) -> Option<VirtualElement> {
        self.0.borrow().parent.upgrade().map(Self)
    }

    /// The query pipeline text of this element.
    #[must_use]
    pub fn query_text(&self) -> Option<String> {
        self.attribute(DATA_QUERY_ATTR)
    }

    pub(crate) fn data_id(&self) -> Option<ElementId> {
        self.0
            .borrow()
            .attributes
            .get(DATA_ID_ATTR)
            .and_then(|id| id.parse().ok())
    }

    pub(crate) fn is_fake(&self) -> bool {
        self.0.borrow().fake
    }

    pub(crate) fn children(&self) -> Vec<Child> {
        self.0.borrow().children.clone()
    }

    /// The child list `each` renders per item.
    pub(crate) fn template_children(&self) -> Vec<Child> {
        let data = self.0.borrow();
        data.template.clone().unwrap_or_else(|| data.children.clone())
    }

    pub(crate) fn has_template(&self) -> bool {
        self.0.borrow().template.is_some()
    }

    pub(crate) fn children_each(&self) -> bool {
        self.0.borrow().children_each
    }

    pub(crate) fn headers(&self) -> Option<(Vec<VirtualElement>, Vec<VirtualElement>)> {
        self.0.borrow().headers.clone()
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    pub(crate) fn set_parent(&self, parent: Option<&VirtualElement>) {
        self.0.borrow_mut().parent = parent.map_or_else(Weak::new, |p| Rc::downgrade(&p.0));
    }

    pub(crate) fn set_children(&self, children: Vec<Child>) {
        self.0.borrow_mut().children = children;
    }

    pub(crate) fn set_template(&self, template: Vec<Child>) {
        self.0.borrow_mut().template = Some(template);
    }

    pub(crate) fn set_comment_end(&self, node: Option<NodeId>) {
        if let Kind::Comment { end, .. } = &mut self.0.borrow_mut().kind {
            *end = node;
        }
    }

    pub(crate) fn set_children_each(&self, value: bool) {
        self.0.borrow_mut().children_each = value;
    }

    pub(crate) fn set_each(&self, value: bool) {
        self.0.borrow_mut().each = value;
    }

    pub(crate) fn set_headers(&self, headers: Vec<VirtualElement>, footers: Vec<VirtualElement>) {
        self.0.borrow_mut().headers = Some((headers, footers));
    }

    pub(crate) fn set_render_mode(&self, mode: RenderMode) {
        self.0.borrow_mut().render_mode = mode;
    }

    pub(crate) fn set_inner_html_raw(&self, html: Option<String>) {
        self.0.borrow_mut().inner_html = html;
    }

    pub(crate) fn set_attribute_expressions(&self, expressions: Vec<Expression>) {
        self.0.borrow_mut().attribute_expressions = expressions;
    }

    pub(crate) fn attribute_expressions(&self) -> Vec<Expression> {
        self.0.borrow().attribute_expressions.clone()
    }

    pub(crate) fn attributes(&self) -> Vec<(String, String)> {
        self.0
            .borrow()
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn set_style_map(&self, entries: Vec<(String, String)>) {
        self.0.borrow_mut().style = entries.into_iter().collect();
    }

    pub(crate) fn insert_attribute_raw(&self, name: &str, value: &str) {
        self.0
            .borrow_mut()
            .attributes
            .insert(name.to_ascii_lowercase(), value.to_owned());
    }

    pub(crate) fn push_scope_exit(&self, exit: ScopeExit) {
        self.0.borrow_mut().scope_exits.push(exit);
    }

    pub(crate) fn take_scope_exits(&self) -> Vec<ScopeExit> {
        std::mem::take(&mut self.0.borrow_mut().scope_exits)
    }

    pub(crate) fn take_el(&self) -> Option<NodeId> {
        self.0.borrow_mut().el.take()
    }

    pub(crate) fn restore_el(&self, el: Option<NodeId>) {
        self.0.borrow_mut().el = el;
    }

    // -----------------------------------------------------------------------
    // Element methods
    // -----------------------------------------------------------------------

    /// The record this element stores form-sync state on.
    fn own_record(&self, runtime: &Runtime) -> ElementRecord {
        match (self.is_fake(), self.node()) {
            (true, Some(node)) => runtime.ensure_node_record(node),
            _ => runtime.ensure_virtual_record(self),
        }
    }

    fn current_attribute(&self, runtime: &Runtime, name: &str) -> Option<String> {
        let data = self.0.borrow();
        if data.fake
            && let Some(node) = data.el
        {
            return runtime.document().get_attribute(node, name);
        }
        data.attributes.get(name).cloned()
    }

    /// Set attribute `name` from a query argument.
    ///
    /// An observable bound to `value` of a text control, or to `checked` of
    /// a checkbox or radio, also registers the element for writing user
    /// edits back into it.
    pub fn attr(&self, runtime: &Runtime, name: &str, raw: &Value) {
        let name = name.to_ascii_lowercase();
        let tag = self.tag_name();
        let kind = self.current_attribute(runtime, "type");

        if let Value::Observable(observable) = raw {
            let text_control = matches!(tag.as_str(), "input" | "textarea" | "select")
                && kind.as_deref().is_none_or(|t| VALUE_TYPES.contains(&t));
            let toggle = matches!(kind.as_deref(), Some("checkbox" | "radio"));
            let event = match name.as_str() {
                "value" if text_control => Some(if tag == "select" { "change" } else { "input" }),
                "checked" if toggle => Some("click"),
                _ => None,
            };
            if let Some(event) = event {
                let record = self.own_record(runtime);
                let mut record = record.borrow_mut();
                record.subscribe = Some(event);
                record.value_observable = Some(observable.clone());
            }
        }

        let value = raw.unwrap();
        let normalized = match name.as_str() {
            "checked" if !value.is_nullish() => {
                let own_value = self.current_attribute(runtime, "value");
                let radio_mismatch = kind.as_deref() == Some("radio")
                    && !self.is_fake()
                    && own_value.is_some()
                    && value.as_str().is_some_and(|v| Some(v) != own_value.as_deref());
                (!radio_mismatch && value.truthy()).then(|| "checked".to_owned())
            }
            "disabled" => value.truthy().then(|| "disabled".to_owned()),
            _ if value.is_nullish() => None,
            _ => Some(value.to_display_string()),
        };

        if tag == "textarea" && name == "value" && self.node().is_none() {
            self.html(runtime, escape_value(&normalized.unwrap_or_default()));
            return;
        }
        if tag == "select" && name == "value" {
            let values: AHashSet<String> = match &value {
                Value::Array(items) => items.borrow().iter().map(Value::to_display_string).collect(),
                other if other.is_nullish() => AHashSet::new(),
                other => std::iter::once(other.to_display_string()).collect(),
            };
            if let Some(node) = self.node() {
                html_element::select_values(runtime, node, &values);
            }
            self.0.borrow_mut().values = Some(values);
            return;
        }
        self.set_attribute(runtime, &name, normalized);
    }

    /// Write an attribute without form-control normalization. Tracked while
    /// an `each` template renders.
    pub(crate) fn set_attribute(&self, runtime: &Runtime, name: &str, value: Option<String>) {
        let (node, end, is_comment) = {
            let mut data = self.0.borrow_mut();
            let old = data.attributes.get(name).cloned();
            if let Some(changes) = data.changes.as_mut() {
                changes.attributes.push((name.to_owned(), old));
            }
            match &value {
                Some(value) => {
                    data.attributes.insert(name.to_owned(), value.clone());
                }
                None => {
                    data.attributes.shift_remove(name);
                }
            }
            let (end, is_comment) = match &data.kind {
                Kind::Comment { end, .. } => (*end, true),
                Kind::Element => (None, false),
            };
            (data.el, end, is_comment)
        };
        let Some(node) = node else {
            return;
        };
        if is_comment {
            if name == DATA_ID_ATTR {
                html_element::stamp_comment(runtime.document(), node, end, value.as_deref());
            }
            return;
        }
        html_element::write_attribute(runtime, node, name, value.as_deref());
    }

    /// Set style property `name`. `display` takes a visibility flag.
    pub fn css(&self, runtime: &Runtime, name: &str, raw: &Value) {
        let name = style::camel_case(name);
        if name.is_empty() {
            return;
        }
        let value = raw.unwrap();
        let value = if name == "display" {
            let hidden = match &value {
                Value::String(s) => &**s == "none",
                other => !other.truthy(),
            };
            if hidden { "none".to_owned() } else { String::new() }
        } else {
            style::to_unit(&name, &value)
        };

        let node = {
            let mut data = self.0.borrow_mut();
            let old = data.style.get(&name).cloned();
            if let Some(changes) = data.changes.as_mut() {
                changes.styles.push((name.clone(), old));
            }
            data.style.insert(name.clone(), value.clone());
            data.el
        };
        if let Some(node) = node {
            html_element::write_style(runtime, node, &name, &value);
        }
    }

    /// Replace the content with `markup`.
    pub fn html(&self, runtime: &Runtime, markup: String) {
        let node = {
            let mut data = self.0.borrow_mut();
            data.children.clear();
            data.inner_html = Some(markup.clone());
            data.el
        };
        if let Some(node) = node {
            html_element::write_inner_html(runtime, node, &markup);
        }
    }

    /// Replace the content with escaped text. Nullish values leave the
    /// content alone.
    pub fn text(&self, runtime: &Runtime, value: &Value) {
        let value = value.unwrap();
        if value.is_nullish() {
            return;
        }
        self.html(runtime, escape_value(&value.to_display_string()));
    }

    pub fn add_class(&self, runtime: &Runtime, classes: &Value) {
        self.edit_classes(runtime, classes, true);
    }

    pub fn remove_class(&self, runtime: &Runtime, classes: &Value) {
        self.edit_classes(runtime, classes, false);
    }

    /// Add `classes`, or remove them when `condition` is `Some(false)`.
    pub fn toggle_class(&self, runtime: &Runtime, classes: &Value, condition: Option<bool>) {
        self.edit_classes(runtime, classes, condition != Some(false));
    }

    fn edit_classes(&self, runtime: &Runtime, classes: &Value, add: bool) {
        let names = class_names(&classes.unwrap());
        if names.is_empty() {
            return;
        }
        let node = {
            let mut data = self.0.borrow_mut();
            let current = data.attributes.get("class").cloned().unwrap_or_default();
            let mut list: Vec<String> = current.split_ascii_whitespace().map(str::to_owned).collect();
            for name in &names {
                let present = list.iter().any(|c| c == name);
                if add && !present {
                    list.push(name.clone());
                } else if !add && present {
                    list.retain(|c| c != name);
                }
            }
            data.attributes.insert("class".to_owned(), list.join(" "));
            data.el
        };
        let Some(node) = node else {
            return;
        };
        let document = runtime.document();
        if !document.is_element(node) {
            return;
        }
        for name in &names {
            if add {
                document.add_class(node, name);
            } else {
                document.remove_class(node, name);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Change tracking
    // -----------------------------------------------------------------------

    pub(crate) fn track_changes(&self) {
        let mut data = self.0.borrow_mut();
        data.changes = Some(Changes {
            class: data.attributes.get("class").cloned(),
            inner_html: data.inner_html.clone(),
            tag: data.tag.clone(),
            ..Changes::default()
        });
    }

    pub(crate) fn revert_changes(&self) {
        let mut data = self.0.borrow_mut();
        let Some(changes) = data.changes.take() else {
            return;
        };
        for (name, old) in changes.styles.into_iter().rev() {
            match old {
                Some(value) => data.style.insert(name, value),
                None => data.style.shift_remove(&name),
            };
        }
        for (name, old) in changes.attributes.into_iter().rev() {
            match old {
                Some(value) => data.attributes.insert(name, value),
                None => data.attributes.shift_remove(&name),
            };
        }
        match changes.class {
            Some(class) => data.attributes.insert("class".to_owned(), class),
            None => data.attributes.shift_remove("class"),
        };
        data.tag = changes.tag;
        data.inner_html = changes.inner_html;
        data.render_mode = RenderMode::All;
    }
}

fn class_names(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(Value::to_template_string)
            .filter(|name| !name.is_empty())
            .collect(),
        other if other.is_nullish() => Vec::new(),
        other => other
            .to_display_string()
            .split_ascii_whitespace()
            .map(str::to_owned)
            .collect(),
    }
}

impl fmt::Debug for VirtualElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        f.debug_struct("VirtualElement")
            .field("tag", &data.tag)
            .field("kind", &data.kind)
            .field("attributes", &data.attributes)
            .field("children", &data.children.len())
            .field("each", &data.each)
            .finish()
    }
}
