#![forbid(unsafe_code)]

//! The document arena and its DOM-shaped API.
//!
//! Every method takes `&self`; the arena sits behind a `RefCell` and each
//! call holds the borrow only for its own duration. Methods that run user
//! code ([`Document::dispatch_event`]) release the borrow first.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Stale `NodeId` | Reads return `None`/empty, writes are no-ops |
//! | Inserting an ancestor into its descendant | Refused, returns `false` |
//! | Attribute writes on non-elements | Ignored |

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use slotmap::SlotMap;

use crate::event::{DomEvent, Listener, ListenerId};
use crate::html;
use crate::node::{NodeData, NodeId, NodeKind};

/// A headless HTML document. Cloning shares the same arena.
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

struct DocumentInner {
    nodes: RefCell<SlotMap<NodeId, NodeData>>,
    root: NodeId,
    document_element: NodeId,
    head: NodeId,
    body: NodeId,
    active: Cell<Option<NodeId>>,
    next_listener: Cell<u64>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.inner.nodes.borrow().len())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document containing `<html><head></head><body></body></html>`.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(NodeData::new(NodeKind::Document));
        let document_element = nodes.insert(NodeData::element("html"));
        let head = nodes.insert(NodeData::element("head"));
        let body = nodes.insert(NodeData::element("body"));
        link(&mut nodes, root, document_element);
        link(&mut nodes, document_element, head);
        link(&mut nodes, document_element, body);
        Self {
            inner: Rc::new(DocumentInner {
                nodes: RefCell::new(nodes),
                root,
                document_element,
                head,
                body,
                active: Cell::new(None),
                next_listener: Cell::new(1),
            }),
        }
    }

    /// Whether two handles share the same arena.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.inner.root
    }

    #[must_use]
    pub fn document_element(&self) -> NodeId {
        self.inner.document_element
    }

    #[must_use]
    pub fn head(&self) -> NodeId {
        self.inner.head
    }

    #[must_use]
    pub fn body(&self) -> NodeId {
        self.inner.body
    }

    /// Number of live nodes in the arena.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner.nodes.borrow_mut().insert(NodeData::element(tag))
    }

    pub fn create_text_node(&self, text: &str) -> NodeId {
        self.inner
            .nodes
            .borrow_mut()
            .insert(NodeData::character_data(NodeKind::Text, text))
    }

    pub fn create_comment(&self, text: &str) -> NodeId {
        self.inner
            .nodes
            .borrow_mut()
            .insert(NodeData::character_data(NodeKind::Comment, text))
    }

    pub fn create_document_fragment(&self) -> NodeId {
        self.inner
            .nodes
            .borrow_mut()
            .insert(NodeData::new(NodeKind::Fragment))
    }

    /// Parse `markup` into a new detached fragment.
    pub fn parse_fragment(&self, markup: &str) -> NodeId {
        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!("dom_parse_fragment", bytes = markup.len()).entered();

        let fragment = self.create_document_fragment();
        html::parse_into(self, fragment, markup);
        fragment
    }

    /// Drop `node` and its subtree from the arena. The node is detached first.
    pub fn destroy(&self, node: NodeId) {
        self.detach(node);
        let mut stack = vec![node];
        let mut nodes = self.inner.nodes.borrow_mut();
        while let Some(current) = stack.pop() {
            if let Some(data) = nodes.remove(current) {
                stack.extend(data.children);
            }
        }
        if let Some(active) = self.inner.active.get()
            && !nodes.contains_key(active)
        {
            self.inner.active.set(None);
        }
    }

    // -----------------------------------------------------------------------
    // Tree queries
    // -----------------------------------------------------------------------

    fn read<R>(&self, node: NodeId, f: impl FnOnce(&NodeData) -> R) -> Option<R> {
        self.inner.nodes.borrow().get(node).map(f)
    }

    fn write<R>(&self, node: NodeId, f: impl FnOnce(&mut NodeData) -> R) -> Option<R> {
        self.inner.nodes.borrow_mut().get_mut(node).map(f)
    }

    /// Whether `node` still exists in the arena.
    #[must_use]
    pub fn exists(&self, node: NodeId) -> bool {
        self.inner.nodes.borrow().contains_key(node)
    }

    #[must_use]
    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.read(node, |n| n.kind)
    }

    #[must_use]
    pub fn is_element(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Element)
    }

    #[must_use]
    pub fn is_comment(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Comment)
    }

    #[must_use]
    pub fn is_text(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Text)
    }

    /// Lowercase tag name, empty for non-elements.
    #[must_use]
    pub fn tag_name(&self, node: NodeId) -> String {
        self.read(node, |n| n.tag.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.read(node, |n| n.parent).flatten()
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.read(node, |n| n.children.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn child_count(&self, node: NodeId) -> usize {
        self.read(node, |n| n.children.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn child_at(&self, node: NodeId, index: usize) -> Option<NodeId> {
        self.read(node, |n| n.children.get(index).copied()).flatten()
    }

    #[must_use]
    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.child_at(node, 0)
    }

    #[must_use]
    pub fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.read(node, |n| n.children.last().copied()).flatten()
    }

    /// Element children only.
    #[must_use]
    pub fn element_children(&self, node: NodeId) -> Vec<NodeId> {
        let nodes = self.inner.nodes.borrow();
        nodes
            .get(node)
            .map(|n| {
                n.children
                    .iter()
                    .copied()
                    .filter(|c| nodes.get(*c).is_some_and(|d| d.kind == NodeKind::Element))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Position of `node` within its parent's child list.
    #[must_use]
    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        let parent = self.parent(node)?;
        self.read(parent, |p| p.children.iter().position(|c| *c == node))
            .flatten()
    }

    #[must_use]
    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let index = self.index_of(node)?;
        self.child_at(parent, index + 1)
    }

    #[must_use]
    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let index = self.index_of(node)?;
        index.checked_sub(1).and_then(|i| self.child_at(parent, i))
    }

    /// Whether `node` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let nodes = self.inner.nodes.borrow();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Whether `node` is attached to the document root.
    #[must_use]
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.inner.root, node)
    }

    /// Pre-order descendants of `node`, excluding `node` itself.
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let nodes = self.inner.nodes.borrow();
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = nodes
            .get(node)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(data) = nodes.get(id) {
                stack.extend(data.children.iter().rev().copied());
            }
        }
        out
    }

    /// First connected element whose `id` attribute equals `id`.
    #[must_use]
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.inner.root)
            .into_iter()
            .find(|node| self.get_attribute(*node, "id").as_deref() == Some(id))
    }

    /// Descendant elements of `scope` carrying attribute `name`, optionally
    /// with an exact `value`.
    #[must_use]
    pub fn find_by_attribute(&self, scope: NodeId, name: &str, value: Option<&str>) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|node| match self.get_attribute(*node, name) {
                Some(found) => value.is_none_or(|v| v == found),
                None => false,
            })
            .collect()
    }

    #[must_use]
    pub fn elements_by_tag_name(&self, scope: NodeId, tag: &str) -> Vec<NodeId> {
        let tag = tag.to_ascii_lowercase();
        self.descendants(scope)
            .into_iter()
            .filter(|node| self.read(*node, |n| n.tag == tag).unwrap_or(false))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Tree mutation
    // -----------------------------------------------------------------------

    /// Append `child` as the last child of `parent`.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> bool {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference` (or at the end when
    /// `reference` is `None` or not a child of `parent`).
    ///
    /// A fragment contributes its children in order and is left empty.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> bool {
        if self.kind(child) == Some(NodeKind::Fragment) {
            for grandchild in self.children(child) {
                self.insert_before(parent, grandchild, reference);
            }
            return true;
        }
        if reference == Some(child) {
            return self.parent(child) == Some(parent);
        }
        if !self.exists(parent) || !self.exists(child) || self.contains(child, parent) {
            return false;
        }
        self.detach(child);
        let mut nodes = self.inner.nodes.borrow_mut();
        let position = {
            let Some(parent_data) = nodes.get(parent) else {
                return false;
            };
            reference
                .and_then(|r| parent_data.children.iter().position(|c| *c == r))
                .unwrap_or(parent_data.children.len())
        };
        if let Some(parent_data) = nodes.get_mut(parent) {
            parent_data.children.insert(position, child);
        }
        if let Some(child_data) = nodes.get_mut(child) {
            child_data.parent = Some(parent);
        }
        true
    }

    /// Insert `child` so it ends up at `index` among `parent`'s children.
    pub fn insert_at(&self, parent: NodeId, child: NodeId, index: usize) -> bool {
        let reference = self.child_at(parent, index);
        self.insert_before(parent, child, reference)
    }

    /// Remove `child` from `parent`. Returns `false` if it was not a child.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> bool {
        if self.parent(child) != Some(parent) {
            return false;
        }
        self.detach(child);
        true
    }

    /// Detach `node` from its parent, keeping it (and its subtree) alive.
    pub fn detach(&self, node: NodeId) {
        let mut nodes = self.inner.nodes.borrow_mut();
        let Some(parent) = nodes.get_mut(node).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent_data) = nodes.get_mut(parent) {
            parent_data.children.retain(|c| *c != node);
        }
    }

    /// Replace `old` with `new` in `parent`.
    pub fn replace_child(&self, parent: NodeId, new: NodeId, old: NodeId) -> bool {
        if self.parent(old) != Some(parent) {
            return false;
        }
        let inserted = self.insert_before(parent, new, Some(old));
        self.detach(old);
        inserted
    }

    /// Detach every child of `node`.
    pub fn clear_children(&self, node: NodeId) {
        for child in self.children(node) {
            self.detach(child);
        }
    }

    // -----------------------------------------------------------------------
    // Character data and attributes
    // -----------------------------------------------------------------------

    /// `nodeValue`: character data for text/comment nodes, `None` otherwise.
    #[must_use]
    pub fn node_value(&self, node: NodeId) -> Option<String> {
        self.read(node, |n| match n.kind {
            NodeKind::Text | NodeKind::Comment => Some(n.data.clone()),
            _ => None,
        })
        .flatten()
    }

    pub fn set_node_value(&self, node: NodeId, value: &str) {
        self.write(node, |n| {
            if matches!(n.kind, NodeKind::Text | NodeKind::Comment) {
                n.data.clear();
                n.data.push_str(value);
            }
        });
    }

    /// Concatenated text of every text descendant.
    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        if let Some(value) = self.node_value(node) {
            return value;
        }
        let mut out = String::new();
        for id in self.descendants(node) {
            if self.kind(id) == Some(NodeKind::Text)
                && let Some(data) = self.node_value(id)
            {
                out.push_str(&data);
            }
        }
        out
    }

    /// Replace every child of `node` with a single text node.
    pub fn set_text_content(&self, node: NodeId, text: &str) {
        if matches!(self.kind(node), Some(NodeKind::Text | NodeKind::Comment)) {
            self.set_node_value(node, text);
            return;
        }
        self.clear_children(node);
        if !text.is_empty() {
            let text_node = self.create_text_node(text);
            self.append_child(node, text_node);
        }
    }

    #[must_use]
    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.read(node, |n| {
            if name == "style" && !n.style.is_empty() {
                return Some(html::serialize_style(&n.style));
            }
            n.attributes.get(&name).cloned()
        })
        .flatten()
    }

    #[must_use]
    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.read(node, |n| {
            (name == "style" && !n.style.is_empty()) || n.attributes.contains_key(&name)
        })
        .unwrap_or(false)
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        self.write(node, |n| {
            if n.kind != NodeKind::Element {
                return;
            }
            if name == "style" {
                n.style = html::parse_style(value);
                n.attributes.shift_remove(&name);
                return;
            }
            n.attributes.insert(name, value.to_owned());
        });
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) {
        let name = name.to_ascii_lowercase();
        self.write(node, |n| {
            if name == "style" {
                n.style.clear();
            }
            n.attributes.shift_remove(&name);
        });
    }

    /// Attributes in insertion order, with inline style serialized last.
    #[must_use]
    pub fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        self.read(node, |n| {
            let mut out: Vec<(String, String)> = n
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !n.style.is_empty() {
                out.push(("style".to_owned(), html::serialize_style(&n.style)));
            }
            out
        })
        .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Inline style and classes
    // -----------------------------------------------------------------------

    /// Inline style value for a kebab-case property name.
    #[must_use]
    pub fn style_property(&self, node: NodeId, name: &str) -> Option<String> {
        self.read(node, |n| n.style.get(name).cloned()).flatten()
    }

    /// Set an inline style property. An empty value removes it.
    pub fn set_style_property(&self, node: NodeId, name: &str, value: &str) {
        self.write(node, |n| {
            if value.is_empty() {
                n.style.shift_remove(name);
            } else {
                n.style.insert(name.to_owned(), value.to_owned());
            }
        });
    }

    #[must_use]
    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.get_attribute(node, "class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|c| c == class))
    }

    pub fn add_class(&self, node: NodeId, class: &str) {
        if self.has_class(node, class) {
            return;
        }
        let mut value = self.get_attribute(node, "class").unwrap_or_default();
        if !value.trim().is_empty() {
            value.push(' ');
        }
        value.push_str(class);
        self.set_attribute(node, "class", value.trim());
    }

    pub fn remove_class(&self, node: NodeId, class: &str) {
        let Some(value) = self.get_attribute(node, "class") else {
            return;
        };
        let kept: Vec<&str> = value
            .split_ascii_whitespace()
            .filter(|c| *c != class)
            .collect();
        self.set_attribute(node, "class", &kept.join(" "));
    }

    // -----------------------------------------------------------------------
    // Form properties
    // -----------------------------------------------------------------------

    /// The `value` property.
    ///
    /// Inputs fall back to the `value` attribute, textareas to their text,
    /// options to their text when no attribute is set, and selects report
    /// the first selected option (or the first option).
    #[must_use]
    pub fn value(&self, node: NodeId) -> String {
        let tag = self.tag_name(node);
        match tag.as_str() {
            "select" => {
                let options = self.elements_by_tag_name(node, "option");
                options
                    .iter()
                    .find(|option| self.selected(**option))
                    .or_else(|| options.first())
                    .map(|option| self.value(*option))
                    .unwrap_or_default()
            }
            "textarea" => self
                .read(node, |n| n.value.clone())
                .flatten()
                .unwrap_or_else(|| self.text_content(node)),
            "option" => self
                .read(node, |n| n.value.clone())
                .flatten()
                .or_else(|| self.get_attribute(node, "value"))
                .unwrap_or_else(|| self.text_content(node)),
            _ => self
                .read(node, |n| n.value.clone())
                .flatten()
                .or_else(|| self.get_attribute(node, "value"))
                .unwrap_or_default(),
        }
    }

    /// Set the `value` property. On a select this selects the matching option.
    pub fn set_value(&self, node: NodeId, value: &str) {
        if self.tag_name(node) == "select" {
            for option in self.elements_by_tag_name(node, "option") {
                let matches = self.value(option) == value;
                self.set_selected(option, matches);
            }
            return;
        }
        self.write(node, |n| n.value = Some(value.to_owned()));
    }

    /// The `checked` property, falling back to the attribute.
    #[must_use]
    pub fn checked(&self, node: NodeId) -> bool {
        self.read(node, |n| {
            n.checked
                .unwrap_or_else(|| n.attributes.contains_key("checked"))
        })
        .unwrap_or(false)
    }

    /// Set `checked`. Checking a radio unchecks the others in its group.
    pub fn set_checked(&self, node: NodeId, checked: bool) {
        self.write(node, |n| n.checked = Some(checked));
        if !checked || self.get_attribute(node, "type").as_deref() != Some("radio") {
            return;
        }
        let Some(name) = self.get_attribute(node, "name") else {
            return;
        };
        let mut scope = node;
        while let Some(parent) = self.parent(scope) {
            scope = parent;
        }
        for other in self.find_by_attribute(scope, "name", Some(&name)) {
            if other != node && self.get_attribute(other, "type").as_deref() == Some("radio") {
                self.write(other, |n| n.checked = Some(false));
            }
        }
    }

    #[must_use]
    pub fn selected(&self, node: NodeId) -> bool {
        self.read(node, |n| {
            n.selected
                .unwrap_or_else(|| n.attributes.contains_key("selected"))
        })
        .unwrap_or(false)
    }

    pub fn set_selected(&self, node: NodeId, selected: bool) {
        self.write(node, |n| n.selected = Some(selected));
    }

    /// Selected `<option>` descendants of a select, in document order.
    #[must_use]
    pub fn selected_options(&self, select: NodeId) -> Vec<NodeId> {
        self.elements_by_tag_name(select, "option")
            .into_iter()
            .filter(|option| self.selected(*option))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Markup
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            html::serialize(self, child, &mut out);
        }
        out
    }

    /// Replace the children of `node` with the parsed `markup`.
    pub fn set_inner_html(&self, node: NodeId, markup: &str) {
        self.clear_children(node);
        html::parse_into(self, node, markup);
    }

    #[must_use]
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        html::serialize(self, node, &mut out);
        out
    }

    // -----------------------------------------------------------------------
    // Focus
    // -----------------------------------------------------------------------

    pub fn focus(&self, node: NodeId) {
        if self.exists(node) {
            self.inner.active.set(Some(node));
        }
    }

    pub fn blur(&self) {
        self.inner.active.set(None);
    }

    /// The focused node, or the body when nothing has focus.
    #[must_use]
    pub fn active_element(&self) -> NodeId {
        self.inner.active.get().unwrap_or(self.inner.body)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn add_event_listener(
        &self,
        node: NodeId,
        kind: &str,
        listener: impl Fn(&DomEvent) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.get());
        self.inner.next_listener.set(id.0 + 1);
        let listener: Listener = Rc::new(listener);
        self.write(node, |n| n.listeners.push((id, kind.to_owned(), listener)));
        id
    }

    pub fn remove_event_listener(&self, node: NodeId, id: ListenerId) -> bool {
        self.write(node, |n| {
            let before = n.listeners.len();
            n.listeners.retain(|(lid, _, _)| *lid != id);
            before != n.listeners.len()
        })
        .unwrap_or(false)
    }

    /// Number of listeners of `kind` on `node`.
    #[must_use]
    pub fn listener_count(&self, node: NodeId, kind: &str) -> usize {
        self.read(node, |n| n.listeners.iter().filter(|(_, k, _)| k == kind).count())
            .unwrap_or(0)
    }

    /// Dispatch `event` at its target and bubble it through the ancestors.
    pub fn dispatch_event(&self, event: &DomEvent) {
        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!("dom_dispatch", kind = event.kind()).entered();

        let mut current = Some(event.target());
        while let Some(node) = current {
            let listeners: Vec<Listener> = self
                .read(node, |n| {
                    n.listeners
                        .iter()
                        .filter(|(_, kind, _)| kind == event.kind())
                        .map(|(_, _, listener)| Rc::clone(listener))
                        .collect()
                })
                .unwrap_or_default();
            event.set_current_target(node);
            for listener in listeners {
                listener(event);
            }
            if event.is_propagation_stopped() {
                break;
            }
            current = self.parent(node);
        }
    }
}

fn link(nodes: &mut SlotMap<NodeId, NodeData>, parent: NodeId, child: NodeId) {
    if let Some(p) = nodes.get_mut(parent) {
        p.children.push(child);
    }
    if let Some(c) = nodes.get_mut(child) {
        c.parent = Some(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_document_has_body() {
        let doc = Document::new();
        assert_eq!(doc.tag_name(doc.body()), "body");
        assert!(doc.is_connected(doc.body()));
        assert_eq!(doc.outer_html(doc.document_element()), "<html><head></head><body></body></html>");
    }

    #[test]
    fn insert_before_moves_existing_child() {
        let doc = Document::new();
        let list = doc.create_element("ul");
        let a = doc.create_element("li");
        let b = doc.create_element("li");
        let c = doc.create_element("li");
        doc.append_child(list, a);
        doc.append_child(list, b);
        doc.append_child(list, c);
        doc.insert_before(list, c, Some(a));
        assert_eq!(doc.children(list), vec![c, a, b]);
        doc.insert_at(list, c, 3);
        assert_eq!(doc.children(list), vec![a, b, c]);
    }

    #[test]
    fn fragment_insertion_empties_fragment() {
        let doc = Document::new();
        let host = doc.create_element("div");
        let fragment = doc.parse_fragment("<b>1</b><i>2</i>");
        assert!(doc.append_child(host, fragment));
        assert_eq!(doc.child_count(fragment), 0);
        assert_eq!(doc.inner_html(host), "<b>1</b><i>2</i>");
    }

    #[test]
    fn refuses_to_insert_ancestor_into_descendant() {
        let doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(outer, inner);
        assert!(!doc.append_child(inner, outer));
        assert_eq!(doc.parent(inner), Some(outer));
    }

    #[test]
    fn connectivity_follows_attachment() {
        let doc = Document::new();
        let div = doc.create_element("div");
        assert!(!doc.is_connected(div));
        doc.append_child(doc.body(), div);
        assert!(doc.is_connected(div));
        doc.remove_child(doc.body(), div);
        assert!(!doc.is_connected(div));
        assert!(doc.exists(div));
        doc.destroy(div);
        assert!(!doc.exists(div));
    }

    #[test]
    fn style_attribute_round_trips() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "style", "color: red; width:10px");
        assert_eq!(doc.style_property(div, "width").as_deref(), Some("10px"));
        doc.set_style_property(div, "color", "");
        assert_eq!(doc.get_attribute(div, "style").as_deref(), Some("width: 10px;"));
    }

    #[test]
    fn classes() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.add_class(div, "a");
        doc.add_class(div, "b");
        doc.add_class(div, "a");
        assert_eq!(doc.get_attribute(div, "class").as_deref(), Some("a b"));
        doc.remove_class(div, "a");
        assert!(!doc.has_class(div, "a"));
        assert!(doc.has_class(div, "b"));
    }

    #[test]
    fn select_value_tracks_options() {
        let doc = Document::new();
        let host = doc.create_element("div");
        doc.set_inner_html(
            host,
            "<select><option value=\"a\">A</option><option value=\"b\" selected>B</option></select>",
        );
        let select = doc.element_children(host)[0];
        assert_eq!(doc.value(select), "b");
        doc.set_value(select, "a");
        assert_eq!(doc.value(select), "a");
        assert_eq!(doc.selected_options(select).len(), 1);
    }

    #[test]
    fn radio_group_is_exclusive() {
        let doc = Document::new();
        doc.set_inner_html(
            doc.body(),
            "<input type=\"radio\" name=\"g\" checked><input type=\"radio\" name=\"g\">",
        );
        let radios = doc.element_children(doc.body());
        assert!(doc.checked(radios[0]));
        doc.set_checked(radios[1], true);
        assert!(!doc.checked(radios[0]));
        assert!(doc.checked(radios[1]));
    }

    #[test]
    fn events_bubble_and_stop() {
        let doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("span");
        doc.append_child(outer, inner);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        doc.add_event_listener(outer, "click", move |_| h.set(h.get() + 10));
        let h = Rc::clone(&hits);
        let id = doc.add_event_listener(inner, "click", move |_| h.set(h.get() + 1));
        doc.dispatch_event(&DomEvent::new("click", inner));
        assert_eq!(hits.get(), 11);

        let h = Rc::clone(&hits);
        doc.add_event_listener(inner, "click", move |e| {
            h.set(h.get() + 100);
            e.stop_propagation();
        });
        doc.dispatch_event(&DomEvent::new("click", inner));
        assert_eq!(hits.get(), 11 + 101);

        assert!(doc.remove_event_listener(inner, id));
        assert_eq!(doc.listener_count(inner, "click"), 1);
    }

    #[test]
    fn listener_may_mutate_document() {
        let doc = Document::new();
        let button = doc.create_element("button");
        doc.append_child(doc.body(), button);
        let d = doc.clone();
        doc.add_event_listener(button, "click", move |e| {
            let span = d.create_element("span");
            d.append_child(e.target(), span);
        });
        doc.dispatch_event(&DomEvent::new("click", button));
        assert_eq!(doc.inner_html(button), "<span></span>");
    }

    #[test]
    fn focus_defaults_to_body() {
        let doc = Document::new();
        assert_eq!(doc.active_element(), doc.body());
        let input = doc.create_element("input");
        doc.focus(input);
        assert_eq!(doc.active_element(), input);
        doc.destroy(input);
        assert_eq!(doc.active_element(), doc.body());
    }
}
