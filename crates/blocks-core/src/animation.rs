#![forbid(unsafe_code)]

//! Animation-aware insertion, removal and visibility changes.
//!
//! Nodes are inserted, removed, shown and hidden through this module so an
//! element carrying an `animate(callback)` query can keep a node in place
//! until its animation reports back. The callback receives
//! `(node, ready, kind)` where `kind` is `"show"` or `"hide"`; calling
//! `ready` finishes the action. Without a callback the action completes
//! immediately.
//!
//! While any child of a parent is animating out, it carries the `b-hide`
//! class and is skipped when a logical child index is translated to a
//! physical one.

use std::cell::Cell;
use std::rc::Rc;

use blocks_dom::NodeId;

use crate::runtime::Runtime;
use crate::value::{Func, Value};

/// Class marking a node that is animating out.
pub const HIDE_CLASS: &str = "b-hide";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Add,
    Remove,
    Show,
    Hide,
}

impl Action {
    fn kind(self) -> &'static str {
        match self {
            Self::Add | Self::Show => "show",
            Self::Remove | Self::Hide => "hide",
        }
    }
}

/// Insert `nodes` into `parent` so the first lands at logical child index
/// `index`; an index past the end appends.
pub(crate) fn insert(runtime: &Runtime, parent: NodeId, index: usize, nodes: &[NodeId]) {
    let document = runtime.document();
    let reference = physical_index(runtime, parent, index).and_then(|i| document.child_at(parent, i));
    for &node in nodes {
        if document.kind(node) == Some(blocks_dom::NodeKind::Fragment) {
            let children = document.children(node);
            document.insert_before(parent, node, reference);
            for child in children {
                animate(runtime, Action::Add, child);
            }
        } else {
            document.insert_before(parent, node, reference);
            animate(runtime, Action::Add, node);
        }
    }
}

/// Remove `count` nodes starting at logical child index `index`.
pub(crate) fn remove(runtime: &Runtime, parent: NodeId, index: usize, count: usize) {
    let Some(mut index) = physical_index(runtime, parent, index) else {
        return;
    };
    let document = runtime.document();
    for _ in 0..count {
        let Some(node) = document.child_at(parent, index) else {
            break;
        };
        if animate(runtime, Action::Remove, node) {
            index += 1;
        }
    }
}

/// Show or hide `node` (`display` toggled between `""` and `none`).
pub(crate) fn set_visibility(runtime: &Runtime, node: NodeId, visible: bool) {
    let action = if visible { Action::Show } else { Action::Hide };
    animate(runtime, action, node);
}

/// Translate a logical child index into a physical one, skipping nodes that
/// are animating out. `None` means "past the end".
fn physical_index(runtime: &Runtime, parent: NodeId, index: usize) -> Option<usize> {
    let animating = runtime
        .record_of_node(parent)
        .is_some_and(|record| record.borrow().animating > 0);
    if !animating {
        return Some(index);
    }
    let document = runtime.document();
    let children = document.children(parent);
    let hidden = |node: NodeId| document.has_class(node, HIDE_CLASS);

    let mut physical = 0;
    let mut logical = 0;
    while logical != index {
        let node = *children.get(physical)?;
        physical += 1;
        if !hidden(node) {
            logical += 1;
        }
    }
    while hidden(*children.get(physical)?) {
        physical += 1;
    }
    Some(physical)
}

/// Run `action` on `node`. Returns `true` when the node stays in place
/// until an animation callback reports back.
fn animate(runtime: &Runtime, action: Action, node: NodeId) -> bool {
    let document = runtime.document();
    if !document.is_element(node) {
        dispose(runtime, action, node);
        return false;
    }
    if action == Action::Show {
        document.set_style_property(node, "display", "");
    }

    let record = runtime.record_of_node(node);
    let (preprocess, callback) = record.as_ref().map_or((false, None), |record| {
        let record = record.borrow();
        (record.preprocess, record.animate_callback.clone())
    });
    if preprocess {
        dispose(runtime, action, node);
        return false;
    }
    let Some(Value::Function(callback)) = callback else {
        dispose(runtime, action, node);
        return false;
    };

    let record = runtime.ensure_node_record(node);
    let parent = document.parent(node);
    let parent_record = parent.map(|parent| runtime.ensure_node_record(parent));
    record.borrow_mut().animating += 1;
    if let Some(parent_record) = &parent_record {
        parent_record.borrow_mut().animating += 1;
    }
    if action == Action::Remove {
        document.add_class(node, HIDE_CLASS);
    }

    let weak = runtime.downgrade();
    let finished = Rc::new(Cell::new(false));
    let ready = Func::new(move |_, _| {
        if finished.replace(true) {
            return Ok(Value::Undefined);
        }
        let Some(runtime) = weak.upgrade() else {
            return Ok(Value::Undefined);
        };
        let remaining = {
            let mut record = record.borrow_mut();
            record.animating = record.animating.saturating_sub(1);
            record.animating
        };
        if let Some(parent_record) = &parent_record {
            let mut parent_record = parent_record.borrow_mut();
            parent_record.animating = parent_record.animating.saturating_sub(1);
        }
        if remaining == 0 {
            dispose(&runtime, action, node);
        }
        Ok(Value::Undefined)
    });

    let this = runtime.context_of_node(node, false).map_or(Value::Undefined, |context| {
        context
            .lookup("$view")
            .filter(|view| !view.is_nullish())
            .unwrap_or_else(|| context.root_value())
    });
    let args = [Value::Node(node), Value::Function(ready), Value::string(action.kind())];
    if let Err(err) = callback.call(&this, &args) {
        crate::debug::expression_fail(runtime.config().debug, "animate", &err);
    }
    true
}

fn dispose(runtime: &Runtime, action: Action, node: NodeId) {
    let document = runtime.document();
    match action {
        Action::Remove => {
            runtime.clear_node(node, true);
            document.detach(node);
        }
        Action::Hide => document.set_style_property(node, "display", "none"),
        Action::Add | Action::Show => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use blocks_dom::Document;

    fn runtime_with(markup: &str) -> (Runtime, NodeId) {
        let document = Document::new();
        let list = document.create_element("ul");
        document.set_inner_html(list, markup);
        document.append_child(document.body(), list);
        (Runtime::new(document, RuntimeConfig::default()), list)
    }

    #[test]
    fn insert_lands_at_the_logical_index() {
        let (runtime, list) = runtime_with("<li>a</li><li>c</li>");
        let document = runtime.document().clone();
        let b = document.create_element("li");
        insert(&runtime, list, 1, &[b]);
        assert_eq!(document.inner_html(list), "<li>a</li><li></li><li>c</li>");

        let d = document.create_element("li");
        insert(&runtime, list, 10, &[d]);
        assert_eq!(document.child_at(list, 3), Some(d));
    }

    #[test]
    fn remove_without_callback_detaches_immediately() {
        let (runtime, list) = runtime_with("<li>a</li><li>b</li><li>c</li>");
        let document = runtime.document().clone();
        let c = document.child_at(list, 2);
        remove(&runtime, list, 1, 1);
        assert_eq!(document.child_count(list), 2);
        assert_eq!(document.child_at(list, 1), c);
    }

    #[test]
    fn hide_and_show_toggle_display() {
        let (runtime, list) = runtime_with("<li>a</li>");
        let document = runtime.document().clone();
        let item = document.child_at(list, 0).expect("item");
        set_visibility(&runtime, item, false);
        assert_eq!(document.style_property(item, "display").as_deref(), Some("none"));
        set_visibility(&runtime, item, true);
        assert_eq!(document.style_property(item, "display"), None);
    }

    #[test]
    fn animated_removal_waits_for_ready() {
        let (runtime, list) = runtime_with("<li>a</li><li>b</li>");
        let document = runtime.document().clone();
        let first = document.child_at(list, 0).expect("first");

        let pending: Rc<std::cell::RefCell<Option<Func>>> = Rc::default();
        let slot = Rc::clone(&pending);
        let callback = Func::new(move |_, args| {
            if let Some(Value::Function(ready)) = args.get(1) {
                *slot.borrow_mut() = Some(ready.clone());
            }
            Ok(Value::Undefined)
        });
        runtime.ensure_node_record(first).borrow_mut().animate_callback =
            Some(Value::Function(callback));
        runtime.ensure_node_record(first).borrow_mut().preprocess = false;

        remove(&runtime, list, 0, 1);
        assert_eq!(document.child_count(list), 2);
        assert!(document.has_class(first, HIDE_CLASS));

        // Logical index 0 now skips the node animating out.
        assert_eq!(physical_index(&runtime, list, 0), Some(1));

        let ready = pending.borrow_mut().take().expect("ready callback");
        ready.call(&Value::Undefined, &[]).expect("ready");
        assert_eq!(document.child_count(list), 1);
        assert!(!document.contains(list, first));

        // A second call is ignored.
        ready.call(&Value::Undefined, &[]).expect("ready");
        assert_eq!(document.child_count(list), 1);
    }
}
