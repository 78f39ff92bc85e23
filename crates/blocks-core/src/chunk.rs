#![forbid(unsafe_code)]

//! Chunk manager: array index to live node range mapping.
//!
//! An array observable rendered through `each` owns one chunk of live nodes
//! per item, laid out contiguously under the wrapper. The wrapper is either
//! an element (items are its children, after any static header children) or
//! a comment range (`<!-- 4:blocks each(items) -->` ... `<!-- 4:/blocks -->`,
//! items are the siblings in between).
//!
//! Item `i` spans `[start + len * i, start + len * (i + 1))` of the parent's
//! children, where `len` is the chunk length.
//!
//! # Invariants
//!
//! 1. A chunk length of 0 (empty array, or nothing rendered yet) makes every
//!    index operation a no-op instead of failing.
//! 2. Chunk lengths are memoized per (runtime, wrapper) and forgotten by
//!    [`ChunkManager::dispose`], which every array mutation calls when it
//!    finishes.
//! 3. An observable bound in several places yields one location per place;
//!    a location whose wrapper node is gone is skipped.

use std::cell::RefCell;

use ahash::{AHashMap, AHashSet};
use blocks_dom::NodeId;

use crate::animation;
use crate::config::ChunkSizing;
use crate::debug;
use crate::elements::{EachData, ElementId};
use crate::observable::Observable;
use crate::query::DomQuery;
use crate::runtime::Runtime;
use crate::value::Value;

/// One live place an array observable is rendered.
pub(crate) struct ChunkLocation {
    pub(crate) runtime: Runtime,
    pub(crate) element_id: ElementId,
    /// The element or opening comment carrying the `each` binding.
    pub(crate) wrapper: NodeId,
    /// The node whose children hold the chunks.
    pub(crate) parent: NodeId,
    pub(crate) each: EachData,
    /// Child index of the first item node.
    pub(crate) start_index: usize,
    /// Number of item nodes (headers and footers excluded).
    pub(crate) child_count: usize,
    /// Array length when the location was resolved.
    pub(crate) observable_length: usize,
}

impl ChunkLocation {
    /// Drop records of nodes that left the document, if configured.
    pub(crate) fn collect_garbage(&self) {
        if self.runtime.config().collect_garbage_after_remove {
            self.runtime.collect_garbage();
        }
    }
}

#[derive(Default)]
pub(crate) struct ChunkManager {
    lengths: RefCell<AHashMap<(u64, ElementId), usize>>,
}

impl ChunkManager {
    /// Every live location `observable` is currently rendered at.
    pub(crate) fn locations(&self, observable: &Observable) -> Vec<ChunkLocation> {
        let mut seen = AHashSet::new();
        let mut locations = Vec::new();
        for subscription in observable.element_subscriptions() {
            let Some(runtime) = subscription.runtime.upgrade() else {
                continue;
            };
            if !seen.insert((runtime.id(), subscription.element_id)) {
                continue;
            }
            if let Some(location) = resolve(&runtime, subscription.element_id, observable) {
                locations.push(location);
            }
        }
        locations
    }

    /// Live nodes per item at `location`.
    pub(crate) fn chunk_length(&self, location: &ChunkLocation) -> usize {
        let key = (location.runtime.id(), location.element_id);
        if let Some(length) = self.lengths.borrow().get(&key).copied()
            && length > 0
        {
            return length;
        }
        let declared = match location.runtime.config().chunk_sizing {
            ChunkSizing::Declared => location.each.declared,
            ChunkSizing::Inferred => None,
        };
        let length = declared.unwrap_or_else(|| {
            infer_length(location.child_count, location.observable_length)
        });
        self.lengths.borrow_mut().insert(key, length);
        length
    }

    /// The nodes of item `index`.
    pub(crate) fn get_at(&self, location: &ChunkLocation, index: usize) -> Vec<NodeId> {
        let length = self.chunk_length(location);
        let document = location.runtime.document();
        let first = location.start_index + length * index;
        (first..first + length)
            .filter_map(|i| document.child_at(location.parent, i))
            .collect()
    }

    /// Move (or insert) `nodes` so they become item `index`.
    pub(crate) fn insert_at(&self, location: &ChunkLocation, index: usize, nodes: &[NodeId]) {
        let position = self.chunk_length(location) * index + location.start_index;
        animation::insert(&location.runtime, location.parent, position, nodes);
    }

    /// Remove the nodes of item `index`.
    pub(crate) fn remove_at(&self, location: &ChunkLocation, index: usize) {
        let length = self.chunk_length(location);
        if length == 0 {
            return;
        }
        animation::remove(
            &location.runtime,
            location.parent,
            length * index + location.start_index,
            length,
        );
    }

    /// Render `items` with the location's template and insert them as items
    /// `index..index + items.len()`.
    pub(crate) fn insert_rendered(
        &self,
        location: &ChunkLocation,
        observable: &Observable,
        index: usize,
        items: &[Value],
    ) {
        let runtime = &location.runtime;
        let document = runtime.document();
        let mut query = DomQuery::new(runtime.clone());
        let context = runtime.context_of_node(location.wrapper, false);

        let html = query.context_bubble(context, |query| {
            let mut html = String::new();
            for (offset, item) in items.iter().enumerate() {
                let index = observable.index_observable(index + offset, true);
                match crate::query::builtins::render_item(query, &location.each, index, item) {
                    Ok(markup) => html.push_str(&markup),
                    Err(err) => debug::expression_fail(runtime.config().debug, "each", &err),
                }
            }
            html
        });

        if document.is_element(location.wrapper) && document.child_count(location.parent) == 0 {
            document.set_inner_html(location.parent, &html);
            query.bind_nodes(&document.children(location.parent));
            return;
        }
        let fragment = query.create_fragment(&html);
        let nodes = document.children(fragment);
        self.insert_at(location, index, &nodes);
        document.destroy(fragment);
    }

    pub(crate) fn dispose(&self) {
        self.lengths.borrow_mut().clear();
    }
}

fn infer_length(child_count: usize, observable_length: usize) -> usize {
    if observable_length == 0 {
        return 0;
    }
    (child_count as f64 / observable_length as f64).round() as usize
}

fn resolve(runtime: &Runtime, element_id: ElementId, observable: &Observable) -> Option<ChunkLocation> {
    let record = runtime.record(element_id)?;
    let (wrapper, each) = {
        let record = record.borrow();
        (record.dom?, record.each_data.clone()?)
    };
    if each.observable_id != observable.id() {
        return None;
    }
    let document = runtime.document();
    if !document.exists(wrapper) {
        return None;
    }
    let offsets = each.start_offset + each.end_offset;

    let (parent, start_index, child_count) = if document.is_element(wrapper) {
        let total = document.child_count(wrapper);
        (wrapper, each.start_offset, total.saturating_sub(offsets))
    } else {
        let parent = document.parent(wrapper)?;
        let open = document.index_of(wrapper)?;
        let end_marker = format!("{element_id}:/blocks");
        let mut close = open + 1;
        let mut cursor = document.next_sibling(wrapper);
        while let Some(node) = cursor {
            let is_end = document.is_comment(node)
                && document
                    .node_value(node)
                    .is_some_and(|text| text.trim().starts_with(&end_marker));
            if is_end {
                break;
            }
            close += 1;
            cursor = document.next_sibling(node);
        }
        let inner = close - (open + 1);
        (parent, open + 1 + each.start_offset, inner.saturating_sub(offsets))
    };

    Some(ChunkLocation {
        runtime: runtime.clone(),
        element_id,
        wrapper,
        parent,
        each,
        start_index,
        child_count,
        observable_length: observable.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use blocks_dom::Document;
    use proptest::prelude::*;

    fn bound_list(markup: &str, items: &Observable) -> (Runtime, NodeId) {
        let document = Document::new();
        let host = document.create_element("div");
        document.set_inner_html(host, markup);
        document.append_child(document.body(), host);
        let runtime = Runtime::new(document.clone(), RuntimeConfig::default());
        runtime
            .query(Value::object([("items", Value::from(items.clone()))]), Some(host))
            .expect("query");
        let list = document.elements_by_tag_name(host, "ul")[0];
        (runtime, list)
    }

    #[test]
    fn multi_node_chunks_map_and_round_trip() {
        let items = Observable::new(Value::array(vec!["a".into(), "b".into(), "c".into()]));
        let (runtime, list) =
            bound_list(r#"<ul data-query="each(items)"><li>{{$this}}</li><i></i><b></b></ul>"#, &items);
        let document = runtime.document().clone();
        let children = document.children(list);
        assert_eq!(children.len(), 9);

        let manager = ChunkManager::default();
        let locations = manager.locations(&items);
        assert_eq!(locations.len(), 1);
        let location = &locations[0];
        assert_eq!(location.parent, list);
        assert_eq!(manager.chunk_length(location), 3);
        for i in 0..3 {
            assert_eq!(manager.get_at(location, i), children[3 * i..3 * i + 3].to_vec());
        }

        let middle = manager.get_at(location, 1);
        manager.remove_at(location, 1);
        assert_eq!(document.child_count(list), 6);
        assert!(middle.iter().all(|node| document.parent(*node).is_none()));

        manager.insert_at(location, 1, &middle);
        assert_eq!(document.children(list), children);
    }

    #[test]
    fn empty_arrays_have_no_chunks() {
        assert_eq!(infer_length(3, 0), 0);
        assert_eq!(infer_length(0, 4), 0);
    }

    #[test]
    fn inference_rounds_the_ratio() {
        assert_eq!(infer_length(6, 3), 2);
        assert_eq!(infer_length(7, 3), 2);
        assert_eq!(infer_length(8, 3), 3);
    }

    proptest! {
        #[test]
        fn inferred_length_recovers_uniform_chunks(len in 1usize..50, per_item in 0usize..6) {
            prop_assert_eq!(infer_length(len * per_item, len), per_item);
        }
    }
}
