#![forbid(unsafe_code)]

//! Element metadata store.
//!
//! Per-element state lives out of band, keyed by a generated [`ElementId`]
//! that is stamped onto the element itself: a `data-id` attribute on
//! elements (virtual or live), or a ` <id>:blocks ... ` prefix in the text of
//! comment-delimited ranges. Text expression markers get a record with no
//! element at all.
//!
//! # Invariants
//!
//! 1. At most one record exists per id.
//! 2. Ids come from a monotonically increasing counter. Only a forced clear
//!    returns an id to the free list; a record dropped because its node
//!    never bound anything keeps its id retired.
//! 3. Adopting an id stamped by another runtime (server-rendered markup)
//!    moves the counter past it, so fresh ids never collide with adopted
//!    ones.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use blocks_dom::NodeId;
use indexmap::IndexMap;

use crate::context::Context;
use crate::observable::Observable;
use crate::query::QueryCall;
use crate::value::Value;
use crate::virtual_element::VirtualElement;

/// Generated element id.
pub type ElementId = u32;

/// Attribute carrying the element id on elements.
pub const DATA_ID_ATTR: &str = "data-id";

/// `each` binding state kept on the wrapper element's record.
#[derive(Clone)]
pub(crate) struct EachData {
    pub(crate) observable_id: u64,
    /// The wrapper's virtual element; its template renders new items.
    pub(crate) element: VirtualElement,
    /// Static header children before the items.
    pub(crate) start_offset: usize,
    /// Static footer children after the items.
    pub(crate) end_offset: usize,
    /// Top-level node count per item, when the template declares it.
    pub(crate) declared: Option<usize>,
    /// Alias bound to each item (`each(items, 'item')`).
    pub(crate) alias: Option<String>,
}

pub(crate) struct ElementData {
    pub(crate) id: ElementId,
    pub(crate) dom: Option<NodeId>,
    pub(crate) virtual_element: Option<VirtualElement>,
    pub(crate) context: Option<Context>,
    pub(crate) children_context: Option<Context>,
    /// Observables this element subscribed to, keyed by observable id and
    /// query text.
    pub(crate) observables: IndexMap<String, Observable>,
    /// Calls deferred until the element is attached to a live node.
    pub(crate) execute: Vec<Rc<QueryCall>>,
    pub(crate) each_data: Option<EachData>,
    /// Event that writes the element's value back into `value_observable`.
    pub(crate) subscribe: Option<&'static str>,
    pub(crate) update_on: Option<String>,
    pub(crate) value_observable: Option<Observable>,
    pub(crate) animating: u32,
    pub(crate) animate_callback: Option<Value>,
    /// Element whose children `render()` skipped and must render on show.
    pub(crate) render_cache: Option<VirtualElement>,
    pub(crate) have_data: bool,
    /// Still being built from its virtual element.
    pub(crate) preprocess: bool,
}

impl ElementData {
    fn new(id: ElementId, virtual_element: Option<VirtualElement>) -> Self {
        let preprocess = virtual_element.is_some();
        Self {
            id,
            dom: None,
            virtual_element,
            context: None,
            children_context: None,
            observables: IndexMap::new(),
            execute: Vec::new(),
            each_data: None,
            subscribe: None,
            update_on: None,
            value_observable: None,
            animating: 0,
            animate_callback: None,
            render_cache: None,
            have_data: false,
            preprocess,
        }
    }
}

pub(crate) type ElementRecord = Rc<RefCell<ElementData>>;

/// The record table of one runtime.
pub(crate) struct ElementsData {
    records: AHashMap<ElementId, ElementRecord>,
    next_id: ElementId,
    free: Vec<ElementId>,
}

impl Default for ElementsData {
    fn default() -> Self {
        Self {
            records: AHashMap::new(),
            next_id: 1,
            free: Vec::new(),
        }
    }
}

impl ElementsData {
    pub(crate) fn get(&self, id: ElementId) -> Option<ElementRecord> {
        self.records.get(&id).cloned()
    }

    /// Allocate a fresh id, preferring the free list.
    pub(crate) fn allocate(&mut self) -> ElementId {
        while let Some(id) = self.free.pop() {
            if !self.records.contains_key(&id) {
                return id;
            }
        }
        while self.records.contains_key(&self.next_id) {
            self.next_id += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Create a record under a freshly allocated id.
    pub(crate) fn insert(&mut self, virtual_element: Option<VirtualElement>) -> ElementRecord {
        let id = self.allocate();
        self.insert_with_id(id, virtual_element)
    }

    /// Create a record under an id that is already stamped on markup.
    pub(crate) fn adopt(
        &mut self,
        id: ElementId,
        virtual_element: Option<VirtualElement>,
    ) -> ElementRecord {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        if id >= self.next_id {
            self.next_id = id + 1;
        }
        self.free.retain(|free| *free != id);
        self.insert_with_id(id, virtual_element)
    }

    fn insert_with_id(
        &mut self,
        id: ElementId,
        virtual_element: Option<VirtualElement>,
    ) -> ElementRecord {
        let record = Rc::new(RefCell::new(ElementData::new(id, virtual_element)));
        self.records.insert(id, Rc::clone(&record));
        record
    }

    /// Drop the record for `id`; `force` returns the id to the free list.
    pub(crate) fn remove(&mut self, id: ElementId, force: bool) -> Option<ElementRecord> {
        let record = self.records.remove(&id)?;
        if force {
            self.free.push(id);
        }
        Some(record)
    }

    pub(crate) fn ids(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn clear_all(&mut self) -> Vec<ElementRecord> {
        self.next_id = 1;
        self.free.clear();
        self.records.drain().map(|(_, record)| record).collect()
    }
}

/// The id encoded in a comment's text (` 12:blocks each(items) `).
/// End markers (` 12:/blocks `) do not carry an id.
#[must_use]
pub fn parse_comment_id(text: &str) -> Option<ElementId> {
    let rest = text.trim_start();
    if rest.len() == text.len() && !text.is_empty() {
        // The id must follow leading whitespace.
        return None;
    }
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let after = &rest[digits..];
    let mut chars = after.chars();
    if chars.next() != Some(':') {
        return None;
    }
    match chars.next() {
        Some('/') | None => None,
        Some(_) => rest[..digits].parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_until_forced_clear() {
        let mut data = ElementsData::default();
        let a = data.insert(None).borrow().id;
        let b = data.insert(None).borrow().id;
        assert_eq!((a, b), (1, 2));

        data.remove(a, false);
        assert_eq!(data.insert(None).borrow().id, 3);

        data.remove(b, true);
        assert_eq!(data.insert(None).borrow().id, b);
    }

    #[test]
    fn adopting_moves_the_counter_past_the_id() {
        let mut data = ElementsData::default();
        data.adopt(7, None);
        assert_eq!(data.insert(None).borrow().id, 8);
        assert_eq!(data.adopt(7, None).borrow().id, 7);
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn allocation_skips_adopted_ids_below_the_counter() {
        let mut data = ElementsData::default();
        let first = data.insert(None).borrow().id;
        data.remove(first, true);
        data.adopt(first, None);
        assert_eq!(data.insert(None).borrow().id, 2);
    }

    #[test]
    fn comment_ids() {
        assert_eq!(parse_comment_id(" 12:blocks each(items) "), Some(12));
        assert_eq!(parse_comment_id(" 3:blocks "), Some(3));
        assert_eq!(parse_comment_id(" 12:/blocks "), None);
        assert_eq!(parse_comment_id("12:blocks"), None);
        assert_eq!(parse_comment_id(" blocks each(items) "), None);
        assert_eq!(parse_comment_id(" 4: "), Some(4));
    }

    #[test]
    fn clear_all_resets_the_counter() {
        let mut data = ElementsData::default();
        data.insert(None);
        data.insert(None);
        assert_eq!(data.clear_all().len(), 2);
        assert_eq!(data.insert(None).borrow().id, 1);
        assert_eq!(data.ids(), vec![1]);
    }
}
