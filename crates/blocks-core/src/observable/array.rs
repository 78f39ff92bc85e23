#![forbid(unsafe_code)]

//! Array operations on observables.
//!
//! Every mutation is applied to three things in lockstep: the shared item
//! vector, the per-item `$index` observables, and the live DOM chunks of
//! every `each` location bound to the observable (through the
//! [`ChunkManager`](crate::chunk::ChunkManager)). Removal and insertion
//! touch only the affected chunks; surviving nodes keep their identity.
//!
//! Mutations on a derived observable (a filter/sort/skip/take view source)
//! are forwarded to the observable it was derived from.

use std::cmp::Ordering;
use std::rc::Rc;

use super::{Observable, ObservableEvent, array_items};
use crate::chunk::ChunkLocation;
use crate::equality::strict_equals;
use crate::value::{ArrayRef, Value};

impl Observable {
    /// The shared item vector. A non-array value is replaced by an empty
    /// array first.
    pub(crate) fn items(&self) -> ArrayRef {
        if let Value::Array(items) = &*self.0.value.borrow() {
            return Rc::clone(items);
        }
        let items = ArrayRef::default();
        *self.0.value.borrow_mut() = Value::Array(Rc::clone(&items));
        items
    }

    /// Whether the current value is an array.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.peek(), Value::Array(_))
    }

    /// Number of items, without registering a read.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.peek() {
            Value::Array(items) => items.borrow().len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The items, registering a read.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        array_items(&self.get())
    }

    /// The `$index` observable for `index`.
    ///
    /// Index observables are created lazily in item order while a location
    /// renders; once the list is complete (or `force` is set) the existing
    /// entry is returned.
    pub(crate) fn index_observable(&self, index: usize, force: bool) -> Observable {
        let len = self.len();
        let mut indexes = self.0.indexes.borrow_mut();
        if indexes.len() == len || force {
            return indexes
                .get(index)
                .cloned()
                .unwrap_or_else(|| Observable::new(index));
        }
        let observable = Observable::new(index);
        indexes.push(observable.clone());
        observable
    }

    /// Fill the index list up to the item count so splices can keep it in
    /// step. Skipped while nobody has asked for `$index` and nothing is
    /// bound.
    fn complete_indexes(&self, locations: &[ChunkLocation]) -> bool {
        let len = self.len();
        let mut indexes = self.0.indexes.borrow_mut();
        if indexes.is_empty() && locations.is_empty() {
            return false;
        }
        while indexes.len() < len {
            let next = indexes.len();
            indexes.push(Observable::new(next));
        }
        indexes.truncate(len);
        true
    }

    // -----------------------------------------------------------------------
    // Whole-array operations
    // -----------------------------------------------------------------------

    /// Replace the items with `value` (an array), or with nothing.
    pub fn reset(&self, value: impl Into<Value>) {
        let value = value.into();
        let value = if matches!(value, Value::Array(_)) {
            value
        } else {
            Value::array(Vec::new())
        };
        self.set(value);
    }

    /// Remove every item.
    pub fn remove_all(&self) {
        if let Some(origin) = self.origin() {
            origin.remove_all();
            return;
        }
        let items = self.items();
        let doomed = items.borrow().clone();
        self.emit(&ObservableEvent::Removing {
            index: 0,
            items: &doomed,
        });
        for location in self.chunks().locations(self) {
            for _ in 0..doomed.len() {
                self.chunks().remove_at(&location, 0);
            }
            location.collect_garbage();
        }
        self.0.indexes.borrow_mut().clear();
        items.borrow_mut().clear();
        self.emit(&ObservableEvent::Remove {
            index: 0,
            items: &doomed,
        });
        self.chunks().dispose();
        self.update();
    }

    /// Remove every item matching `predicate(item, index)`.
    pub fn remove_all_where(&self, predicate: impl FnMut(&Value, usize) -> bool) {
        self.remove_matching(predicate, false);
    }

    /// Remove the first item matching `predicate(item, index)`.
    pub fn remove_where(&self, predicate: impl FnMut(&Value, usize) -> bool) {
        self.remove_matching(predicate, true);
    }

    /// Remove the first item strictly equal to `value`.
    pub fn remove(&self, value: &Value) {
        self.remove_matching(|item, _| strict_equals(item, value), true);
    }

    fn remove_matching(&self, mut predicate: impl FnMut(&Value, usize) -> bool, only_one: bool) {
        if let Some(origin) = self.origin() {
            origin.remove_matching(predicate, only_one);
            return;
        }
        let items = self.items();
        let mut i = 0;
        loop {
            let Some(item) = items.borrow().get(i).cloned() else {
                break;
            };
            if predicate(&item, i) {
                self.splice(i as isize, 1, Vec::new());
                if only_one {
                    break;
                }
            } else {
                i += 1;
            }
        }
        self.update();
    }

    // -----------------------------------------------------------------------
    // Insertion and removal
    // -----------------------------------------------------------------------

    /// Insert `value` at `index` (the end when `None`).
    pub fn add(&self, value: impl Into<Value>, index: Option<usize>) {
        self.add_many(vec![value.into()], index);
    }

    /// Insert `values` at `index` (the end when `None`).
    pub fn add_many(&self, values: Vec<Value>, index: Option<usize>) {
        let index = index.unwrap_or_else(|| self.len());
        self.splice(index as isize, 0, values);
    }

    /// Append `value`; returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        self.add(value, None);
        self.len()
    }

    /// Prepend `values`; returns the new length.
    pub fn unshift(&self, values: Vec<Value>) -> usize {
        self.add_many(values, Some(0));
        self.len()
    }

    pub fn pop(&self) -> Option<Value> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.splice(len as isize - 1, 1, Vec::new()).into_iter().next()
    }

    pub fn shift(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        self.splice(0, 1, Vec::new()).into_iter().next()
    }

    /// Remove the item at `index`.
    pub fn remove_at(&self, index: usize) -> Vec<Value> {
        self.remove_range(index, 1)
    }

    /// Remove `count` items starting at `index`.
    pub fn remove_range(&self, index: usize, count: usize) -> Vec<Value> {
        self.splice(index as isize, count, Vec::new())
    }

    /// Remove `how_many` items at `index`, then insert `items` there.
    /// A negative `index` counts from the end. Returns the removed items.
    pub fn splice(&self, index: isize, how_many: usize, items: Vec<Value>) -> Vec<Value> {
        if let Some(origin) = self.origin() {
            return origin.splice(index, how_many, items);
        }
        let array = self.items();
        let len = array.borrow().len();
        let start = if index < 0 {
            len.saturating_sub(index.unsigned_abs())
        } else {
            (index as usize).min(len)
        };

        let mut removed = Vec::new();
        if how_many > 0 && start < len {
            let count = how_many.min(len - start);
            let doomed = array.borrow()[start..start + count].to_vec();
            self.emit(&ObservableEvent::Removing {
                index: start,
                items: &doomed,
            });
            let locations = self.chunks().locations(self);
            let track_indexes = self.complete_indexes(&locations);
            for location in &locations {
                for _ in 0..count {
                    self.chunks().remove_at(location, start);
                }
                location.collect_garbage();
            }
            if track_indexes {
                self.0.indexes.borrow_mut().drain(start..start + count);
            }
            removed = array.borrow_mut().drain(start..start + count).collect();
            self.emit(&ObservableEvent::Remove {
                index: start,
                items: &removed,
            });
            self.chunks().dispose();
        }

        if !items.is_empty() {
            let start = start.min(array.borrow().len());
            self.emit(&ObservableEvent::Adding {
                index: start,
                items: &items,
            });
            let locations = self.chunks().locations(self);
            if self.complete_indexes(&locations) {
                let mut indexes = self.0.indexes.borrow_mut();
                for offset in 0..items.len() {
                    indexes.insert(start + offset, Observable::new(start + offset));
                }
            }
            for location in &locations {
                self.chunks().insert_rendered(location, self, start, &items);
            }
            array
                .borrow_mut()
                .splice(start..start, items.iter().cloned());
            self.emit(&ObservableEvent::Add {
                index: start,
                items: &items,
            });
        }

        self.chunks().dispose();
        self.update();
        removed
    }

    // -----------------------------------------------------------------------
    // Reordering
    // -----------------------------------------------------------------------

    /// Exchange the items at `a` and `b`, moving their DOM chunks.
    pub fn swap(&self, a: usize, b: usize) {
        if let Some(origin) = self.origin() {
            origin.swap(a, b);
            return;
        }
        let array = self.items();
        let len = array.borrow().len();
        if a == b || a >= len || b >= len {
            return;
        }
        let (min, max) = (a.min(b), a.max(b));
        let locations = self.chunks().locations(self);
        array.borrow_mut().swap(min, max);
        {
            let mut indexes = self.0.indexes.borrow_mut();
            if indexes.len() == len {
                indexes.swap(min, max);
            }
        }
        for location in &locations {
            let first = self.chunks().get_at(location, min);
            self.chunks().insert_at(location, max, &first);
            let second = self.chunks().get_at(location, max);
            self.chunks().insert_at(location, min, &second);
        }
        self.chunks().dispose();
        self.update();
    }

    /// Move the item at `source` so it ends up at `target`.
    pub fn move_item(&self, source: usize, target: usize) {
        if let Some(origin) = self.origin() {
            origin.move_item(source, target);
            return;
        }
        let array = self.items();
        let len = array.borrow().len();
        if source == target || source >= len || target >= len {
            return;
        }
        let locations = self.chunks().locations(self);
        {
            let mut items = array.borrow_mut();
            let item = items.remove(source);
            items.insert(target, item);
        }
        {
            let mut indexes = self.0.indexes.borrow_mut();
            if indexes.len() == len {
                let index = indexes.remove(source);
                indexes.insert(target, index);
            }
        }
        let physical = if target > source { target + 1 } else { target };
        for location in &locations {
            let chunk = self.chunks().get_at(location, source);
            self.chunks().insert_at(location, physical, &chunk);
        }
        self.chunks().dispose();
        self.update();
    }

    /// Reverse the items in place.
    pub fn reverse(&self) {
        if let Some(origin) = self.origin() {
            origin.reverse();
            return;
        }
        let array = self.items();
        let len = array.borrow().len();
        let locations = self.chunks().locations(self);
        array.borrow_mut().reverse();
        {
            let mut indexes = self.0.indexes.borrow_mut();
            if indexes.len() == len {
                indexes.reverse();
            }
        }
        for location in &locations {
            for j in 1..len {
                let chunk = self.chunks().get_at(location, j);
                self.chunks().insert_at(location, 0, &chunk);
            }
        }
        self.chunks().dispose();
        self.update();
    }

    /// Sort in natural order (numbers numerically, otherwise by text).
    pub fn sort(&self) {
        self.sort_by(natural_order);
    }

    /// Stable sort by `compare`, moving DOM chunks along with their items.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        if let Some(origin) = self.origin() {
            origin.sort_by(compare);
            return;
        }
        let array = self.items();
        let len = array.borrow().len();
        let locations = self.chunks().locations(self);
        let snapshot = array.borrow().clone();
        let mut decorated: Vec<(Value, usize, Vec<Vec<blocks_dom::NodeId>>)> = snapshot
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let chunks = locations
                    .iter()
                    .map(|location| self.chunks().get_at(location, i))
                    .collect();
                (item, i, chunks)
            })
            .collect();
        decorated.sort_by(|a, b| compare(&a.0, &b.0));

        {
            let mut indexes = self.0.indexes.borrow_mut();
            if indexes.len() == len {
                let previous = std::mem::take(&mut *indexes);
                *indexes = decorated
                    .iter()
                    .map(|(_, i, _)| previous[*i].clone())
                    .collect();
            }
        }
        *array.borrow_mut() = decorated.iter().map(|(item, _, _)| item.clone()).collect();
        for (_, _, chunks) in &decorated {
            for (location, chunk) in locations.iter().zip(chunks) {
                self.chunks().insert_at(location, len, chunk);
            }
        }
        self.chunks().dispose();
        self.update();
    }

    // -----------------------------------------------------------------------
    // Read helpers
    // -----------------------------------------------------------------------

    /// Items in `start..end` (clamped), registering a read.
    #[must_use]
    pub fn slice(&self, start: usize, end: Option<usize>) -> Vec<Value> {
        let items = self.to_vec();
        let end = end.unwrap_or(items.len()).min(items.len());
        if start >= end {
            return Vec::new();
        }
        items[start..end].to_vec()
    }

    /// Items joined by `separator`, registering a read.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.to_vec()
            .iter()
            .map(Value::to_template_string)
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Items followed by `others`, registering a read.
    #[must_use]
    pub fn concat(&self, others: &[Value]) -> Vec<Value> {
        let mut items = self.to_vec();
        items.extend_from_slice(others);
        items
    }
}

/// Numbers compare numerically; anything else compares by display text.
pub(crate) fn natural_order(a: &Value, b: &Value) -> Ordering {
    match (a.peek(), b.peek()) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (x, y) => x.to_template_string().cmp(&y.to_template_string()),
    }
}
