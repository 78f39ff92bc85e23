#![forbid(unsafe_code)]

//! Bounded string-keyed cache used for compiled expressions and query plans.
//!
//! Entries are immutable once inserted. A cache that reaches its capacity
//! is flushed wholesale before the next insert.

use std::rc::Rc;

use ahash::AHashMap;

pub(crate) struct BoundedCache<T> {
    entries: AHashMap<String, Rc<T>>,
    capacity: usize,
    flushes: usize,
}

impl<T> BoundedCache<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: AHashMap::new(),
            capacity: capacity.max(1),
            flushes: 0,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Rc<T>> {
        self.entries.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: &str, value: T) -> Rc<T> {
        if self.entries.len() >= self.capacity {
            self.entries.clear();
            self.flushes += 1;
            tracing::debug!(capacity = self.capacity, flushes = self.flushes, "cache flushed");
        }
        let value = Rc::new(value);
        self.entries.insert(key.to_owned(), Rc::clone(&value));
        value
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
