#![forbid(unsafe_code)]

//! Per-observable event table.
//!
//! Handlers run synchronously in registration order. A handler returning
//! `false` vetoes a `Changing` event; the return value is ignored for every
//! other kind. Handlers are cloned out of the table before they run, so a
//! handler may subscribe or unsubscribe (itself included) while it runs.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::value::Value;

/// The kinds of event an observable raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Raised on every tracked read, before the value is computed.
    Get,
    /// Raised before a write; a handler may veto it.
    Changing,
    Change,
    Adding,
    Add,
    Removing,
    Remove,
}

/// Payload passed to event handlers.
#[derive(Debug, Clone, Copy)]
pub enum ObservableEvent<'a> {
    Get,
    Changing { new: &'a Value, old: &'a Value },
    Change { new: &'a Value, old: &'a Value },
    Adding { index: usize, items: &'a [Value] },
    Add { index: usize, items: &'a [Value] },
    Removing { index: usize, items: &'a [Value] },
    Remove { index: usize, items: &'a [Value] },
}

impl ObservableEvent<'_> {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Get => EventKind::Get,
            Self::Changing { .. } => EventKind::Changing,
            Self::Change { .. } => EventKind::Change,
            Self::Adding { .. } => EventKind::Adding,
            Self::Add { .. } => EventKind::Add,
            Self::Removing { .. } => EventKind::Removing,
            Self::Remove { .. } => EventKind::Remove,
        }
    }

    /// `(index, items)` for the array events.
    #[must_use]
    pub fn splice(&self) -> Option<(usize, &[Value])> {
        match self {
            Self::Adding { index, items }
            | Self::Add { index, items }
            | Self::Removing { index, items }
            | Self::Remove { index, items } => Some((*index, items)),
            _ => None,
        }
    }
}

pub(crate) type Handler = Rc<dyn Fn(&ObservableEvent<'_>) -> bool>;

#[derive(Default)]
pub(crate) struct EventTableInner {
    next_id: Cell<u64>,
    handlers: RefCell<SmallVec<[(u64, EventKind, Handler); 2]>>,
}

#[derive(Clone, Default)]
pub(crate) struct EventTable(Rc<EventTableInner>);

impl EventTable {
    pub(crate) fn add(&self, kind: EventKind, handler: Handler) -> Subscription {
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        self.0.handlers.borrow_mut().push((id, kind, handler));
        Subscription {
            table: Rc::downgrade(&self.0),
            id,
            armed: true,
        }
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.0
            .handlers
            .borrow()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    pub(crate) fn clear(&self) {
        self.0.handlers.borrow_mut().clear();
    }

    /// Run every handler for `event.kind()`. Returns `false` when any
    /// handler returned `false`.
    pub(crate) fn emit(&self, event: &ObservableEvent<'_>) -> bool {
        let kind = event.kind();
        let handlers: SmallVec<[Handler; 4]> = self
            .0
            .handlers
            .borrow()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| Rc::clone(h))
            .collect();
        let mut accepted = true;
        for handler in handlers {
            accepted &= handler(event);
        }
        accepted
    }
}

/// RAII guard for an event handler. Dropping it removes the handler.
#[must_use = "dropping a Subscription unsubscribes immediately; call keep() to detach it"]
pub struct Subscription {
    table: Weak<EventTableInner>,
    id: u64,
    armed: bool,
}

impl Subscription {
    /// Leave the handler registered for the lifetime of the observable.
    pub fn keep(mut self) {
        self.armed = false;
    }

    /// Remove the handler now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn remove(&self) {
        if let Some(table) = self.table.upgrade() {
            table.handlers.borrow_mut().retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.armed {
            self.remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("armed", &self.armed)
            .finish()
    }
}
