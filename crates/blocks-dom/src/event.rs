#![forbid(unsafe_code)]

//! Events dispatched through the headless document.

use std::cell::Cell;
use std::rc::Rc;

use crate::node::NodeId;

/// Callback registered with [`Document::add_event_listener`](crate::Document::add_event_listener).
pub type Listener = Rc<dyn Fn(&DomEvent)>;

/// Handle returned when a listener is registered; used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// A bubbling DOM event.
#[derive(Debug)]
pub struct DomEvent {
    kind: String,
    target: NodeId,
    key: Option<String>,
    current_target: Cell<Option<NodeId>>,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
}

impl DomEvent {
    /// Create an event of `kind` aimed at `target`.
    #[must_use]
    pub fn new(kind: impl Into<String>, target: NodeId) -> Self {
        Self {
            kind: kind.into(),
            target,
            key: None,
            current_target: Cell::new(None),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
        }
    }

    /// Attach a keyboard key (for `keydown`/`keyup`/`keypress`).
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The node whose listeners are currently running.
    #[must_use]
    pub fn current_target(&self) -> Option<NodeId> {
        self.current_target.get()
    }

    pub(crate) fn set_current_target(&self, node: NodeId) {
        self.current_target.set(Some(node));
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    #[must_use]
    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    /// Stop the event from reaching ancestors of the current target.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }
}
