#![forbid(unsafe_code)]

//! Observables.
//!
//! An [`Observable`] is a shared cell that knows who depends on it. There
//! are three sources:
//!
//! - **plain**: holds a value; writes replace it (array onto array is a
//!   bulk `remove_all` + `add_many` so bound DOM chunks are reused).
//! - **computed**: evaluates a function on every read; writes only notify.
//! - **accessor**: a getter/setter pair; writes call the setter.
//!
//! On top of the value every observable carries four kinds of subscriber,
//! refreshed by [`Observable::update`] in this order:
//!
//! 1. text/attribute **expression** subscriptions (newest first),
//! 2. **element** subscriptions that replay a query call on a node,
//! 3. **dependent** observables (computed values that read this one),
//! 4. **index** observables of an array (`$index` of each item).
//!
//! # Invariants
//!
//! 1. A write that is [`equals`](crate::equality::equals)-equal to the
//!    current value is a no-op: no events, no update.
//! 2. `Changing` runs before the write and may veto it; `Change` runs after
//!    the update pass.
//! 3. While `update` is suspended (inside a bulk array write) it does
//!    nothing; the write calls it once at the end.
//! 4. Dependency discovery for computed and accessor observables happens on
//!    the first read and again after any of their dependencies updates.
//! 5. Expression subscriptions are unique per (runtime, element, attribute)
//!    and element subscriptions per element record key.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Computed function returns an error | Reads yield `undefined`; reported on the debug channel |
//! | Subscriber's node was removed from the document | Subscriber dropped during the next update |
//! | Runtime dropped | Its subscribers are dropped during the next update |
//! | Update re-enters itself through a dependency cycle | Inner update is skipped |

mod array;
mod events;
mod view;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

pub use events::{EventKind, ObservableEvent, Subscription};
pub(crate) use events::EventTable;
pub(crate) use view::DerivedState;
pub use view::Operation;

use crate::chunk::ChunkManager;
use crate::context::Context;
use crate::debug;
use crate::elements::ElementId;
use crate::equality::equals;
use crate::expression::ExpressionSubscription;
use crate::observer;
use crate::query::QueryCall;
use crate::runtime::WeakRuntime;
use crate::value::{Func, Value};

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

fn next_id() -> u64 {
    NEXT_ID.with(|id| {
        let current = id.get();
        id.set(current + 1);
        current
    })
}

pub(crate) enum Source {
    Plain,
    Computed(Func),
    Accessor { get: Func, set: Option<Func> },
}

/// A query call bound to one element record, replayed when an observable it
/// read changes.
pub(crate) struct ElementSubscription {
    pub(crate) runtime: WeakRuntime,
    pub(crate) element_id: ElementId,
    pub(crate) call: Rc<QueryCall>,
    pub(crate) context: Option<Context>,
}

pub(crate) struct ObservableInner {
    id: u64,
    value: RefCell<Value>,
    source: Source,
    this_arg: RefCell<Value>,
    dependents: RefCell<Vec<Weak<ObservableInner>>>,
    discovery_pending: Cell<bool>,
    elements: RefCell<Vec<Rc<ElementSubscription>>>,
    expressions: RefCell<Vec<Rc<ExpressionSubscription>>>,
    expression_keys: RefCell<AHashSet<(u64, ElementId, Option<String>)>>,
    events: EventTable,
    indexes: RefCell<Vec<Observable>>,
    chunks: ChunkManager,
    derived: RefCell<Option<Rc<DerivedState>>>,
    origin: RefCell<Option<Observable>>,
    update_suspended: Cell<bool>,
    updating: Cell<bool>,
}

/// A reactive cell. Cloning an `Observable` clones the handle.
#[derive(Clone)]
pub struct Observable(Rc<ObservableInner>);

/// Non-owning handle to an [`Observable`].
#[derive(Clone)]
pub(crate) struct WeakObservable(Weak<ObservableInner>);

impl WeakObservable {
    pub(crate) fn upgrade(&self) -> Option<Observable> {
        self.0.upgrade().map(Observable)
    }
}

impl Observable {
    /// A plain observable. An observable passed as `initial` is read
    /// through, not nested.
    pub fn new(initial: impl Into<Value>) -> Self {
        Self::from_source(initial.into().peek(), Source::Plain)
    }

    /// A computed observable over `f`.
    pub fn computed(f: impl Fn() -> Value + 'static) -> Self {
        Self::computed_with(Func::new(move |_, _| Ok(f())))
    }

    /// A computed observable over a host function called with the
    /// observable's `this` value.
    pub fn computed_with(f: Func) -> Self {
        let observable = Self::from_source(Value::Undefined, Source::Computed(f));
        observable.0.discovery_pending.set(true);
        observable
    }

    /// An accessor observable. Without a setter, writes only notify.
    pub fn accessor(get: Func, set: Option<Func>) -> Self {
        let observable = Self::from_source(Value::Undefined, Source::Accessor { get, set });
        observable.0.discovery_pending.set(true);
        observable
    }

    fn from_source(value: Value, source: Source) -> Self {
        Self(Rc::new(ObservableInner {
            id: next_id(),
            value: RefCell::new(value),
            source,
            this_arg: RefCell::new(Value::Undefined),
            dependents: RefCell::new(Vec::new()),
            discovery_pending: Cell::new(false),
            elements: RefCell::new(Vec::new()),
            expressions: RefCell::new(Vec::new()),
            expression_keys: RefCell::new(AHashSet::new()),
            events: EventTable::default(),
            indexes: RefCell::new(Vec::new()),
            chunks: ChunkManager::default(),
            derived: RefCell::new(None),
            origin: RefCell::new(None),
            update_suspended: Cell::new(false),
            updating: Cell::new(false),
        }))
    }

    /// Set the `this` value passed to computed functions and accessors.
    #[must_use]
    pub fn with_this(self, this: Value) -> Self {
        self.set_this(this);
        self
    }

    pub fn set_this(&self, this: Value) {
        *self.0.this_arg.borrow_mut() = this;
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakObservable {
        WeakObservable(Rc::downgrade(&self.0))
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        !matches!(self.0.source, Source::Plain)
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Read the value, registering the read with the active dependency
    /// frame.
    #[must_use]
    pub fn get(&self) -> Value {
        self.0.events.emit(&ObservableEvent::Get);
        self.discover_dependencies();
        let value = self.peek();
        observer::register(self);
        value
    }

    /// Read the value without registering the read or raising `Get`.
    #[must_use]
    pub fn peek(&self) -> Value {
        match &self.0.source {
            Source::Plain => self.0.value.borrow().clone(),
            Source::Computed(f) | Source::Accessor { get: f, .. } => {
                observer::untracked(|| self.call_source(f, &[]))
            }
        }
    }

    fn call_source(&self, f: &Func, args: &[Value]) -> Value {
        let this = self.0.this_arg.borrow().clone();
        f.call(&this, args).unwrap_or_else(|err| {
            debug::expression_fail(false, "observable", &err);
            Value::Undefined
        })
    }

    fn discover_dependencies(&self) {
        if !self.0.discovery_pending.replace(false) {
            return;
        }
        let f = match &self.0.source {
            Source::Plain => return,
            Source::Computed(f) | Source::Accessor { get: f, .. } => f.clone(),
        };
        let ((), dependencies) = observer::observe(|| {
            let this = self.0.this_arg.borrow().clone();
            let _ = f.call(&this, &[]);
        });
        for dependency in dependencies {
            if !dependency.ptr_eq(self) {
                dependency.add_dependent(self);
            }
        }
    }

    pub(crate) fn add_dependent(&self, dependent: &Observable) {
        let mut dependents = self.0.dependents.borrow_mut();
        let exists = dependents
            .iter()
            .any(|w| w.upgrade().is_some_and(|d| Rc::ptr_eq(&d, &dependent.0)));
        if !exists {
            dependents.push(Rc::downgrade(&dependent.0));
        }
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Write `value`.
    ///
    /// Equal writes are ignored. A `Changing` handler returning `false`
    /// cancels the write. Array onto array is applied as `remove_all` then
    /// `add_many`, so bound DOM chunks are rebuilt in place.
    pub fn set(&self, value: impl Into<Value>) {
        if let Some(origin) = self.origin() {
            origin.set(value);
            return;
        }
        let value = value.into();
        let current = self.peek();
        if equals(&value, &current, false) {
            return;
        }
        if !self.0.events.emit(&ObservableEvent::Changing {
            new: &value,
            old: &current,
        }) {
            return;
        }

        let mut old = current.clone();
        self.0.update_suspended.set(true);
        match &self.0.source {
            Source::Plain => match (&current, &value) {
                (Value::Array(current_items), Value::Array(new_items)) => {
                    old = Value::array(current_items.borrow().clone());
                    let items = new_items.borrow().clone();
                    self.remove_all();
                    self.add_many(items, None);
                }
                _ => *self.0.value.borrow_mut() = value.clone(),
            },
            Source::Computed(_) => {}
            Source::Accessor { set: Some(setter), .. } => {
                let _ = self.call_source(setter, std::slice::from_ref(&value));
            }
            Source::Accessor { set: None, .. } => {}
        }
        self.0.update_suspended.set(false);

        self.update();
        self.0.events.emit(&ObservableEvent::Change {
            new: &value,
            old: &old,
        });
    }

    /// Refresh every subscriber.
    pub fn update(&self) {
        if self.0.update_suspended.get() || self.0.updating.replace(true) {
            return;
        }
        let _span = tracing::debug_span!("blocks.observable.update", id = self.0.id).entered();

        self.refresh_expressions();
        self.replay_elements();
        self.update_dependents();
        self.refresh_indexes();

        self.0.updating.set(false);
    }

    fn refresh_expressions(&self) {
        let subscriptions = self.0.expressions.borrow().clone();
        let mut dead = Vec::new();
        for subscription in subscriptions.iter().rev() {
            if !subscription.refresh() {
                dead.push(Rc::clone(subscription));
            }
        }
        if !dead.is_empty() {
            let mut keys = self.0.expression_keys.borrow_mut();
            for subscription in &dead {
                keys.remove(&subscription.key());
            }
            self.0
                .expressions
                .borrow_mut()
                .retain(|s| !dead.iter().any(|d| Rc::ptr_eq(s, d)));
        }
    }

    fn replay_elements(&self) {
        let subscriptions = self.0.elements.borrow().clone();
        let mut dead = Vec::new();
        for subscription in &subscriptions {
            if !subscription.replay() {
                dead.push(Rc::clone(subscription));
            }
        }
        if !dead.is_empty() {
            self.0
                .elements
                .borrow_mut()
                .retain(|s| !dead.iter().any(|d| Rc::ptr_eq(s, d)));
        }
    }

    fn update_dependents(&self) {
        let dependents: Vec<Observable> = {
            let mut list = self.0.dependents.borrow_mut();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(|w| w.upgrade().map(Observable)).collect()
        };
        for dependent in dependents {
            if dependent.is_computed() {
                dependent.0.discovery_pending.set(true);
            }
            dependent.update();
        }
    }

    fn refresh_indexes(&self) {
        let indexes = self.0.indexes.borrow().clone();
        for (i, index) in indexes.iter().enumerate() {
            index.set(i);
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register `handler` for `kind`.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ObservableEvent<'_>) + 'static,
    ) -> Subscription {
        self.0.events.add(
            kind,
            Rc::new(move |event| {
                handler(event);
                true
            }),
        )
    }

    /// Register a `Changing` handler that may veto writes by returning
    /// `false`. Receives `(new, old)`.
    pub fn on_changing(&self, handler: impl Fn(&Value, &Value) -> bool + 'static) -> Subscription {
        self.0.events.add(
            EventKind::Changing,
            Rc::new(move |event| match event {
                ObservableEvent::Changing { new, old } => handler(new, old),
                _ => true,
            }),
        )
    }

    pub(crate) fn emit(&self, event: &ObservableEvent<'_>) -> bool {
        self.0.events.emit(event)
    }

    // -----------------------------------------------------------------------
    // Subscribers
    // -----------------------------------------------------------------------

    pub(crate) fn add_element_subscription(&self, subscription: Rc<ElementSubscription>) {
        self.0.elements.borrow_mut().push(subscription);
    }

    pub(crate) fn element_subscriptions(&self) -> Vec<Rc<ElementSubscription>> {
        self.0.elements.borrow().clone()
    }

    /// Add an expression subscription unless one with the same key exists.
    pub(crate) fn add_expression_subscription(&self, subscription: Rc<ExpressionSubscription>) -> bool {
        if !self.0.expression_keys.borrow_mut().insert(subscription.key()) {
            return false;
        }
        self.0.expressions.borrow_mut().push(subscription);
        true
    }

    /// Drop every subscription belonging to `element` of `runtime`.
    pub(crate) fn remove_subscriptions_for(&self, runtime: u64, element: ElementId) {
        self.0
            .elements
            .borrow_mut()
            .retain(|s| !(s.runtime.id() == runtime && s.element_id == element));
        let mut keys = self.0.expression_keys.borrow_mut();
        self.0.expressions.borrow_mut().retain(|s| {
            let (rt, id, _) = s.key();
            let keep = !(rt == runtime && id == element);
            if !keep {
                keys.remove(&s.key());
            }
            keep
        });
    }

    pub(crate) fn chunks(&self) -> &ChunkManager {
        &self.0.chunks
    }

    #[must_use]
    pub fn element_subscription_count(&self) -> usize {
        self.0.elements.borrow().len()
    }

    #[must_use]
    pub fn expression_subscription_count(&self) -> usize {
        self.0.expressions.borrow().len()
    }

    #[must_use]
    pub fn dependent_count(&self) -> usize {
        self.0
            .dependents
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.0.events.count(kind)
    }

    /// Detach every subscriber and handler.
    pub fn dispose(&self) {
        self.0.elements.borrow_mut().clear();
        self.0.expressions.borrow_mut().clear();
        self.0.expression_keys.borrow_mut().clear();
        self.0.dependents.borrow_mut().clear();
        self.0.events.clear();
        self.0.derived.borrow_mut().take();
    }

    // -----------------------------------------------------------------------
    // Derivation
    // -----------------------------------------------------------------------

    /// A plain observable sharing this observable's current value.
    #[must_use]
    pub fn clone_observable(&self) -> Self {
        let copy = Self::from_source(self.peek(), Source::Plain);
        copy.set_this(self.0.this_arg.borrow().clone());
        copy
    }

    /// The observable a derived observable forwards its writes to.
    #[must_use]
    pub fn origin(&self) -> Option<Observable> {
        self.0.origin.borrow().clone()
    }

    pub(crate) fn derived_state(&self) -> Option<Rc<DerivedState>> {
        self.0.derived.borrow().clone()
    }

    pub(crate) fn this_arg(&self) -> Value {
        self.0.this_arg.borrow().clone()
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.0.source {
            Source::Plain => "plain",
            Source::Computed(_) => "computed",
            Source::Accessor { .. } => "accessor",
        };
        f.debug_struct("Observable")
            .field("id", &self.0.id)
            .field("kind", &kind)
            .field("value", &self.0.value.try_borrow().map(|v| v.clone()).ok())
            .finish()
    }
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// Convenience: the items of an array value, or an empty list.
pub(crate) fn array_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.borrow().clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn(&ObservableEvent<'_>) + 'static) {
        let hits = Rc::new(Cell::new(0));
        let seen = Rc::clone(&hits);
        (hits, move |_: &ObservableEvent<'_>| seen.set(seen.get() + 1))
    }

    #[test]
    fn initial_observable_is_read_through() {
        let inner = Observable::new(5);
        let outer = Observable::new(inner.clone());
        assert_eq!(outer.peek(), Value::from(5));
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let obs = Observable::new(1);
        let (hits, handler) = counter();
        let _sub = obs.on(EventKind::Change, handler);
        obs.set(1);
        assert_eq!(hits.get(), 0);
        obs.set(2);
        assert_eq!(hits.get(), 1);
        assert_eq!(obs.peek(), Value::from(2));
    }

    #[test]
    fn nan_onto_nan_is_a_no_op_but_signed_zero_is_not() {
        let obs = Observable::new(f64::NAN);
        let (hits, handler) = counter();
        let _sub = obs.on(EventKind::Change, handler);
        obs.set(f64::NAN);
        assert_eq!(hits.get(), 0);

        let zero = Observable::new(0.0);
        let (zero_hits, handler) = counter();
        let _sub = zero.on(EventKind::Change, handler);
        zero.set(-0.0);
        assert_eq!(zero_hits.get(), 1);
    }

    #[test]
    fn changing_handler_can_veto() {
        let obs = Observable::new("a");
        let _veto = obs.on_changing(|new, _old| new.as_str() != Some("blocked"));
        obs.set("blocked");
        assert_eq!(obs.peek(), Value::from("a"));
        obs.set("ok");
        assert_eq!(obs.peek(), Value::from("ok"));
    }

    #[test]
    fn change_event_reports_old_and_new() {
        let obs = Observable::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = obs.on(EventKind::Change, move |event| {
            if let ObservableEvent::Change { new, old } = event {
                sink.borrow_mut().push((new.to_number(), old.to_number()));
            }
        });
        obs.set(2);
        assert_eq!(*log.borrow(), vec![(2.0, 1.0)]);
    }

    #[test]
    fn computed_tracks_dependencies_after_first_read() {
        let first = Observable::new("Ann");
        let last = Observable::new("Lee");
        let (f, l) = (first.clone(), last.clone());
        let full = Observable::computed(move || {
            Value::from(format!(
                "{} {}",
                f.get().to_display_string(),
                l.get().to_display_string()
            ))
        });
        assert_eq!(first.dependent_count(), 0);
        assert_eq!(full.get(), Value::from("Ann Lee"));
        assert_eq!(first.dependent_count(), 1);
        assert_eq!(last.dependent_count(), 1);

        // Repeated reads do not duplicate the dependency.
        let _ = full.get();
        first.set("Bo");
        let _ = full.get();
        assert_eq!(first.dependent_count(), 1);
        assert_eq!(full.peek(), Value::from("Bo Lee"));
    }

    #[test]
    fn reading_a_computed_registers_only_the_computed() {
        let base = Observable::new(2);
        let b = base.clone();
        let doubled = Observable::computed(move || Value::from(b.get().to_number() * 2.0));
        let (value, seen) = observer::observe(|| doubled.get());
        assert_eq!(value, Value::from(4));
        assert_eq!(seen.len(), 1);
        assert!(seen[0].ptr_eq(&doubled));
    }

    #[test]
    fn accessor_write_calls_setter() {
        let store = Rc::new(RefCell::new(Value::from(1)));
        let (r, w) = (Rc::clone(&store), Rc::clone(&store));
        let obs = Observable::accessor(
            Func::new(move |_, _| Ok(r.borrow().clone())),
            Some(Func::new(move |_, args| {
                *w.borrow_mut() = args.first().cloned().unwrap_or_default();
                Ok(Value::Undefined)
            })),
        );
        obs.set(9);
        assert_eq!(obs.get(), Value::from(9));
    }

    #[test]
    fn computed_write_notifies_without_storing() {
        let obs = Observable::computed(|| Value::from(1));
        let (hits, handler) = counter();
        let _sub = obs.on(EventKind::Change, handler);
        obs.set(2);
        assert_eq!(hits.get(), 1);
        assert_eq!(obs.peek(), Value::from(1));
    }

    #[test]
    fn dependents_are_weak() {
        let base = Observable::new(1);
        {
            let b = base.clone();
            let derived = Observable::computed(move || b.get());
            let _ = derived.get();
            assert_eq!(base.dependent_count(), 1);
        }
        assert_eq!(base.dependent_count(), 0);
    }

    #[test]
    fn get_event_fires_before_read() {
        let obs = Observable::new(1);
        let (hits, handler) = counter();
        let _sub = obs.on(EventKind::Get, handler);
        let _ = obs.get();
        let _ = obs.peek();
        assert_eq!(hits.get(), 1);
    }
}
