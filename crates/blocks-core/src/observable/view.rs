#![forbid(unsafe_code)]

//! Derived views: `filter`, `step`, `skip`, `take` and `sort` extenders.
//!
//! Extending an array observable returns a *derived* observable that
//! shares the source's items and owns a separate `view` observable holding
//! the pipeline's output. The view is computed lazily on its first read and
//! recomputed when the source adds or removes items or when an observable
//! read by the pipeline changes.
//!
//! Recomputation is incremental. A connection map remembers which source
//! index feeds which view slot; each pass classifies every source item as
//! kept, added or removed and splices only the difference into the view,
//! so DOM chunks bound to surviving view items keep their identity. Source
//! additions and removals shift the connection keys instead of resetting
//! the view (pipelines containing a sort are rebuilt from scratch, since
//! any insertion can reorder everything).
//!
//! # Failure Modes
//!
//! A pipeline callback that returns an error is treated as `undefined`
//! (falsy for a filter) and reported on the debug channel.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::array::natural_order;
use super::{EventKind, Observable, ObservableEvent, Source, Subscription, WeakObservable};
use crate::BlocksError;
use crate::debug;
use crate::equality::strict_equals;
use crate::observer::ObserveGuard;
use crate::value::{Func, Value};

/// One stage of a derived pipeline.
#[derive(Clone, Debug)]
pub enum Operation {
    /// Keep items for which `f(item, index, items)` is truthy.
    Filter(Func),
    /// Run the pipeline so far into a scratch view and hand it to `f`.
    Step(Func),
    /// Drop this many leading items (a number, observable or function).
    Skip(Value),
    /// Keep at most this many items (a number, observable or function).
    Take(Value),
    /// Sort by a key name, a comparator function, or naturally.
    Sort(Value),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Exists,
    Add,
    Remove,
}

pub(crate) struct DerivedState {
    operations: Vec<Operation>,
    view: Observable,
    /// Source index -> view index.
    connections: RefCell<BTreeMap<usize, usize>>,
    initialized: Cell<bool>,
    observed: RefCell<Vec<Subscription>>,
    lazy_init: RefCell<Option<Subscription>>,
    origin_events: RefCell<Vec<Subscription>>,
}

impl DerivedState {
    fn has_sort(&self) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, Operation::Sort(_)))
    }
}

impl Observable {
    /// Apply a named extender: `"filter"`, `"step"`, `"skip"`, `"take"` or
    /// `"sort"`.
    pub fn extend(&self, name: &str, argument: Value) -> Result<Observable, BlocksError> {
        let operation = match name {
            "filter" => Operation::Filter(expect_function(name, argument)?),
            "step" => Operation::Step(expect_function(name, argument)?),
            "skip" => Operation::Skip(argument),
            "take" => Operation::Take(argument),
            "sort" => Operation::Sort(argument),
            _ => return Err(BlocksError::UnknownExtender(name.to_owned())),
        };
        Ok(self.derive(operation))
    }

    pub fn filter(&self, f: impl Fn(&Value, usize) -> bool + 'static) -> Observable {
        self.derive(Operation::Filter(Func::new(move |_, args| {
            let item = args.first().cloned().unwrap_or_default();
            let index = args.get(1).map_or(0.0, Value::to_number) as usize;
            Ok(Value::Bool(f(&item, index)))
        })))
    }

    pub fn skip(&self, count: impl Into<Value>) -> Observable {
        self.derive(Operation::Skip(count.into()))
    }

    pub fn take(&self, count: impl Into<Value>) -> Observable {
        self.derive(Operation::Take(count.into()))
    }

    /// Sort the view by `key`: a property name, a comparator function, or
    /// `undefined` for natural order.
    pub fn sort_view(&self, key: impl Into<Value>) -> Observable {
        self.derive(Operation::Sort(key.into()))
    }

    /// The output of a derived observable's pipeline.
    #[must_use]
    pub fn view(&self) -> Option<Observable> {
        self.derived_state().map(|state| state.view.clone())
    }

    /// Build a derived observable appending `operation` to this
    /// observable's pipeline (if it is itself derived).
    pub fn derive(&self, operation: Operation) -> Observable {
        let origin = self.origin().unwrap_or_else(|| self.clone());
        let mut operations = self
            .derived_state()
            .map(|state| state.operations.clone())
            .unwrap_or_default();
        operations.push(operation);

        let derived = Observable::from_source(origin.peek(), Source::Plain);
        derived.set_this(origin.this_arg());
        *derived.0.origin.borrow_mut() = Some(origin.clone());

        let view = Observable::new(Value::array(Vec::new()));
        let state = Rc::new(DerivedState {
            operations,
            view: view.clone(),
            connections: RefCell::new(BTreeMap::new()),
            initialized: Cell::new(false),
            observed: RefCell::new(Vec::new()),
            lazy_init: RefCell::new(None),
            origin_events: RefCell::new(Vec::new()),
        });
        *derived.0.derived.borrow_mut() = Some(Rc::clone(&state));
        origin.add_dependent(&derived);

        let weak = derived.downgrade();
        let lazy = view.on(EventKind::Get, move |_| {
            if let Some(derived) = weak.upgrade()
                && let Some(state) = derived.derived_state()
                && !state.initialized.replace(true)
            {
                state.lazy_init.borrow_mut().take();
                execute_operations(&derived);
            }
        });
        *state.lazy_init.borrow_mut() = Some(lazy);

        for kind in [EventKind::Add, EventKind::Remove] {
            let weak = derived.downgrade();
            let sub = origin.on(kind, move |event| {
                if let Some(derived) = weak.upgrade() {
                    on_source_splice(&derived, event);
                }
            });
            state.origin_events.borrow_mut().push(sub);
        }
        derived
    }
}

fn expect_function(name: &str, argument: Value) -> Result<Func, BlocksError> {
    match argument {
        Value::Function(f) => Ok(f),
        other => Err(BlocksError::Type(format!(
            "{name} expects a function, got {}",
            other.type_of()
        ))),
    }
}

fn on_source_splice(derived: &Observable, event: &ObservableEvent<'_>) {
    let Some(state) = derived.derived_state() else {
        return;
    };
    if !state.initialized.get() {
        return;
    }
    let Some((index, items)) = event.splice() else {
        return;
    };
    if state.has_sort() {
        state.connections.borrow_mut().clear();
        state.view.remove_all();
        execute_operations(derived);
        return;
    }
    let count = items.len();
    match event.kind() {
        EventKind::Add => {
            let shifted = state
                .connections
                .borrow()
                .iter()
                .map(|(&src, &slot)| (if src >= index { src + count } else { src }, slot))
                .collect();
            *state.connections.borrow_mut() = shifted;
        }
        EventKind::Remove => {
            let connections = std::mem::take(&mut *state.connections.borrow_mut());
            let mut dropped: Vec<usize> = connections
                .iter()
                .filter(|(src, _)| (index..index + count).contains(*src))
                .map(|(_, slot)| *slot)
                .collect();
            dropped.sort_unstable_by(|a, b| b.cmp(a));
            for slot in &dropped {
                state.view.remove_at(*slot);
            }
            let kept = connections
                .into_iter()
                .filter(|(src, _)| !(index..index + count).contains(src))
                .map(|(src, slot)| {
                    let src = if src >= index + count { src - count } else { src };
                    let below = dropped.iter().filter(|d| **d < slot).count();
                    (src, slot - below)
                })
                .collect();
            *state.connections.borrow_mut() = kept;
        }
        _ => return,
    }
    execute_operations(derived);
}

/// Recompute the view of `derived`, subscribing to whatever the pipeline
/// read.
pub(crate) fn execute_operations(derived: &Observable) {
    let Some(state) = derived.derived_state() else {
        return;
    };
    state.observed.borrow_mut().clear();

    let guard = ObserveGuard::start();
    let this = derived.this_arg();
    let mut chunk: Vec<Operation> = Vec::new();
    for operation in &state.operations {
        if let Operation::Step(step) = operation {
            let scratch = Observable::new(Value::array(Vec::new()));
            if !chunk.is_empty() {
                let mut connections = BTreeMap::new();
                execute_chunk(derived, &scratch, &chunk, &mut connections);
            }
            if let Err(err) = step.call(&this, &[Value::Observable(scratch)]) {
                debug::expression_fail(false, "step", &err);
            }
        } else {
            chunk.push(operation.clone());
        }
    }
    if !chunk.is_empty() {
        let mut connections = std::mem::take(&mut *state.connections.borrow_mut());
        execute_chunk(derived, &state.view, &chunk, &mut connections);
        *state.connections.borrow_mut() = connections;
    }
    let observed = guard.finish();

    let weak = derived.downgrade();
    let mut subs = state.observed.borrow_mut();
    for observable in observed {
        if observable.ptr_eq(&state.view) {
            continue;
        }
        let weak: WeakObservable = weak.clone();
        subs.push(observable.on(EventKind::Change, move |_| {
            if let Some(derived) = weak.upgrade() {
                execute_operations(&derived);
            }
        }));
    }
}

fn resolve_count(value: &Value, this: &Value) -> f64 {
    let resolved = match value {
        Value::Function(f) => f.call(this, &[]).unwrap_or_else(|err| {
            debug::expression_fail(false, "count", &err);
            Value::Undefined
        }),
        other => other.clone(),
    };
    resolved.unwrap().to_number()
}

fn sort_items(items: &mut [Value], key: &Value, this: &Value) {
    match key {
        Value::String(name) => items.sort_by(|a, b| {
            let x = a.peek().get_member(name).peek().to_number();
            let y = b.peek().get_member(name).peek().to_number();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }),
        Value::Function(f) => items.sort_by(|a, b| {
            let result = f
                .call(this, &[a.clone(), b.clone()])
                .map(|v| v.to_number())
                .unwrap_or(0.0);
            result.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
        }),
        _ => items.sort_by(natural_order),
    }
}

fn execute_chunk(
    derived: &Observable,
    view: &Observable,
    operations: &[Operation],
    connections: &mut BTreeMap<usize, usize>,
) {
    let this = derived.this_arg();
    let mut collection = derived
        .origin()
        .map(|origin| super::array_items(&origin.peek()))
        .unwrap_or_default();
    let mut skip = 0.0_f64;
    let mut take = collection.len() as f64;
    let mut operations = operations.to_vec();

    for operation in &operations {
        match operation {
            Operation::Skip(value) => skip = resolve_count(value, &this),
            Operation::Take(value) => take = resolve_count(value, &this),
            Operation::Sort(key) => sort_items(&mut collection, key, &this),
            _ => {}
        }
    }
    if operations.len() == 1 && matches!(operations[0], Operation::Sort(_)) {
        operations.push(Operation::Filter(Func::simple(|_| Value::Bool(true))));
    }
    let collection_value = Value::array(collection.clone());

    let mut new_connections = BTreeMap::new();
    let mut view_index = 0usize;
    view.0.update_suspended.set(true);
    for (index, value) in collection.iter().enumerate() {
        if take <= 0.0 {
            while view.len() > view_index {
                view.remove_at(view.len() - 1);
            }
            break;
        }
        let connected = connections.contains_key(&index);
        let mut action = None;
        for operation in &operations {
            let keep = match operation {
                Operation::Filter(f) => f
                    .call(
                        &this,
                        &[value.clone(), Value::from(index), collection_value.clone()],
                    )
                    .unwrap_or_else(|err| {
                        debug::expression_fail(false, "filter", &err);
                        Value::Undefined
                    })
                    .unwrap()
                    .truthy(),
                Operation::Skip(_) => {
                    skip -= 1.0;
                    skip < 0.0
                }
                Operation::Take(_) => {
                    if take <= 0.0 {
                        false
                    } else {
                        take -= 1.0;
                        true
                    }
                }
                Operation::Sort(_) | Operation::Step(_) => continue,
            };
            if keep {
                action = Some(if connected { Action::Exists } else { Action::Add });
            } else {
                action = connected.then_some(Action::Remove);
                break;
            }
        }
        match action {
            Some(Action::Add) => {
                new_connections.insert(index, view_index);
                view.splice(view_index as isize, 0, vec![value.clone()]);
                view_index += 1;
            }
            Some(Action::Remove) => {
                view.remove_at(view_index);
            }
            Some(Action::Exists) => {
                new_connections.insert(index, view_index);
                let stale = view
                    .items()
                    .borrow()
                    .get(view_index)
                    .is_some_and(|current| !strict_equals(current, value));
                if stale {
                    view.splice(view_index as isize, 1, vec![value.clone()]);
                }
                view_index += 1;
            }
            None => {}
        }
    }
    *connections = new_connections;
    view.0.update_suspended.set(false);
    view.update();
}
