#![forbid(unsafe_code)]

//! `proptest` strategies shared by the scenario and property tests.

use proptest::prelude::*;

/// One mutation of an observable array, with indices reduced modulo the
/// array's length when applied.
#[derive(Debug, Clone)]
pub enum ArrayOp {
    Push(i32),
    Insert(usize, i32),
    RemoveAt(usize),
    Swap(usize, usize),
    Move(usize, usize),
    Reverse,
    Pop,
    Shift,
    Splice(usize, usize, Vec<i32>),
}

impl ArrayOp {
    /// Apply to a plain vector, the reference model for an observable array.
    pub fn apply(&self, model: &mut Vec<i32>) {
        let len = model.len();
        match self {
            Self::Push(v) => model.push(*v),
            Self::Insert(at, v) => model.insert(at % (len + 1), *v),
            Self::RemoveAt(at) if len > 0 => {
                model.remove(at % len);
            }
            Self::Swap(a, b) if len > 0 => model.swap(a % len, b % len),
            Self::Move(from, to) if len > 0 => {
                let item = model.remove(from % len);
                model.insert(to % len, item);
            }
            Self::Reverse => model.reverse(),
            Self::Pop => {
                model.pop();
            }
            Self::Shift if len > 0 => {
                model.remove(0);
            }
            Self::Splice(at, count, items) => {
                let at = at % (len + 1);
                let end = (at + count).min(len);
                model.splice(at..end, items.iter().copied());
            }
            _ => {}
        }
    }
}

pub fn array_op() -> impl Strategy<Value = ArrayOp> {
    prop_oneof![
        3 => any::<i32>().prop_map(ArrayOp::Push),
        2 => (0usize..16, any::<i32>()).prop_map(|(at, v)| ArrayOp::Insert(at, v)),
        2 => (0usize..16).prop_map(ArrayOp::RemoveAt),
        1 => (0usize..16, 0usize..16).prop_map(|(a, b)| ArrayOp::Swap(a, b)),
        1 => (0usize..16, 0usize..16).prop_map(|(a, b)| ArrayOp::Move(a, b)),
        1 => Just(ArrayOp::Reverse),
        1 => Just(ArrayOp::Pop),
        1 => Just(ArrayOp::Shift),
        1 => (0usize..16, 0usize..4, prop::collection::vec(any::<i32>(), 0..3))
            .prop_map(|(at, count, items)| ArrayOp::Splice(at, count, items)),
    ]
}

pub fn array_ops(max: usize) -> impl Strategy<Value = Vec<ArrayOp>> {
    prop::collection::vec(array_op(), 0..max)
}

/// An identifier usable as a model property.
pub fn identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}".prop_filter("reserved word", |name| {
        !matches!(
            name.as_str(),
            "true" | "false" | "null" | "undefined" | "new" | "typeof" | "in"
        )
    })
}

/// A `data-query` text of well-formed calls.
pub fn query_text() -> impl Strategy<Value = String> {
    let call = (
        prop::sample::select(vec!["text", "html", "attr", "css", "visible", "setClass"]),
        prop::collection::vec(identifier(), 0..3),
    )
        .prop_map(|(name, params)| format!("{name}({})", params.join(", ")));
    prop::collection::vec(call, 1..4).prop_map(|calls| calls.join(", "))
}
