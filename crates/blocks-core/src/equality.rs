#![forbid(unsafe_code)]

//! Structural equality used by observable writes and by `Value: PartialEq`.
//!
//! Top-level numbers compare by identity of value: `NaN` equals `NaN` and
//! `0` differs from `-0`, so writing either onto itself is a no-op and
//! flipping the sign of zero is a change. In shallow mode containers compare
//! member-wise with strict equality; in deep mode they recurse. A visited
//! set of container pairs breaks cycles: a pair already under comparison is
//! assumed equal.

use std::rc::Rc;

use ahash::AHashSet;

use crate::value::Value;

/// Compare `a` and `b`. `deep` recurses into nested containers.
#[must_use]
pub fn equals(a: &Value, b: &Value, deep: bool) -> bool {
    let mut visiting = AHashSet::new();
    equals_inner(a, b, deep, &mut visiting)
}

fn same_value_number(x: f64, y: f64) -> bool {
    if x.is_nan() && y.is_nan() {
        return true;
    }
    x == y && x.is_sign_negative() == y.is_sign_negative()
}

/// The `===` operator.
#[must_use]
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Observable(x), Value::Observable(y)) => x.ptr_eq(y),
        (Value::Context(x), Value::Context(y)) => x.ptr_eq(y),
        (Value::Node(x), Value::Node(y)) => x == y,
        _ => false,
    }
}

fn equals_inner(
    a: &Value,
    b: &Value,
    deep: bool,
    visiting: &mut AHashSet<(usize, usize)>,
) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) | (Value::Date(x), Value::Date(y)) => {
            same_value_number(*x, *y)
        }
        (
            Value::RegExp {
                source: s1,
                flags: f1,
            },
            Value::RegExp {
                source: s2,
                flags: f2,
            },
        ) => s1 == s2 && f1 == f2,
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if !visiting.insert(key) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            let result = x.len() == y.len()
                && x.iter().zip(y.iter()).all(|(l, r)| {
                    if deep {
                        equals_inner(l, r, deep, visiting)
                    } else {
                        strict_equals(l, r)
                    }
                });
            visiting.remove(&key);
            result
        }
        (Value::Object(x), Value::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if !visiting.insert(key) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            let result = x.len() == y.len()
                && x.iter().all(|(k, l)| {
                    y.get(k).is_some_and(|r| {
                        if deep {
                            equals_inner(l, r, deep, visiting)
                        } else {
                            strict_equals(l, r)
                        }
                    })
                });
            visiting.remove(&key);
            result
        }
        _ => strict_equals(a, b),
    }
}
