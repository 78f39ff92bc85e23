#![forbid(unsafe_code)]

//! The dynamic value model.
//!
//! Models, template expressions and observables all trade in [`Value`].
//! Containers are shared (`Rc<RefCell<..>>`), so cloning a `Value` clones a
//! handle, never the payload; two clones of an array observe each other's
//! mutations exactly like two references to the same script array.
//!
//! # Invariants
//!
//! 1. `Value::Observable` is the only variant that participates in
//!    dependency tracking; [`Value::unwrap`] reads through it (registering
//!    the read), [`Value::peek`] reads through it silently.
//! 2. Display conversion never fails: containers, functions and nodes have
//!    a fixed textual form.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use blocks_dom::NodeId;
use indexmap::IndexMap;

use crate::BlocksError;
use crate::context::Context;
use crate::equality::equals;
use crate::observable::Observable;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;

type FuncBody = dyn Fn(&Value, &[Value]) -> Result<Value, BlocksError>;

/// A host function callable from templates, observables and query
/// callbacks. Receives the `this` value and the argument list.
#[derive(Clone)]
pub struct Func(Rc<FuncBody>);

impl Func {
    pub fn new(f: impl Fn(&Value, &[Value]) -> Result<Value, BlocksError> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// A function that ignores `this` and cannot fail.
    pub fn simple(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self(Rc::new(move |_this: &Value, args: &[Value]| Ok(f(args))))
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, BlocksError> {
        (self.0)(this, args)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Func(..)")
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    RegExp {
        source: Rc<str>,
        flags: Rc<str>,
    },
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Func),
    Observable(Observable),
    Context(Context),
    Node(NodeId),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<IndexMap<_, _>>();
        Self::Object(Rc::new(RefCell::new(map)))
    }

    pub fn string(text: impl AsRef<str>) -> Self {
        Self::String(Rc::from(text.as_ref()))
    }

    pub fn function(f: impl Fn(&Value, &[Value]) -> Result<Value, BlocksError> + 'static) -> Self {
        Self::Function(Func::new(f))
    }

    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[must_use]
    pub fn is_observable(&self) -> bool {
        matches!(self, Self::Observable(_))
    }

    #[must_use]
    pub fn as_observable(&self) -> Option<&Observable> {
        match self {
            Self::Observable(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Script truthiness. Observables and functions are always truthy; use
    /// `unwrap().truthy()` to test an observable's current value.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Read through an observable, registering the read with the active
    /// dependency frame.
    #[must_use]
    pub fn unwrap(&self) -> Value {
        match self {
            Self::Observable(o) => o.get(),
            other => other.clone(),
        }
    }

    /// Read through an observable without registering the read.
    #[must_use]
    pub fn peek(&self) -> Value {
        match self {
            Self::Observable(o) => o.peek(),
            other => other.clone(),
        }
    }

    /// The `typeof` of this value.
    #[must_use]
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) | Self::Observable(_) => "function",
            _ => "object",
        }
    }

    /// `String(value)`.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_owned(),
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) | Self::Date(n) => format_number(*n),
            Self::String(s) => s.to_string(),
            Self::RegExp { source, flags } => format!("/{source}/{flags}"),
            Self::Array(items) => items
                .borrow()
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_display_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) | Self::Context(_) => "[object Object]".to_owned(),
            Self::Function(_) => "function () { [native code] }".to_owned(),
            Self::Observable(o) => o.get().to_display_string(),
            Self::Node(_) => "[object Node]".to_owned(),
        }
    }

    /// Display form used by templates: nullish values render as nothing.
    #[must_use]
    pub fn to_template_string(&self) -> String {
        if self.is_nullish() {
            String::new()
        } else {
            self.to_display_string()
        }
    }

    /// `Number(value)`.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) | Self::Date(n) => *n,
            Self::String(s) => parse_number(s),
            Self::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => parse_number(&items[0].to_template_string()),
                    _ => f64::NAN,
                }
            }
            Self::Observable(o) => o.get().to_number(),
            _ => f64::NAN,
        }
    }

    /// Member access on a plain value (`value.name`).
    #[must_use]
    pub fn get_member(&self, name: &str) -> Value {
        match self {
            Self::Object(map) => map.borrow().get(name).cloned().unwrap_or_default(),
            Self::Array(items) => {
                let items = items.borrow();
                if name == "length" {
                    return Value::from(items.len());
                }
                name.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Self::String(s) => {
                if name == "length" {
                    return Value::from(s.chars().count());
                }
                name.parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or_default()
            }
            Self::Context(ctx) => ctx.lookup(name).unwrap_or_default(),
            Self::RegExp { source, flags } => match name {
                "source" => Value::String(Rc::clone(source)),
                "flags" => Value::String(Rc::clone(flags)),
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        }
    }

    /// Convert a JSON document into a value tree.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::string(s),
            serde_json::Value::Array(items) => {
                Self::array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                Self::object(map.iter().map(|(k, v)| (k.clone(), Self::from_json(v))))
            }
        }
    }

    /// Snapshot this value as JSON. Observables are peeked; functions,
    /// contexts and nodes become `null`. Nesting deeper than 64 levels
    /// (which includes every cycle) is cut off with `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> serde_json::Value {
        const MAX_DEPTH: usize = 64;
        if depth > MAX_DEPTH {
            return serde_json::Value::Null;
        }
        match self {
            Self::Undefined
            | Self::Null
            | Self::Function(_)
            | Self::Context(_)
            | Self::Node(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) | Self::Date(n) => json_number(*n),
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::RegExp { .. } => serde_json::Value::String(self.to_display_string()),
            Self::Array(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|item| item.to_json_at(depth + 1))
                    .collect(),
            ),
            Self::Object(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_at(depth + 1)))
                    .collect(),
            ),
            Self::Observable(o) => o.peek().to_json_at(depth + 1),
        }
    }
}

/// Format a number the way script engines print it.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if n == 0.0 {
        return "0".to_owned();
    }
    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let text = format!("{n:e}");
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => text,
        };
    }
    format!("{n}")
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => {
            f64::NAN
        }
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equals(self, other, true)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Date(ms) => write!(f, "Date({})", format_number(*ms)),
            Self::RegExp { source, flags } => write!(f, "/{source}/{flags}"),
            Self::Array(items) => match items.try_borrow() {
                Ok(items) => f.debug_list().entries(items.iter()).finish(),
                Err(_) => f.write_str("[<borrowed>]"),
            },
            Self::Object(map) => match map.try_borrow() {
                Ok(map) => f.debug_map().entries(map.iter()).finish(),
                Err(_) => f.write_str("{<borrowed>}"),
            },
            Self::Function(_) => f.write_str("function"),
            Self::Observable(o) => write!(f, "observable#{}", o.id()),
            Self::Context(_) => f.write_str("context"),
            Self::Node(node) => write!(f, "node({node:?})"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::array(value)
    }
}

impl From<Observable> for Value {
    fn from(value: Observable) -> Self {
        Self::Observable(value)
    }
}

impl From<Func> for Value {
    fn from(value: Func) -> Self {
        Self::Function(value)
    }
}

impl From<Context> for Value {
    fn from(value: Context) -> Self {
        Self::Context(value)
    }
}

impl From<NodeId> for Value {
    fn from(value: NodeId) -> Self {
        Self::Node(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Whole numbers that fit an `i64` serialize without a fraction, the way
/// `JSON.stringify` prints them.
fn json_number(n: f64) -> serde_json::Value {
    const LIMIT: f64 = 9_007_199_254_740_992.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= LIMIT {
        return serde_json::Value::Number(serde_json::Number::from(n as i64));
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_print_like_script() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1e-7), "1e-7");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.truthy());
        assert!(!Value::from("").truthy());
        assert!(!Value::from(f64::NAN).truthy());
        assert!(Value::from("0").truthy());
        assert!(Value::array(vec![]).truthy());
    }

    #[test]
    fn string_to_number() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert_eq!(Value::from("0x10").to_number(), 16.0);
        assert!(Value::from("abc").to_number().is_nan());
    }

    #[test]
    fn arrays_display_joined() {
        let v = Value::array(vec![1.into(), Value::Null, "x".into()]);
        assert_eq!(v.to_display_string(), "1,,x");
    }

    #[test]
    fn member_access() {
        let obj = Value::object([("name", Value::from("Ann"))]);
        assert_eq!(obj.get_member("name"), Value::from("Ann"));
        assert!(matches!(obj.get_member("missing"), Value::Undefined));
        assert_eq!(Value::from("héllo").get_member("length"), Value::from(5));
    }

    #[test]
    fn json_integers_stay_integers() {
        assert_eq!(Value::from(3).to_json().to_string(), "3");
        assert_eq!(Value::from(-12.0).to_json().to_string(), "-12");
        assert_eq!(Value::from(1.5).to_json().to_string(), "1.5");
        assert_eq!(Value::from(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(Value::from(1e300).to_json(), serde_json::json!(1e300));
    }

    #[test]
    fn json_round_trip_keeps_structure() {
        let json = serde_json::json!({"a": [1, "two", null], "b": {"c": true}});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn clones_share_containers() {
        let a = Value::array(vec![1.into()]);
        let b = a.clone();
        if let Value::Array(items) = &b {
            items.borrow_mut().push(2.into());
        }
        assert_eq!(a.get_member("length"), Value::from(2));
    }
}
