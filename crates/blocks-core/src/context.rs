#![forbid(unsafe_code)]

//! Rendering contexts.
//!
//! A [`Context`] is one level of the `$this`/`$parent`/`$root` chain that
//! template expressions resolve against. Contexts are immutable apart from
//! their extra properties (`define`, `with(value, name)`, `$template`), and
//! are shared by handle: element records, subscriptions and nested contexts
//! all point at the same level.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::observable::Observable;
use crate::value::Value;

struct ContextInner {
    this: Value,
    parent: Value,
    parents: Vec<Value>,
    root: Value,
    index: Option<Observable>,
    parent_context: Option<Context>,
    properties: RefCell<IndexMap<String, Value>>,
}

/// One level of the rendering scope chain.
#[derive(Clone)]
pub struct Context(Rc<ContextInner>);

impl Context {
    /// The outermost context, whose `$this` and `$root` are `model`.
    pub fn root(model: Value) -> Self {
        Self(Rc::new(ContextInner {
            this: model.clone(),
            parent: Value::Null,
            parents: Vec::new(),
            root: model,
            index: None,
            parent_context: None,
            properties: RefCell::new(IndexMap::new()),
        }))
    }

    /// A context for `value` nested in `parent`.
    pub fn child(parent: Option<&Context>, value: Value, index: Option<Observable>) -> Self {
        let Some(parent) = parent else {
            let ctx = Self::root(value);
            return if index.is_some() { ctx.copy_with(index) } else { ctx };
        };
        let mut parents = Vec::with_capacity(parent.0.parents.len() + 1);
        parents.push(parent.0.this.clone());
        parents.extend(parent.0.parents.iter().cloned());
        Self(Rc::new(ContextInner {
            this: value,
            parent: parent.0.this.clone(),
            parents,
            root: parent.0.root.clone(),
            index,
            parent_context: Some(parent.clone()),
            properties: RefCell::new(IndexMap::new()),
        }))
    }

    fn copy_with(&self, index: Option<Observable>) -> Self {
        let inner = &self.0;
        Self(Rc::new(ContextInner {
            this: inner.this.clone(),
            parent: inner.parent.clone(),
            parents: inner.parents.clone(),
            root: inner.root.clone(),
            index,
            parent_context: inner.parent_context.clone(),
            properties: RefCell::new(inner.properties.borrow().clone()),
        }))
    }

    /// A new level with the same bindings and a copy of the properties.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.copy_with(self.0.index.clone())
    }

    #[must_use]
    pub fn this(&self) -> Value {
        self.0.this.clone()
    }

    #[must_use]
    pub fn parent(&self) -> Value {
        self.0.parent.clone()
    }

    #[must_use]
    pub fn root_value(&self) -> Value {
        self.0.root.clone()
    }

    #[must_use]
    pub fn parents(&self) -> &[Value] {
        &self.0.parents
    }

    #[must_use]
    pub fn index(&self) -> Option<&Observable> {
        self.0.index.as_ref()
    }

    #[must_use]
    pub fn parent_context(&self) -> Option<&Context> {
        self.0.parent_context.as_ref()
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        self.0.properties.borrow().get(name).cloned()
    }

    pub fn set_property(&self, name: &str, value: Value) {
        self.0.properties.borrow_mut().insert(name.to_owned(), value);
    }

    pub fn remove_property(&self, name: &str) -> Option<Value> {
        self.0.properties.borrow_mut().shift_remove(name)
    }

    /// Resolve a `$`-name or an extra property.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let inner = &self.0;
        match name {
            "$this" => Some(inner.this.clone()),
            "$root" => Some(inner.root.clone()),
            "$parent" => Some(inner.parent.clone()),
            "$parents" => Some(Value::array(inner.parents.clone())),
            "$index" => Some(
                inner
                    .index
                    .clone()
                    .map_or(Value::Null, Value::Observable),
            ),
            "$context" => Some(Value::Context(self.clone())),
            "$parentContext" => Some(
                inner
                    .parent_context
                    .clone()
                    .map_or(Value::Null, Value::Context),
            ),
            _ => self.property(name),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("this", &self.0.this)
            .field("depth", &self.0.parents.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_links_parent_and_root() {
        let model = Value::object([("name", Value::from("root"))]);
        let root = Context::root(model.clone());
        let item = Value::from("item");
        let child = Context::child(Some(&root), item.clone(), None);

        assert_eq!(child.this(), item);
        assert_eq!(child.parent(), model);
        assert_eq!(child.root_value(), model);
        assert_eq!(child.parents().len(), 1);
        assert!(child.parent_context().is_some_and(|p| p.ptr_eq(&root)));
    }

    #[test]
    fn parents_are_innermost_first() {
        let root = Context::root(Value::from("a"));
        let mid = Context::child(Some(&root), Value::from("b"), None);
        let leaf = Context::child(Some(&mid), Value::from("c"), None);
        assert_eq!(leaf.parents(), &[Value::from("b"), Value::from("a")]);
    }

    #[test]
    fn lookup_resolves_index_and_properties() {
        let root = Context::root(Value::Null);
        let index = Observable::new(3);
        let child = Context::child(Some(&root), Value::Null, Some(index));
        child.set_property("item", Value::from(7));

        assert_eq!(child.lookup("$index").map(|v| v.peek()), Some(Value::from(3)));
        assert_eq!(child.lookup("item"), Some(Value::from(7)));
        assert!(child.lookup("missing").is_none());
        assert!(matches!(root.lookup("$index"), Some(Value::Null)));
    }

    #[test]
    fn duplicate_copies_properties_independently() {
        let ctx = Context::root(Value::Null);
        ctx.set_property("a", Value::from(1));
        let copy = ctx.duplicate();
        copy.set_property("b", Value::from(2));
        assert!(!copy.ptr_eq(&ctx));
        assert!(ctx.property("b").is_none());
        assert_eq!(copy.property("a"), Some(Value::from(1)));
    }
}
