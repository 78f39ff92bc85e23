#![forbid(unsafe_code)]

//! Query engine.
//!
//! An element's `data-query` attribute holds an ordered pipeline of calls,
//! `each(items, 'item'), setClass('active', selected)`. The pipeline is
//! parsed once per distinct text into a plan of [`QueryCall`]s and executed
//! by a [`DomQuery`] against the current [`Context`](crate::Context).
//!
//! Each call names a [`QueryDescriptor`] in the runtime's registry. The
//! descriptor decides how its parameters are passed ([`QueryFlags`]) and
//! which phase does the work:
//!
//! - **call**: an element method (`html`, `attr`, `css`, ...) invoked on the
//!   virtual element, or on a stand-in bound to the live node,
//! - **preprocess**: structural work while the virtual tree renders
//!   (`each`, `with`, `template`, ...),
//! - **update**: a light patch of the live node when a parameter's
//!   observable changes,
//! - **ready**: one-off work once the element is attached (event
//!   listeners).
//!
//! # Invariants
//!
//! 1. Plans are immutable and shared by every element with the same query
//!    text; unknown names are dropped from the plan when it is built.
//! 2. `attr` and `val` calls run before the rest of their pipeline.
//! 3. The observables read while evaluating a call's parameters are bound to
//!    the element once per (observable, call text).
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Unknown query name | Dropped from the plan; `query_not_exists` on the debug channel |
//! | Parameter fails to evaluate | Passed as `undefined`; `query_parameter_fail` |
//! | Element-only query on a comment range | Skipped; `comment_unsupported` |
//! | `render()` outside `each` | [`BlocksError::RenderOutsideEach`] aborts the pass |

pub(crate) mod builtins;
mod dom_query;
mod parse;
pub(crate) mod registry;
pub(crate) mod sync;

use std::fmt;
use std::ops::ControlFlow;
use std::rc::Rc;

use bitflags::bitflags;
use blocks_dom::NodeId;

pub use dom_query::DomQuery;
pub use parse::parse_query;

use crate::BlocksError;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::virtual_element::VirtualElement;

/// One call of a parsed query pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCall {
    pub name: String,
    /// Parameter source texts, trimmed.
    pub params: Vec<String>,
    /// Canonical `name(p1,p2)` text; part of subscription keys.
    pub query: String,
}

impl QueryCall {
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        let name = name.into();
        let query = format!("{name}({})", params.join(","));
        Self {
            name,
            params,
            query,
        }
    }
}

bitflags! {
    /// How a query receives its parameters.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct QueryFlags: u8 {
        /// The handler may use the executing [`DomQuery`].
        const PASS_DOM_QUERY = 1 << 0;
        /// Parameters keep their observables instead of being read through.
        const PASS_RAW_VALUES = 1 << 1;
        /// Parameters carry whether an observable was involved.
        const PASS_DETAIL_VALUES = 1 << 2;
        /// The query may run on a `<!-- blocks ... -->` comment range.
        const SUPPORTS_COMMENTS = 1 << 3;
    }
}

/// An evaluated query parameter.
#[derive(Debug, Clone)]
pub struct QueryArg {
    /// The value as evaluated, observables included.
    pub raw: Value,
    /// The value with observables read through.
    pub value: Value,
    pub is_observable: bool,
    /// Whether evaluating the parameter read any observable.
    pub contains_observable: bool,
}

/// The arguments and services handed to a query handler.
pub struct QueryInvocation<'a> {
    runtime: Runtime,
    query: &'a mut DomQuery,
    flags: QueryFlags,
    args: Vec<QueryArg>,
}

impl<'a> QueryInvocation<'a> {
    pub(crate) fn new(query: &'a mut DomQuery, flags: QueryFlags, args: Vec<QueryArg>) -> Self {
        Self {
            runtime: query.runtime().clone(),
            query,
            flags,
            args,
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The executing query, for handlers registered with
    /// [`QueryFlags::PASS_DOM_QUERY`].
    pub fn dom_query(&mut self) -> Option<&mut DomQuery> {
        self.flags
            .contains(QueryFlags::PASS_DOM_QUERY)
            .then_some(&mut *self.query)
    }

    /// Parameter `index`: raw or read through depending on the flags;
    /// `undefined` when absent.
    #[must_use]
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).map_or(Value::Undefined, |arg| {
            if self.flags.contains(QueryFlags::PASS_RAW_VALUES) {
                arg.raw.clone()
            } else {
                arg.value.clone()
            }
        })
    }

    #[must_use]
    pub fn detail(&self, index: usize) -> Option<&QueryArg> {
        self.args.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

pub type PreprocessFn =
    Rc<dyn Fn(&mut QueryInvocation<'_>, &VirtualElement) -> Result<ControlFlow<()>, BlocksError>>;
pub type UpdateFn = Rc<dyn Fn(&mut QueryInvocation<'_>, NodeId) -> Result<(), BlocksError>>;

/// Element methods a query can forward to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementMethod {
    Html,
    Text,
    Attr,
    Css,
}

/// How a `call` query maps onto an element method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementCall {
    /// Parameters go straight to the method.
    Direct(ElementMethod),
    /// A name is passed first: `prefix`, or the query's own name.
    Named {
        method: ElementMethod,
        prefix: Option<String>,
    },
}

/// A registered query.
#[derive(Clone, Default)]
pub struct QueryDescriptor {
    pub(crate) flags: QueryFlags,
    pub(crate) call: Option<ElementCall>,
    pub(crate) preprocess: Option<PreprocessFn>,
    pub(crate) update: Option<UpdateFn>,
    pub(crate) ready: Option<UpdateFn>,
    /// `Some(expected)` for `if` (`true`) and `ifnot` (`false`).
    pub(crate) branch: Option<bool>,
}

impl QueryDescriptor {
    #[must_use]
    pub fn new(flags: QueryFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_call(mut self, call: ElementCall) -> Self {
        self.call = Some(call);
        self
    }

    /// Structural work while the virtual tree renders. Returning
    /// `ControlFlow::Break` stops the rest of the pipeline.
    #[must_use]
    pub fn with_preprocess(
        mut self,
        f: impl Fn(&mut QueryInvocation<'_>, &VirtualElement) -> Result<ControlFlow<()>, BlocksError>
        + 'static,
    ) -> Self {
        self.preprocess = Some(Rc::new(f));
        self
    }

    /// Patch of the live node when a parameter's observable changes.
    #[must_use]
    pub fn with_update(
        mut self,
        f: impl Fn(&mut QueryInvocation<'_>, NodeId) -> Result<(), BlocksError> + 'static,
    ) -> Self {
        self.update = Some(Rc::new(f));
        self
    }

    /// One-off work once the element is attached to a live node.
    #[must_use]
    pub fn with_ready(
        mut self,
        f: impl Fn(&mut QueryInvocation<'_>, NodeId) -> Result<(), BlocksError> + 'static,
    ) -> Self {
        self.ready = Some(Rc::new(f));
        self
    }

    pub(crate) fn conditional(expected: bool) -> Self {
        Self {
            branch: Some(expected),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    /// Whether the query only acts on live nodes and is deferred while the
    /// virtual tree renders.
    pub(crate) fn is_deferred(&self) -> bool {
        self.call.is_none()
            && self.preprocess.is_none()
            && (self.update.is_some() || self.ready.is_some())
    }
}

impl fmt::Debug for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDescriptor")
            .field("flags", &self.flags)
            .field("call", &self.call)
            .field("preprocess", &self.preprocess.is_some())
            .field("update", &self.update.is_some())
            .field("ready", &self.ready.is_some())
            .field("branch", &self.branch)
            .finish()
    }
}

/// What a pipeline runs against.
#[derive(Debug, Clone)]
pub enum QueryTarget {
    Virtual(VirtualElement),
    Node(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_text_is_canonical() {
        let call = QueryCall::new("each", vec!["items".into(), "'item'".into()]);
        assert_eq!(call.query, "each(items,'item')");
        assert_eq!(QueryCall::new("focus", Vec::new()).query, "focus()");
    }

    #[test]
    fn deferred_queries_have_no_render_phase() {
        let ready = QueryDescriptor::new(QueryFlags::empty()).with_ready(|_, _| Ok(()));
        assert!(ready.is_deferred());
        let mixed = QueryDescriptor::new(QueryFlags::empty())
            .with_preprocess(|_, _| Ok(ControlFlow::Continue(())))
            .with_update(|_, _| Ok(()));
        assert!(!mixed.is_deferred());
        let call = QueryDescriptor::new(QueryFlags::empty()).with_call(ElementCall::Direct(ElementMethod::Html));
        assert!(!call.is_deferred());
    }
}
