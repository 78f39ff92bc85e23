#![forbid(unsafe_code)]

//! `{{ ... }}` interpolation in text and attribute values.
//!
//! An [`Expression`] is a parsed template string: literal segments kept as
//! markup and code segments evaluated against a [`Context`]. Evaluating a
//! code segment that reads an observable subscribes the segment so a later
//! write patches the live DOM in place:
//!
//! - a **text** segment renders as `<!-- <id>:blocks -->value`; the marker
//!   comment gets its own element record and the update rewrites the
//!   leading characters of the text node that follows it,
//! - an **attribute** segment re-renders the whole attribute value on the
//!   owning element.

use std::cell::Cell;
use std::rc::Rc;

use blocks_dom::NodeId;
use blocks_dom::html::decode_entities;

use crate::context::Context;
use crate::debug;
use crate::elements::{ElementId, ElementRecord};
use crate::observer::{self, ObserveGuard};
use crate::runtime::{Runtime, WeakRuntime};
use crate::value::Value;
use crate::virtual_element::html_element;

use super::eval;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Code(String),
}

#[derive(Debug)]
struct ExpressionInner {
    segments: Vec<Segment>,
    text: String,
    attribute: Option<String>,
    /// Record id stamped by a server render (`<!-- 3:blocks -->`).
    marker: Option<ElementId>,
    /// The live text node this expression was read from.
    source: Option<NodeId>,
}

/// A parsed template string.
#[derive(Debug, Clone)]
pub struct Expression(Rc<ExpressionInner>);

impl Expression {
    /// Parse `text`. Returns `None` when it holds no `{{ ... }}` segment.
    ///
    /// Text content arrives entity-escaped, so the code of a text expression
    /// is decoded before it is compiled; attribute values are already plain.
    #[must_use]
    pub fn create(text: &str, attribute: Option<&str>) -> Option<Self> {
        let segments = split_segments(text, attribute.is_none())?;
        Some(Self(Rc::new(ExpressionInner {
            segments,
            text: text.to_owned(),
            attribute: attribute.map(str::to_owned),
            marker: None,
            source: None,
        })))
    }

    pub(crate) fn with_source(self, node: NodeId) -> Self {
        self.rebuild(|inner| inner.source = Some(node))
    }

    pub(crate) fn with_marker(self, id: ElementId) -> Self {
        self.rebuild(|inner| inner.marker = Some(id))
    }

    fn rebuild(self, f: impl FnOnce(&mut ExpressionInner)) -> Self {
        let mut inner = Rc::try_unwrap(self.0).unwrap_or_else(|shared| ExpressionInner {
            segments: shared.segments.clone(),
            text: shared.text.clone(),
            attribute: shared.attribute.clone(),
            marker: shared.marker,
            source: shared.source,
        });
        f(&mut inner);
        Self(Rc::new(inner))
    }

    /// The template text this expression was parsed from.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.0.text
    }

    #[must_use]
    pub fn attribute(&self) -> Option<&str> {
        self.0.attribute.as_deref()
    }

    pub(crate) fn source(&self) -> Option<NodeId> {
        self.0.source
    }

    /// Number of code segments.
    #[must_use]
    pub fn code_count(&self) -> usize {
        self.0
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Code(_)))
            .count()
    }

    /// Render against `context`. Without a context the raw text comes back.
    ///
    /// `record` is the element owning an attribute expression; text
    /// expressions allocate their own marker record when they subscribe.
    pub(crate) fn get_value(
        &self,
        runtime: &Runtime,
        context: Option<&Context>,
        record: Option<&ElementRecord>,
    ) -> String {
        let Some(context) = context else {
            return self.0.text.clone();
        };
        let mut out = String::new();
        for segment in &self.0.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Code(code) => out.push_str(&self.execute(runtime, context, code, record)),
            }
        }
        out
    }

    fn execute(
        &self,
        runtime: &Runtime,
        context: &Context,
        code: &str,
        record: Option<&ElementRecord>,
    ) -> String {
        let guard = ObserveGuard::start();
        let raw = evaluate_code(runtime, context, code);
        let value = raw.unwrap();
        let observables = guard.finish();

        let plain = value.to_template_string();
        let mut result = escape_value(&plain);
        if !raw.is_observable() && observables.is_empty() {
            return result;
        }

        let record = match (&self.0.attribute, record) {
            (None, _) => match self.0.marker {
                Some(id) => runtime.adopt_record(id, None),
                None => runtime.create_record(None),
            },
            (Some(_), Some(record)) => Rc::clone(record),
            (Some(_), None) => return result,
        };
        let id = {
            let mut record = record.borrow_mut();
            record.have_data = true;
            record.id
        };

        let subscription = Rc::new(ExpressionSubscription {
            runtime: runtime.downgrade(),
            element_id: id,
            attribute: self.0.attribute.clone(),
            context: context.clone(),
            code: code.to_owned(),
            entire: self.clone(),
            length: Cell::new(plain.chars().count()),
        });
        {
            let mut record = record.borrow_mut();
            for observable in &observables {
                observable.add_expression_subscription(Rc::clone(&subscription));
                record
                    .observables
                    .insert(format!("{}{{{{{code}}}}}", observable.id()), observable.clone());
            }
        }
        if let Some(observable) = raw.as_observable()
            && !observables.iter().any(|o| o.ptr_eq(observable))
        {
            observable.add_expression_subscription(Rc::clone(&subscription));
            record
                .borrow_mut()
                .observables
                .insert(format!("{}{{{{{code}}}}}", observable.id()), observable.clone());
        }

        match &self.0.attribute {
            None => {
                runtime.note_server_expression(id, &format!("{{{{{code}}}}}"));
                result = format!("<!-- {id}:blocks -->{result}");
            }
            Some(attribute) => runtime.note_server_attribute(id, attribute, &self.0.text),
        }
        result
    }
}

fn evaluate_code(runtime: &Runtime, context: &Context, code: &str) -> Value {
    let result = runtime
        .compile(code)
        .and_then(|expr| eval::evaluate(&expr, context));
    result.unwrap_or_else(|err| {
        debug::expression_fail(runtime.config().debug, code, &err);
        Value::Undefined
    })
}

/// Split `text` into literal and code segments; `None` without any code.
fn split_segments(text: &str, decode: bool) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = text;
    let mut found = false;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            break;
        };
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_owned()));
        }
        let code = &after[..close];
        let code = if decode { decode_entities(code) } else { code.to_owned() };
        segments.push(Segment::Code(code));
        found = true;
        rest = &after[close + 2..];
    }
    if !found {
        return None;
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_owned()));
    }
    Some(segments)
}

/// Escape a value for insertion into markup.
pub(crate) fn escape_value(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// A text or attribute segment bound to an element record.
pub(crate) struct ExpressionSubscription {
    runtime: WeakRuntime,
    element_id: ElementId,
    attribute: Option<String>,
    context: Context,
    code: String,
    entire: Expression,
    /// Characters of the text node that belong to this segment.
    length: Cell<usize>,
}

impl ExpressionSubscription {
    pub(crate) fn key(&self) -> (u64, ElementId, Option<String>) {
        (self.runtime.id(), self.element_id, self.attribute.clone())
    }

    /// Patch the DOM. Returns `false` once the subscription is dead.
    pub(crate) fn refresh(&self) -> bool {
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };
        let Some(record) = runtime.record(self.element_id) else {
            return false;
        };
        let Some(node) = record.borrow().dom else {
            return true;
        };
        let document = runtime.document();
        if !document.is_connected(node) {
            return false;
        }

        match &self.attribute {
            None => {
                let value = observer::untracked(|| {
                    evaluate_code(&runtime, &self.context, &self.code)
                        .unwrap()
                        .to_template_string()
                });
                let next = document.next_sibling(node);
                match next.filter(|n| document.is_text(*n)) {
                    Some(text) => {
                        let old = document.node_value(text).unwrap_or_default();
                        let tail: String = old.chars().skip(self.length.get()).collect();
                        document.set_node_value(text, &format!("{value}{tail}"));
                    }
                    None => {
                        if let Some(parent) = document.parent(node) {
                            let text = document.create_text_node(&value);
                            document.insert_before(parent, text, next);
                        }
                    }
                }
                self.length.set(value.chars().count());
            }
            Some(attribute) => {
                let value = observer::untracked(|| {
                    self.entire.get_value(&runtime, Some(&self.context), None)
                });
                html_element::write_attribute(
                    &runtime,
                    node,
                    attribute,
                    Some(&decode_entities(&value)),
                );
            }
        }
        true
    }
}
