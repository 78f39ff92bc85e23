#![forbid(unsafe_code)]

//! Pipeline execution and the rendering scope stack.
//!
//! A [`DomQuery`] carries the current [`Context`] through one render, sync
//! or bind pass. `with`, `each` and friends push contexts onto it; the
//! element that opened a scope closes it when its content is done.
//!
//! # Invariants
//!
//! 1. Every context pushed while an element executes is popped when that
//!    element finishes, on every exit path.
//! 2. Properties added with [`DomQuery::add_property`] are applied to every
//!    context pushed until they are removed.
//! 3. Calls that only act on live nodes (`update`/`ready` without a render
//!    phase) are parked on the element record and run when the element is
//!    bound.

use std::ops::ControlFlow;
use std::rc::Rc;

use blocks_dom::NodeId;
use indexmap::IndexMap;

use crate::BlocksError;
use crate::context::Context;
use crate::debug;
use crate::elements::ElementRecord;
use crate::expression::eval;
use crate::observable::{ElementSubscription, Observable};
use crate::observer::{self, ObserveGuard};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::virtual_element::html_element::strip_id;
use crate::virtual_element::{DATA_QUERY_ATTR, VirtualElement};

use super::{ElementCall, ElementMethod, QueryArg, QueryCall, QueryDescriptor, QueryFlags, QueryInvocation, QueryTarget, sync};

/// Executes query pipelines against a scope stack.
pub struct DomQuery {
    runtime: Runtime,
    context: Option<Context>,
    properties: IndexMap<String, Value>,
    data_index: Option<Observable>,
    has_changed: bool,
}

impl DomQuery {
    #[must_use]
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            context: None,
            properties: IndexMap::new(),
            data_index: None,
            has_changed: false,
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    // -----------------------------------------------------------------------
    // Scope stack
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Option<Context>) {
        self.context = context;
    }

    /// The `$index` observable given to the next pushed context.
    pub fn set_data_index(&mut self, index: Option<Observable>) {
        self.data_index = index;
    }

    /// Open a scope for `model` nested in the current one.
    pub fn push_context(&mut self, model: Value) -> Context {
        self.has_changed = true;
        let context = Context::child(self.context.as_ref(), model, self.data_index.clone());
        for (name, value) in &self.properties {
            context.set_property(name, value.clone());
        }
        self.context = Some(context.clone());
        context
    }

    pub fn pop_context(&mut self) {
        if let Some(context) = &self.context {
            self.context = context.parent_context().cloned();
        }
    }

    /// Run `f` with `context` as the current scope, restoring the previous
    /// scope afterwards.
    pub fn context_bubble<R>(&mut self, context: Option<Context>, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.context, context);
        let result = f(self);
        self.context = previous;
        result
    }

    /// Define `name` on the current scope and on every scope pushed until
    /// it is removed.
    pub fn add_property(&mut self, name: &str, value: Value) {
        if let Some(context) = &self.context {
            context.set_property(name, value.clone());
        }
        self.properties.insert(name.to_owned(), value);
    }

    /// Stop defining `name` on new scopes. Scopes that already carry it keep
    /// it, so bindings made inside them still resolve it later.
    pub fn remove_property(&mut self, name: &str) {
        self.properties.shift_remove(name);
    }

    /// Record the current scope on `element` and, when a scope was opened
    /// since the last element, on the element its children bind under.
    pub(crate) fn apply_context_to_element(&mut self, element: &VirtualElement) {
        let record = self.runtime.ensure_virtual_record(element);
        record.borrow_mut().context = self.context.clone();

        let parent = element.parent();
        let each_root = element.is_each() && !parent.as_ref().is_some_and(VirtualElement::is_each);
        if !self.has_changed && !each_root {
            return;
        }
        let target = match parent.filter(|_| !element.is_each()) {
            Some(parent) => {
                let parent_record = self.runtime.ensure_virtual_record(&parent);
                parent_record.borrow_mut().children_context = self.context.clone();
                parent_record
            }
            None => record,
        };
        self.has_changed = false;
        target.borrow_mut().have_data = true;
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the `data-query` pipeline of `target`.
    pub(crate) fn execute_element_query(&mut self, target: QueryTarget) -> Result<(), BlocksError> {
        let text = match &target {
            QueryTarget::Virtual(element) => element.query_text(),
            QueryTarget::Node(node) => node_query_text(&self.runtime, *node),
        };
        let Some(text) = text.filter(|text| !text.trim().is_empty()) else {
            return Ok(());
        };
        let plan = self.runtime.plan(&text);
        if let Some(record) = self.record_of(&target) {
            let id = record.borrow().id;
            debug::query_summary(self.runtime.config().debug, id, &text, plan.len());
        }
        self.execute_methods(&target, &plan)
    }

    /// Parse (through the plan cache) and run `text` against `target`.
    pub(crate) fn execute_query(&mut self, target: &QueryTarget, text: &str) -> Result<(), BlocksError> {
        let plan = self.runtime.plan(text);
        self.execute_methods(target, &plan)
    }

    /// Run `calls` in order against `target`.
    pub(crate) fn execute_methods(
        &mut self,
        target: &QueryTarget,
        calls: &[Rc<QueryCall>],
    ) -> Result<(), BlocksError> {
        let runtime = self.runtime.clone();
        let loud = runtime.config().debug;
        let record = self.record_of(target);

        for call in calls {
            let Some(descriptor) = runtime.descriptor(&call.name) else {
                continue;
            };
            let context = self.context.clone();

            if matches!(target, QueryTarget::Virtual(_)) && descriptor.is_deferred() {
                if let Some(record) = &record {
                    let mut record = record.borrow_mut();
                    record.have_data = true;
                    record.execute.push(Rc::clone(call));
                }
                continue;
            }

            let guard = ObserveGuard::start();
            let scope = context.clone().unwrap_or_else(|| Context::root(Value::Undefined));

            if let Some(expected) = descriptor.branch {
                let condition = call
                    .params
                    .first()
                    .map_or(Value::Undefined, |param| self.evaluate_parameter(call, param, &scope).1);
                let branch = if condition.truthy() == expected {
                    call.params.get(1)
                } else {
                    call.params.get(2)
                };
                if let Some(branch) = branch {
                    self.execute_query(target, branch)?;
                }
                self.subscribe(call, record.as_ref(), context, guard.finish());
                continue;
            }

            let mut args = Vec::with_capacity(call.params.len());
            let mut seen = 0;
            for param in &call.params {
                let (raw, value) = self.evaluate_parameter(call, param, &scope);
                let read = observer::current_len();
                args.push(QueryArg {
                    is_observable: raw.is_observable(),
                    contains_observable: read > seen,
                    raw,
                    value,
                });
                seen = read;
            }

            let flow = match self.dispatch(target, call, &descriptor, record.as_ref(), args) {
                Ok(flow) => flow,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    debug::expression_fail(loud, &call.query, &err);
                    ControlFlow::Continue(())
                }
            };
            self.subscribe(call, record.as_ref(), context, guard.finish());
            if flow.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Run query `name` on `node` with arguments that are already
    /// evaluated.
    pub(crate) fn invoke(&mut self, node: NodeId, name: &str, values: Vec<Value>) -> Result<(), BlocksError> {
        let runtime = self.runtime.clone();
        let Some(descriptor) = runtime.descriptor(name) else {
            debug::query_not_exists(runtime.config().debug, name, name);
            return Ok(());
        };
        let args = values
            .into_iter()
            .map(|raw| {
                let value = raw.unwrap();
                let is_observable = raw.is_observable();
                QueryArg {
                    raw,
                    value,
                    is_observable,
                    contains_observable: is_observable,
                }
            })
            .collect::<Vec<_>>();

        if descriptor.call.is_some() {
            let call = QueryCall::new(name, Vec::new());
            let record = runtime.record_of_node(node);
            return self
                .dispatch(&QueryTarget::Node(node), &call, &descriptor, record.as_ref(), args)
                .map(drop);
        }
        if let Some(handler) = descriptor.ready.clone().or_else(|| descriptor.update.clone()) {
            let mut invocation = QueryInvocation::new(self, descriptor.flags, args);
            return handler(&mut invocation, node);
        }
        if let Some(preprocess) = descriptor.preprocess.clone() {
            let element = VirtualElement::fake(&runtime, node);
            let mut invocation = QueryInvocation::new(self, descriptor.flags, args);
            return preprocess(&mut invocation, &element).map(drop);
        }
        Ok(())
    }

    fn evaluate_parameter(&self, call: &QueryCall, param: &str, scope: &Context) -> (Value, Value) {
        let raw = self
            .runtime
            .compile(param)
            .and_then(|expr| eval::evaluate(&expr, scope))
            .unwrap_or_else(|err| {
                debug::query_parameter_fail(self.runtime.config().debug, &call.query, param, &err);
                Value::Undefined
            });
        let value = raw.unwrap();
        (raw, value)
    }

    fn dispatch(
        &mut self,
        target: &QueryTarget,
        call: &QueryCall,
        descriptor: &QueryDescriptor,
        record: Option<&ElementRecord>,
        args: Vec<QueryArg>,
    ) -> Result<ControlFlow<()>, BlocksError> {
        let runtime = self.runtime.clone();
        match target {
            QueryTarget::Virtual(element) => {
                if element.is_comment() && !descriptor.flags.contains(QueryFlags::SUPPORTS_COMMENTS) {
                    debug::comment_unsupported(runtime.config().debug, &call.name);
                    return Ok(ControlFlow::Continue(()));
                }
                if let Some(element_call) = &descriptor.call {
                    call_element(&runtime, element, element_call, &call.name, descriptor.flags, &args);
                } else if let Some(preprocess) = descriptor.preprocess.clone() {
                    let mut invocation = QueryInvocation::new(self, descriptor.flags, args);
                    return preprocess(&mut invocation, element);
                }
            }
            QueryTarget::Node(node) => {
                let node = *node;
                if let Some(element_call) = &descriptor.call {
                    let element = record
                        .and_then(|record| record.borrow().virtual_element.clone())
                        .filter(|element| !element.is_each() && element.node() == Some(node))
                        .unwrap_or_else(|| VirtualElement::fake(&runtime, node));
                    call_element(&runtime, &element, element_call, &call.name, descriptor.flags, &args);
                    return Ok(ControlFlow::Continue(()));
                }
                let preprocess = record.is_some_and(|record| record.borrow().preprocess);
                let handler = match (&descriptor.ready, &descriptor.update) {
                    (Some(ready), _) if preprocess => Some(Rc::clone(ready)),
                    (_, Some(update)) => Some(Rc::clone(update)),
                    _ => None,
                };
                if let Some(handler) = handler {
                    let mut invocation = QueryInvocation::new(self, descriptor.flags, args);
                    handler(&mut invocation, node)?;
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Bind the observables read by `call` to the element.
    fn subscribe(
        &self,
        call: &Rc<QueryCall>,
        record: Option<&ElementRecord>,
        context: Option<Context>,
        observables: Vec<Observable>,
    ) {
        let Some(record) = record else {
            return;
        };
        let mut data = record.borrow_mut();
        data.have_data = true;
        for observable in observables {
            let key = format!("{}{}", observable.id(), call.query);
            if data.observables.contains_key(&key) {
                continue;
            }
            data.observables.insert(key, observable.clone());
            observable.add_element_subscription(Rc::new(ElementSubscription {
                runtime: self.runtime.downgrade(),
                element_id: data.id,
                call: Rc::clone(call),
                context: context.clone(),
            }));
        }
    }

    fn record_of(&self, target: &QueryTarget) -> Option<ElementRecord> {
        match target {
            QueryTarget::Virtual(element) => self.runtime.record_of_virtual(element),
            QueryTarget::Node(node) => self.runtime.record_of_node(*node),
        }
    }

    // -----------------------------------------------------------------------
    // Binding live nodes
    // -----------------------------------------------------------------------

    /// Attach the records of `nodes` and their descendants to the live
    /// nodes: run parked calls, install form-sync listeners and finish
    /// preprocessing.
    pub(crate) fn bind_nodes(&mut self, nodes: &[NodeId]) {
        let runtime = self.runtime.clone();
        let document = runtime.document().clone();
        // Scopes opened by comment ranges, closed at their `/blocks` end.
        let mut ranges: Vec<Option<Context>> = Vec::new();

        for &node in nodes {
            if document.is_comment(node) {
                let text = document.node_value(node).unwrap_or_default();
                if is_range_end(&text) {
                    if let Some(context) = ranges.pop() {
                        self.context = context;
                    }
                    continue;
                }
                if let Some(record) = runtime.record_of_node(node) {
                    // Text markers (` 3:blocks `) open no range.
                    if strip_id(text.trim()) != "blocks" {
                        ranges.push(self.context.clone());
                    }
                    self.bind_record(node, &record);
                }
                continue;
            }
            if !document.is_element(node) {
                continue;
            }
            let saved = self.context.clone();
            if let Some(record) = runtime.record_of_node(node) {
                self.bind_record(node, &record);
            }
            let skip_children = matches!(document.tag_name(node).as_str(), "script" | "code")
                || document.has_class(node, "bl-skip");
            if !skip_children {
                self.bind_nodes(&document.children(node));
            }
            self.context = saved;
        }
    }

    fn bind_record(&mut self, node: NodeId, record: &ElementRecord) {
        let (context, execute, event) = {
            let mut data = record.borrow_mut();
            let first_bind = data.dom != Some(node);
            data.dom = Some(node);
            let event = data
                .update_on
                .clone()
                .or_else(|| data.subscribe.map(str::to_owned))
                .filter(|_| first_bind && data.value_observable.is_some());
            (data.context.clone(), std::mem::take(&mut data.execute), event)
        };
        if context.is_some() {
            self.context = context;
        }
        if !execute.is_empty()
            && let Err(err) = self.execute_methods(&QueryTarget::Node(node), &execute)
        {
            debug::expression_fail(self.runtime.config().debug, "bind", &err);
        }
        if let Some(event) = event {
            sync::listen(&self.runtime, node, &event);
        }
        let children_context = {
            let mut data = record.borrow_mut();
            data.preprocess = false;
            data.children_context.clone()
        };
        if children_context.is_some() {
            self.context = children_context;
        }
    }

    /// Parse `html` into a detached fragment and bind its nodes.
    pub(crate) fn create_fragment(&mut self, html: &str) -> NodeId {
        let document = self.runtime.document().clone();
        let fragment = document.parse_fragment(html);
        self.bind_nodes(&document.children(fragment));
        fragment
    }
}

impl std::fmt::Debug for DomQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomQuery")
            .field("context", &self.context)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// The pipeline text of a live element or `<!-- blocks ... -->` comment.
fn node_query_text(runtime: &Runtime, node: NodeId) -> Option<String> {
    let document = runtime.document();
    if document.is_element(node) {
        return document.get_attribute(node, DATA_QUERY_ATTR);
    }
    let text = document.node_value(node)?;
    let start = text.find("blocks")? + "blocks".len();
    Some(text[start..].trim().to_owned())
}

fn call_element(
    runtime: &Runtime,
    element: &VirtualElement,
    call: &ElementCall,
    name: &str,
    flags: QueryFlags,
    args: &[QueryArg],
) {
    let mut values: Vec<Value> = args
        .iter()
        .map(|arg| {
            if flags.contains(QueryFlags::PASS_RAW_VALUES) {
                arg.raw.clone()
            } else {
                arg.value.clone()
            }
        })
        .collect();
    let method = match call {
        ElementCall::Direct(method) => *method,
        ElementCall::Named { method, prefix } => {
            values.insert(0, Value::from(prefix.as_deref().unwrap_or(name)));
            *method
        }
    };
    let arg = |i: usize| values.get(i).cloned().unwrap_or_default();
    match method {
        ElementMethod::Html => element.html(runtime, arg(0).unwrap().to_template_string()),
        ElementMethod::Text => element.text(runtime, &arg(0)),
        ElementMethod::Attr if values.len() > 1 => {
            element.attr(runtime, &arg(0).unwrap().to_display_string(), &arg(1));
        }
        ElementMethod::Css if values.len() > 1 => {
            element.css(runtime, &arg(0).unwrap().to_display_string(), &arg(1));
        }
        ElementMethod::Attr | ElementMethod::Css => {}
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

impl ElementSubscription {
    /// Re-run the bound call on the element's live node. Returns `false`
    /// once the subscription is dead.
    pub(crate) fn replay(&self) -> bool {
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };
        let Some(record) = runtime.record(self.element_id) else {
            return false;
        };
        let Some(node) = record.borrow().dom else {
            return true;
        };
        if !runtime.document().is_connected(node) {
            return false;
        }
        let mut query = DomQuery::new(runtime.clone());
        query.set_context(self.context.clone());
        if let Err(err) = query.execute_methods(&QueryTarget::Node(node), &[Rc::clone(&self.call)]) {
            debug::expression_fail(runtime.config().debug, &self.call.query, &err);
        }
        true
    }
}

/// Whether `text` is the closing delimiter of a comment range.
pub(crate) fn is_range_end(text: &str) -> bool {
    strip_id(text.trim()).starts_with("/blocks")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use blocks_dom::Document;
    use std::cell::Cell;

    fn query() -> DomQuery {
        DomQuery::new(Runtime::new(Document::new(), RuntimeConfig::default()))
    }

    #[test]
    fn push_and_pop_nest_scopes() {
        let mut query = query();
        query.set_context(Some(Context::root(Value::from("root"))));
        let inner = query.push_context(Value::from("inner"));
        assert_eq!(inner.parent(), Value::from("root"));
        query.pop_context();
        assert_eq!(query.context().map(Context::this), Some(Value::from("root")));
    }

    #[test]
    fn properties_flow_into_new_scopes_until_removed() {
        let mut query = query();
        query.set_context(Some(Context::root(Value::Null)));
        query.add_property("item", Value::from(1));
        let first = query.push_context(Value::Null);
        assert_eq!(first.property("item"), Some(Value::from(1)));
        query.remove_property("item");
        let second = query.push_context(Value::Null);
        assert!(second.property("item").is_none());
        assert_eq!(first.property("item"), Some(Value::from(1)));
    }

    #[test]
    fn context_bubble_restores() {
        let mut query = query();
        query.set_context(Some(Context::root(Value::from("a"))));
        let seen = query.context_bubble(Some(Context::root(Value::from("b"))), |q| {
            q.context().map(Context::this)
        });
        assert_eq!(seen, Some(Value::from("b")));
        assert_eq!(query.context().map(Context::this), Some(Value::from("a")));
    }

    #[test]
    fn element_calls_reach_the_element() {
        let mut query = query();
        query.set_context(Some(Context::root(Value::object([("on", Value::from(true))]))));
        let div = VirtualElement::new("div");
        div.insert_attribute_raw(DATA_QUERY_ATTR, "css('width', 5), visible(on), attr('title', 'x'), text('<b>')");
        query
            .execute_element_query(QueryTarget::Virtual(div.clone()))
            .expect("pipeline");
        assert_eq!(div.style("width").as_deref(), Some("5px"));
        assert_eq!(div.style("display").as_deref(), Some(""));
        assert_eq!(div.attribute("title").as_deref(), Some("x"));
        assert_eq!(div.inner_html().as_deref(), Some("&lt;b&gt;"));
    }

    #[test]
    fn conditionals_pick_a_branch() {
        let mut query = query();
        query.set_context(Some(Context::root(Value::object([("ok", Value::from(false))]))));
        let div = VirtualElement::new("div");
        div.insert_attribute_raw(DATA_QUERY_ATTR, "if(ok, setClass('yes'), setClass('no')), ifnot(ok, attr('title', 'n'))");
        query
            .execute_element_query(QueryTarget::Virtual(div.clone()))
            .expect("pipeline");
        assert_eq!(div.attribute("class").as_deref(), Some("no"));
        assert_eq!(div.attribute("title").as_deref(), Some("n"));
    }

    #[test]
    fn deferred_calls_are_parked_on_the_record() {
        let mut query = query();
        query.set_context(Some(Context::root(Value::Null)));
        let runtime = query.runtime().clone();
        let button = VirtualElement::new("button");
        button.insert_attribute_raw(DATA_QUERY_ATTR, "click(handler), text('go')");
        let record = runtime.ensure_virtual_record(&button);
        query
            .execute_element_query(QueryTarget::Virtual(button.clone()))
            .expect("pipeline");
        let record = record.borrow();
        assert_eq!(record.execute.len(), 1);
        assert_eq!(record.execute[0].name, "click");
        assert!(record.have_data);
    }

    #[test]
    fn observable_parameters_subscribe_once_per_call() {
        let mut query = query();
        let title = Observable::new("a");
        query.set_context(Some(Context::root(Value::object([("title", Value::Observable(title.clone()))]))));
        let runtime = query.runtime().clone();
        let div = VirtualElement::new("div");
        let record = runtime.ensure_virtual_record(&div);
        let plan = runtime.plan("attr('title', title), css('color', title)");
        let target = QueryTarget::Virtual(div.clone());
        query.execute_methods(&target, &plan).expect("pipeline");
        query.execute_methods(&target, &plan).expect("pipeline");
        assert_eq!(title.element_subscription_count(), 2);
        assert_eq!(record.borrow().observables.len(), 2);
    }

    #[test]
    fn parameter_failures_become_undefined() {
        let mut query = query();
        query.set_context(Some(Context::root(Value::Null)));
        let div = VirtualElement::new("div");
        div.insert_attribute_raw(DATA_QUERY_ATTR, "attr('title', missing.name)");
        query
            .execute_element_query(QueryTarget::Virtual(div.clone()))
            .expect("pipeline");
        assert_eq!(div.attribute("title"), None);
    }

    #[test]
    fn custom_queries_receive_detail_values() {
        let mut query = query();
        let flag = Observable::new(true);
        query.set_context(Some(Context::root(Value::object([("flag", Value::Observable(flag))]))));
        let runtime = query.runtime().clone();
        let seen = Rc::new(Cell::new((false, false)));
        let sink = Rc::clone(&seen);
        runtime.register_query(
            "probe",
            QueryDescriptor::new(QueryFlags::PASS_DETAIL_VALUES).with_preprocess(move |invocation, _| {
                let first = invocation.detail(0).is_some_and(|arg| arg.contains_observable);
                let second = invocation.detail(1).is_none_or(|arg| arg.contains_observable);
                sink.set((first, second));
                Ok(ControlFlow::Continue(()))
            }),
        );
        let div = VirtualElement::new("div");
        div.insert_attribute_raw(DATA_QUERY_ATTR, "probe(flag, 1)");
        query
            .execute_element_query(QueryTarget::Virtual(div))
            .expect("pipeline");
        assert_eq!(seen.get(), (true, false));
    }

    #[test]
    fn range_ends_are_recognized() {
        assert!(is_range_end(" /blocks "));
        assert!(is_range_end(" 4:/blocks "));
        assert!(!is_range_end(" 4:blocks each(x) "));
        assert!(!is_range_end(" note "));
    }
}
