#![forbid(unsafe_code)]

//! The runtime service container.
//!
//! A [`Runtime`] owns everything one templating session shares: the
//! document handle, the element metadata store, the query registry, the
//! plan and expression caches, server round-trip data, the deferred task
//! queue and the self-closing tag memo. Observables point back at runtimes
//! weakly, so dropping a runtime silently retires every binding it made.
//!
//! # Invariants
//!
//! 1. No `RefCell` borrow of runtime state is held across a call into user
//!    code, a query handler or an observable.
//! 2. A record id is stamped on its element (or comment) for as long as the
//!    record exists, and removed when the record is cleared.
//! 3. Server data is read by exactly one [`Runtime::query`] pass and
//!    dropped afterwards.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | `render()` outside `each` | `query` / `render_to_string` return `Err(RenderOutsideEach)` |
//! | Expression fails to compile | `Err` from [`Runtime::compile`]; callers report it on the debug channel |
//! | Node without a record | Lookups return `None`; clearing is a no-op |

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use blocks_dom::{Document, NodeId};

use crate::BlocksError;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::debug;
use crate::elements::{DATA_ID_ATTR, ElementId, ElementRecord, ElementsData, parse_comment_id};
use crate::expression::cache::BoundedCache;
use crate::expression::parser::{self, Expr};
use crate::query::registry::QueryRegistry;
use crate::query::{DomQuery, QueryCall, QueryDescriptor, parse_query};
use crate::server::{RenderedPage, ServerData};
use crate::value::Value;
use crate::virtual_element::html_element::{range_end, stamp_comment};
use crate::virtual_element::{self, VirtualElement};

type Task = Box<dyn FnOnce(&Runtime)>;
type Plan = Vec<Rc<QueryCall>>;

thread_local! {
    static NEXT_RUNTIME_ID: Cell<u64> = const { Cell::new(1) };
}

struct RuntimeInner {
    id: u64,
    document: Document,
    config: RuntimeConfig,
    elements: RefCell<ElementsData>,
    registry: RefCell<QueryRegistry>,
    plans: RefCell<BoundedCache<Plan>>,
    expressions: RefCell<BoundedCache<Expr>>,
    /// Data primed by [`Runtime::set_server_data`] for the next `query`.
    server: RefCell<Option<ServerData>>,
    /// Data being noted by [`Runtime::render_to_string`].
    collecting: RefCell<Option<ServerData>>,
    tasks: RefCell<VecDeque<Task>>,
    /// A (node, attribute) whose writes are suppressed.
    skip: Cell<Option<(NodeId, &'static str)>>,
    self_closing: RefCell<AHashMap<String, bool>>,
}

/// Handle to a templating session. Cloning clones the handle.
#[derive(Clone)]
pub struct Runtime(Rc<RuntimeInner>);

/// A non-owning runtime handle held by observables.
#[derive(Clone)]
pub struct WeakRuntime {
    id: u64,
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(Runtime)
    }
}

impl Runtime {
    /// A runtime over `document`. The configuration is sanitized first.
    #[must_use]
    pub fn new(document: Document, config: RuntimeConfig) -> Self {
        let config = config.sanitized();
        let id = NEXT_RUNTIME_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        Self(Rc::new(RuntimeInner {
            id,
            plans: RefCell::new(BoundedCache::new(config.plan_cache_capacity)),
            expressions: RefCell::new(BoundedCache::new(config.expression_cache_capacity)),
            document,
            config,
            elements: RefCell::new(ElementsData::default()),
            registry: RefCell::new(QueryRegistry::default()),
            server: RefCell::new(None),
            collecting: RefCell::new(None),
            tasks: RefCell::new(VecDeque::new()),
            skip: Cell::new(None),
            self_closing: RefCell::new(AHashMap::new()),
        }))
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.0.document
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            id: self.0.id,
            inner: Rc::downgrade(&self.0),
        }
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Bind `model` to the markup under `root` (the body by default).
    ///
    /// Without server data the live nodes are patched in place. With server
    /// data primed by [`Runtime::set_server_data`] the markup is already
    /// rendered: the virtual tree renders without touching the DOM and the
    /// bindings attach to the existing nodes.
    pub fn query(&self, model: impl Into<Value>, root: Option<NodeId>) -> Result<(), BlocksError> {
        let root = root.unwrap_or_else(|| self.document().body());
        let _span = tracing::debug_span!("blocks.query", runtime = self.0.id).entered();
        let Some(element) = virtual_element::create_root(self, root) else {
            return Ok(());
        };

        let mut query = DomQuery::new(self.clone());
        query.push_context(model.into());
        let result = if self.has_server_data() {
            element.render(&mut query).map(drop)
        } else {
            element.sync(&mut query)
        };
        self.0.server.borrow_mut().take();
        result?;

        let mut binder = DomQuery::new(self.clone());
        binder.bind_nodes(&[root]);
        tracing::debug!(records = self.record_count(), "query bound");
        Ok(())
    }

    /// Render `html` against `model` off-document, noting what a client
    /// runtime needs to bind the result.
    pub fn render_to_string(&self, model: impl Into<Value>, html: &str) -> Result<RenderedPage, BlocksError> {
        let _span = tracing::debug_span!("blocks.render", runtime = self.0.id).entered();
        let document = self.document().clone();
        let container = document.create_element("div");
        document.set_inner_html(container, html);
        let Some(element) = virtual_element::create_root(self, container) else {
            return Ok(RenderedPage {
                html: String::new(),
                server_data: ServerData::default(),
            });
        };

        self.0.collecting.replace(Some(ServerData::default()));
        let mut query = DomQuery::new(self.clone());
        query.push_context(model.into());
        let rendered = element.render(&mut query);
        let server_data = self.0.collecting.borrow_mut().take().unwrap_or_default();
        document.destroy(container);

        // The container stands in for the client's root element; only its
        // content is returned.
        let rendered = rendered?;
        let inner = rendered
            .find('>')
            .map_or(rendered.as_str(), |open| &rendered[open + 1..]);
        let html = inner.strip_suffix("</div>").unwrap_or(inner).to_owned();
        Ok(RenderedPage { html, server_data })
    }

    /// The context `node` was bound under.
    #[must_use]
    pub fn context(&self, node: NodeId) -> Option<Context> {
        self.context_of_node(node, false)
    }

    /// The `$this` of the context `node` was bound under.
    #[must_use]
    pub fn data_item(&self, node: NodeId) -> Option<Value> {
        self.context(node).map(|context| context.this())
    }

    /// Run the query `name` on `node` with evaluated `args`.
    pub fn execute_query(&self, node: NodeId, name: &str, args: Vec<Value>) -> Result<(), BlocksError> {
        let mut query = DomQuery::new(self.clone());
        query.set_context(self.context_of_node(node, false));
        query.invoke(node, name, args)
    }

    /// Virtual elements for `node` and its following siblings.
    #[must_use]
    pub fn create_virtual(&self, node: NodeId) -> Vec<VirtualElement> {
        virtual_element::create_virtual(self, node)
    }

    /// Register a custom query, replacing any query of the same name.
    pub fn register_query(&self, name: &str, descriptor: QueryDescriptor) {
        self.0.registry.borrow_mut().register(name, descriptor);
        // Plans dropped the name while it was unknown.
        self.0.plans.borrow_mut().clear();
    }

    /// Prime the next [`Runtime::query`] with data from a server render.
    pub fn set_server_data(&self, data: ServerData) {
        self.0.server.replace(Some(data));
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub(crate) fn queue_task(&self, task: impl FnOnce(&Runtime) + 'static) {
        self.0.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run queued tasks, including tasks they queue. Returns how many ran.
    pub fn run_pending_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.0.tasks.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            task(self);
            ran += 1;
        }
        ran
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.0.elements.borrow().len()
    }

    /// Drop every record, cache, task and server datum.
    pub fn reset(&self) {
        let records = self.0.elements.borrow_mut().clear_all();
        tracing::debug!(records = records.len(), "runtime reset");
        drop(records);
        self.clear_caches();
    }

    /// Force-clear every record so observables release the subscriptions
    /// this runtime made, then reset.
    pub fn teardown(&self) {
        let ids = self.0.elements.borrow().ids();
        for id in ids {
            self.clear_id(id, true);
        }
        self.reset();
    }

    fn clear_caches(&self) {
        self.0.plans.borrow_mut().clear();
        self.0.expressions.borrow_mut().clear();
        self.0.server.borrow_mut().take();
        self.0.collecting.borrow_mut().take();
        self.0.tasks.borrow_mut().clear();
        self.0.self_closing.borrow_mut().clear();
    }

    /// Clear the records of bound nodes that left the document.
    pub fn collect_garbage(&self) {
        let ids = self.0.elements.borrow().ids();
        let document = self.document();
        let mut collected = 0usize;
        for id in ids {
            let dom = self.record(id).and_then(|record| record.borrow().dom);
            if let Some(node) = dom
                && !document.is_connected(node)
            {
                self.clear_id(id, true);
                collected += 1;
            }
        }
        if collected > 0 {
            tracing::trace!(collected, "element records collected");
        }
    }

    // -----------------------------------------------------------------------
    // Element records
    // -----------------------------------------------------------------------

    pub(crate) fn record(&self, id: ElementId) -> Option<ElementRecord> {
        self.0.elements.borrow().get(id)
    }

    pub(crate) fn create_record(&self, element: Option<VirtualElement>) -> ElementRecord {
        self.0.elements.borrow_mut().insert(element)
    }

    pub(crate) fn adopt_record(&self, id: ElementId, element: Option<VirtualElement>) -> ElementRecord {
        self.0.elements.borrow_mut().adopt(id, element)
    }

    /// The record stamped on a live element or comment.
    pub(crate) fn record_of_node(&self, node: NodeId) -> Option<ElementRecord> {
        let document = self.document();
        let id = if document.is_element(node) {
            document.get_attribute(node, DATA_ID_ATTR)?.parse().ok()?
        } else if document.is_comment(node) {
            parse_comment_id(&document.node_value(node)?)?
        } else {
            return None;
        };
        self.record(id)
    }

    /// The record of `node`, created and stamped if missing.
    pub(crate) fn ensure_node_record(&self, node: NodeId) -> ElementRecord {
        if let Some(record) = self.record_of_node(node) {
            return record;
        }
        let record = self.create_record(None);
        let id = {
            let mut data = record.borrow_mut();
            data.dom = Some(node);
            data.id.to_string()
        };
        let document = self.document();
        if document.is_element(node) {
            document.set_attribute(node, DATA_ID_ATTR, &id);
        } else if document.is_comment(node) {
            stamp_comment(document, node, range_end(document, node), Some(&id));
        }
        record
    }

    pub(crate) fn record_of_virtual(&self, element: &VirtualElement) -> Option<ElementRecord> {
        if element.is_fake() {
            return element.node().and_then(|node| self.record_of_node(node));
        }
        self.record(element.data_id()?)
    }

    /// The record of `element`. A stamped id is adopted; otherwise a fresh
    /// id is allocated and stamped.
    pub(crate) fn ensure_virtual_record(&self, element: &VirtualElement) -> ElementRecord {
        if element.is_fake()
            && let Some(node) = element.node()
        {
            return self.ensure_node_record(node);
        }
        if let Some(id) = element.data_id() {
            let record = self.adopt_record(id, Some(element.clone()));
            let mut data = record.borrow_mut();
            if data.virtual_element.is_none() {
                data.virtual_element = Some(element.clone());
            }
            drop(data);
            return record;
        }
        let record = self.create_record(Some(element.clone()));
        let id = record.borrow().id;
        element.set_attribute(self, DATA_ID_ATTR, Some(id.to_string()));
        record
    }

    pub(crate) fn clear_virtual(&self, element: &VirtualElement, force: bool) {
        if let Some(record) = self.record_of_virtual(element) {
            let id = record.borrow().id;
            self.clear_id(id, force);
        }
    }

    /// Clear the records of `node` and its descendants.
    pub(crate) fn clear_node(&self, node: NodeId, force: bool) {
        let document = self.document();
        for node in std::iter::once(node).chain(document.descendants(node)) {
            if let Some(record) = self.record_of_node(node) {
                let id = record.borrow().id;
                self.clear_id(id, force);
            }
        }
    }

    /// Drop record `id` unless it still binds something and `force` is off.
    /// Its subscriptions are removed and its stamp is erased.
    fn clear_id(&self, id: ElementId, force: bool) {
        let Some(record) = self.record(id) else {
            return;
        };
        let (dom, element, observables) = {
            let data = record.borrow();
            if data.have_data && !force {
                return;
            }
            (
                data.dom,
                data.virtual_element.clone(),
                data.observables.values().cloned().collect::<Vec<_>>(),
            )
        };
        for observable in observables {
            observable.remove_subscriptions_for(self.0.id, id);
        }
        if let Some(element) = element
            && element.data_id() == Some(id)
        {
            element.set_attribute(self, DATA_ID_ATTR, None);
        }
        if let Some(node) = dom {
            let document = self.document();
            if document.is_element(node) {
                document.remove_attribute(node, DATA_ID_ATTR);
            } else if document.is_comment(node) && parse_comment_id(&document.node_value(node).unwrap_or_default()) == Some(id) {
                stamp_comment(document, node, range_end(document, node), None);
            }
        }
        self.0.elements.borrow_mut().remove(id, force);
    }

    /// The context `node` (or, with `children`, its content) binds under:
    /// the nearest record on the way up that carries one.
    pub(crate) fn context_of_node(&self, node: NodeId, children: bool) -> Option<Context> {
        let document = self.document();
        let mut cursor = Some(node);
        let mut own = !children;
        while let Some(current) = cursor {
            if let Some(record) = self.record_of_node(current) {
                let data = record.borrow();
                let context = if own {
                    data.context.clone()
                } else {
                    data.children_context.clone().or_else(|| data.context.clone())
                };
                if context.is_some() {
                    return context;
                }
            }
            own = false;
            cursor = document.parent(current);
        }
        None
    }

    // -----------------------------------------------------------------------
    // Form sync echo suppression
    // -----------------------------------------------------------------------

    pub(crate) fn is_skipped(&self, node: NodeId, name: &str) -> bool {
        self.0
            .skip
            .get()
            .is_some_and(|(skipped, attribute)| skipped == node && attribute == name)
    }

    pub(crate) fn set_skip_execution(&self, skip: Option<(NodeId, &'static str)>) {
        self.0.skip.set(skip);
    }

    // -----------------------------------------------------------------------
    // Caches
    // -----------------------------------------------------------------------

    pub(crate) fn is_self_closing(&self, tag: &str) -> bool {
        if let Some(known) = self.0.self_closing.borrow().get(tag).copied() {
            return known;
        }
        let void = blocks_dom::is_void_element(tag);
        self.0.self_closing.borrow_mut().insert(tag.to_owned(), void);
        void
    }

    /// Parse `code` through the expression cache. Failures are not cached.
    pub(crate) fn compile(&self, code: &str) -> Result<Rc<Expr>, BlocksError> {
        if let Some(expr) = self.0.expressions.borrow().get(code) {
            return Ok(expr);
        }
        let expr = parser::parse(code)?;
        Ok(self.0.expressions.borrow_mut().insert(code, expr))
    }

    /// The execution plan of a `data-query` text: registered calls only,
    /// `attr` and `val` first.
    pub(crate) fn plan(&self, text: &str) -> Rc<Plan> {
        if let Some(plan) = self.0.plans.borrow().get(text) {
            return plan;
        }
        let loud = self.config().debug;
        let (mut plan, rest): (Plan, Plan) = {
            let registry = self.0.registry.borrow();
            parse_query(text)
                .into_iter()
                .filter(|call| {
                    let known = registry.contains(&call.name);
                    if !known {
                        debug::query_not_exists(loud, &call.name, text);
                    }
                    known
                })
                .map(Rc::new)
                .partition(|call| matches!(call.name.as_str(), "attr" | "val"))
        };
        plan.extend(rest);
        self.0.plans.borrow_mut().insert(text, plan)
    }

    pub(crate) fn descriptor(&self, name: &str) -> Option<Rc<QueryDescriptor>> {
        self.0.registry.borrow().get(name)
    }

    // -----------------------------------------------------------------------
    // Server data
    // -----------------------------------------------------------------------

    pub(crate) fn has_server_data(&self) -> bool {
        self.0.server.borrow().is_some()
    }

    pub(crate) fn is_collecting(&self) -> bool {
        self.0.collecting.borrow().is_some()
    }

    pub(crate) fn server_expression(&self, id: ElementId) -> Option<String> {
        self.0
            .server
            .borrow()
            .as_ref()
            .and_then(|data| data.expression(id).map(str::to_owned))
    }

    pub(crate) fn server_attribute(&self, id: &str, attribute: &str) -> Option<String> {
        self.0
            .server
            .borrow()
            .as_ref()
            .and_then(|data| data.attribute(id, attribute).map(str::to_owned))
    }

    pub(crate) fn take_server_each(&self, id: ElementId) -> Option<String> {
        self.0.server.borrow_mut().as_mut().and_then(|data| data.take_each(id))
    }

    pub(crate) fn server_template(&self, id: ElementId) -> bool {
        self.0
            .server
            .borrow()
            .as_ref()
            .is_some_and(|data| data.has_template(id))
    }

    fn collect(&self, note: impl FnOnce(&mut ServerData)) {
        if let Some(data) = self.0.collecting.borrow_mut().as_mut() {
            note(data);
        }
    }

    pub(crate) fn note_server_expression(&self, id: ElementId, source: &str) {
        self.collect(|data| data.note_expression(id, source));
    }

    pub(crate) fn note_server_attribute(&self, id: ElementId, attribute: &str, source: &str) {
        self.collect(|data| data.note_attribute(id, attribute, source));
    }

    pub(crate) fn note_each_template(&self, id: ElementId, markup: &str) {
        self.collect(|data| data.note_each(id, markup));
    }

    pub(crate) fn note_template(&self, id: ElementId) {
        self.collect(|data| data.note_template(id));
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.0.id)
            .field("records", &self.record_count())
            .field("config", &self.0.config)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRuntime").field("id", &self.id).finish()
    }
}
