#![forbid(unsafe_code)]

//! Test harness and scenario fixtures for blocks.
//!
//! - [`Page`] bundles a document, a runtime and a host element holding the
//!   markup under test, with lookup and event helpers
//! - [`normalize_markup`] and [`assert_markup!`] compare rendered markup
//!   without the element ids the runtime stamps into it
//! - [`strategies`] holds `proptest` strategies shared by property tests
//!
//! Nothing here installs a tracing subscriber; tests that want output
//! install one themselves.

pub mod strategies;

use blocks_core::{BlocksError, RenderedPage, Runtime, RuntimeConfig, Value};
use blocks_dom::{Document, DomEvent, NodeId};

/// A document with markup under a host `<div>` and a runtime bound to it.
pub struct Page {
    document: Document,
    runtime: Runtime,
    host: NodeId,
}

impl Page {
    /// A page holding `markup`, with the default configuration.
    #[must_use]
    pub fn new(markup: &str) -> Self {
        Self::with_config(markup, RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(markup: &str, config: RuntimeConfig) -> Self {
        let document = Document::new();
        let host = document.create_element("div");
        document.set_attribute(host, "id", "host");
        document.set_inner_html(host, markup);
        document.append_child(document.body(), host);
        let runtime = Runtime::new(document.clone(), config);
        Self {
            document,
            runtime,
            host,
        }
    }

    /// A client page primed with the output of a server render.
    #[must_use]
    pub fn from_server(page: &RenderedPage) -> Self {
        let client = Self::new(&page.html);
        client.runtime.set_server_data(page.server_data.clone());
        client
    }

    /// Render `markup` against `model` on a throwaway server runtime.
    pub fn render_on_server(model: impl Into<Value>, markup: &str) -> Result<RenderedPage, BlocksError> {
        let runtime = Runtime::new(Document::new(), RuntimeConfig::default());
        let page = runtime.render_to_string(model, markup)?;
        tracing::debug!(bytes = page.html.len(), "server render");
        Ok(page)
    }

    /// Bind `model` to the host element.
    pub fn bind(&self, model: impl Into<Value>) -> Result<(), BlocksError> {
        self.runtime.query(model, Some(self.host))
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[must_use]
    pub fn host(&self) -> NodeId {
        self.host
    }

    /// The host's markup.
    #[must_use]
    pub fn html(&self) -> String {
        self.document.inner_html(self.host)
    }

    /// The host's markup with runtime ids stripped.
    #[must_use]
    pub fn markup(&self) -> String {
        normalize_markup(&self.html())
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.document.text_content(self.host)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Elements named `tag` under the host, in document order.
    #[must_use]
    pub fn all(&self, tag: &str) -> Vec<NodeId> {
        self.document.elements_by_tag_name(self.host, tag)
    }

    /// The first element named `tag` under the host.
    #[must_use]
    pub fn first(&self, tag: &str) -> Option<NodeId> {
        self.all(tag).into_iter().next()
    }

    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        self.document.get_element_by_id(id)
    }

    /// Text of every element named `tag`, in document order.
    #[must_use]
    pub fn texts(&self, tag: &str) -> Vec<String> {
        self.all(tag)
            .into_iter()
            .map(|node| self.document.text_content(node))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn dispatch(&self, node: NodeId, kind: &str) {
        self.document.dispatch_event(&DomEvent::new(kind, node));
    }

    pub fn click(&self, node: NodeId) {
        self.dispatch(node, "click");
    }

    /// Set a control's value and fire `input`.
    pub fn type_into(&self, node: NodeId, value: &str) {
        self.document.set_value(node, value);
        self.dispatch(node, "input");
    }

    /// Toggle a checkbox and fire `click`.
    pub fn toggle(&self, node: NodeId) {
        let checked = self.document.checked(node);
        self.document.set_checked(node, !checked);
        self.click(node);
    }

    /// Fire `keydown`, then apply `value` the way a browser would after the
    /// key lands, then run the deferred comparison.
    pub fn key_into(&self, node: NodeId, key: &str, value: &str) -> usize {
        self.document
            .dispatch_event(&DomEvent::new("keydown", node).with_key(key));
        self.document.set_value(node, value);
        self.runtime.run_pending_tasks()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("runtime", &self.runtime)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// `html` with `data-id` attributes and comment id prefixes removed.
#[must_use]
pub fn normalize_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix(" data-id=\"") {
            rest = after.find('"').map_or("", |end| &after[end + 1..]);
        } else if let Some(after) = rest.strip_prefix("<!-- ") {
            out.push_str("<!-- ");
            let digits = after.bytes().take_while(u8::is_ascii_digit).count();
            rest = match after[digits..].strip_prefix(':') {
                Some(body) if digits > 0 => body,
                _ => after,
            };
        } else {
            let mut chars = rest.chars();
            if let Some(ch) = chars.next() {
                out.push(ch);
            }
            rest = chars.as_str();
        }
    }
    out
}

/// Assert that two markup strings match once runtime ids are stripped.
#[macro_export]
macro_rules! assert_markup {
    ($actual:expr, $expected:expr $(,)?) => {{
        let actual = $crate::normalize_markup(&$actual);
        let expected = $crate::normalize_markup(&$expected);
        assert_eq!(actual, expected, "markup mismatch");
    }};
}

/// A model object from `(name, value)` pairs.
#[must_use]
pub fn model<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::object(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_ids() {
        assert_eq!(
            normalize_markup(r#"<p data-id="3" class="a">x</p><!-- 4:blocks each(xs) --><!-- 4:/blocks -->"#),
            r#"<p class="a">x</p><!-- blocks each(xs) --><!-- /blocks -->"#
        );
        assert_eq!(normalize_markup("<!-- plain -->"), "<!-- plain -->");
    }

    #[test]
    fn page_binds_and_reads_back() {
        let page = Page::new("<b>{{who}}</b>");
        page.bind(model([("who", Value::from("you"))])).expect("bind");
        assert_eq!(page.texts("b"), vec!["you".to_owned()]);
        assert_markup!(page.html(), "<b>you</b>");
    }
}
