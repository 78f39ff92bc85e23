#![forbid(unsafe_code)]

//! Writes from a virtual element through to its live node.
//!
//! `value` and `checked` are properties on a live control, not attributes:
//! writing them changes what the user sees without touching the markup.
//! Comment ranges carry their element id in the text of both delimiters.

use ahash::AHashSet;
use blocks_dom::{Document, NodeId};

use crate::animation;
use crate::elements::DATA_ID_ATTR;
use crate::runtime::Runtime;

use super::style::kebab_case;

/// Write one attribute onto a live node; `None` removes it.
///
/// The write is skipped while the same node is pushing that attribute back
/// into its observable (the echo of a user edit).
pub(crate) fn write_attribute(runtime: &Runtime, node: NodeId, name: &str, value: Option<&str>) {
    if runtime.is_skipped(node, name) {
        return;
    }
    let document = runtime.document();
    if document.is_comment(node) {
        if name == DATA_ID_ATTR {
            stamp_comment(document, node, None, value);
        }
        return;
    }
    if !document.is_element(node) {
        return;
    }
    match name {
        "value" => document.set_value(node, value.unwrap_or_default()),
        "checked" => document.set_checked(node, value.is_some()),
        _ => match value {
            Some(value) => document.set_attribute(node, name, value),
            None => document.remove_attribute(node, name),
        },
    }
}

/// Rewrite the id prefix of a comment range (` 4:blocks each(items) `).
pub(crate) fn stamp_comment(document: &Document, start: NodeId, end: Option<NodeId>, id: Option<&str>) {
    for node in std::iter::once(start).chain(end) {
        let Some(text) = document.node_value(node) else {
            continue;
        };
        let body = strip_id(text.trim());
        let text = match id {
            Some(id) => format!(" {id}:{body} "),
            None => format!(" {body} "),
        };
        document.set_node_value(node, &text);
    }
}

/// `4:blocks each(items)` -> `blocks each(items)`.
pub(crate) fn strip_id(text: &str) -> &str {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0
        && let Some(rest) = text[digits..].strip_prefix(':')
    {
        return rest;
    }
    text
}

/// Select exactly the options of `select` whose value is in `values`.
pub(crate) fn select_values(runtime: &Runtime, select: NodeId, values: &AHashSet<String>) {
    let document = runtime.document();
    for option in document.elements_by_tag_name(select, "option") {
        let selected = values.contains(&document.value(option));
        document.set_selected(option, selected);
    }
}

/// Write a camel-cased style property. `display` goes through the
/// animation hooks so `animate(...)` callbacks see shows and hides.
pub(crate) fn write_style(runtime: &Runtime, node: NodeId, name: &str, value: &str) {
    if !runtime.document().is_element(node) {
        return;
    }
    if name == "display" {
        animation::set_visibility(runtime, node, value != "none");
    } else {
        runtime
            .document()
            .set_style_property(node, &kebab_case(name), value);
    }
}

/// Replace the content of a live element, or of a comment range up to its
/// `/blocks` delimiter.
pub(crate) fn write_inner_html(runtime: &Runtime, node: NodeId, markup: &str) {
    let document = runtime.document();
    if document.is_element(node) {
        document.set_inner_html(node, markup);
        return;
    }
    if !document.is_comment(node) {
        return;
    }
    let Some(parent) = document.parent(node) else {
        return;
    };
    let end = range_end(document, node);
    let mut cursor = document.next_sibling(node);
    while let Some(current) = cursor {
        if Some(current) == end {
            break;
        }
        cursor = document.next_sibling(current);
        document.detach(current);
    }
    let fragment = document.parse_fragment(markup);
    document.insert_before(parent, fragment, end);
    document.destroy(fragment);
}

/// The closing delimiter of the comment range opened by `start`.
pub(crate) fn range_end(document: &Document, start: NodeId) -> Option<NodeId> {
    let mut cursor = document.next_sibling(start);
    while let Some(node) = cursor {
        if document.is_comment(node)
            && document
                .node_value(node)
                .is_some_and(|text| text.contains("/blocks"))
        {
            return Some(node);
        }
        cursor = document.next_sibling(node);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;

    fn runtime(markup: &str) -> (Runtime, NodeId) {
        let document = Document::new();
        let host = document.create_element("div");
        document.set_inner_html(host, markup);
        document.append_child(document.body(), host);
        (Runtime::new(document, RuntimeConfig::default()), host)
    }

    #[test]
    fn value_and_checked_are_properties() {
        let (runtime, host) = runtime(r#"<input type="checkbox">"#);
        let document = runtime.document().clone();
        let input = document.child_at(host, 0).expect("input");
        write_attribute(&runtime, input, "value", Some("on"));
        write_attribute(&runtime, input, "checked", Some("checked"));
        assert_eq!(document.value(input), "on");
        assert!(document.checked(input));
        assert_eq!(document.outer_html(input), r#"<input type="checkbox">"#);

        write_attribute(&runtime, input, "checked", None);
        assert!(!document.checked(input));
    }

    #[test]
    fn null_removes_attributes() {
        let (runtime, host) = runtime(r#"<a title="x"></a>"#);
        let document = runtime.document().clone();
        let link = document.child_at(host, 0).expect("link");
        write_attribute(&runtime, link, "title", None);
        assert!(!document.has_attribute(link, "title"));
    }

    #[test]
    fn comment_ids_replace_the_old_prefix() {
        let (runtime, host) = runtime("<!-- 3:blocks each(items) --><!-- 3:/blocks -->");
        let document = runtime.document().clone();
        let start = document.child_at(host, 0).expect("start");
        let end = document.child_at(host, 1);
        stamp_comment(&document, start, end, Some("8"));
        assert_eq!(document.node_value(start).as_deref(), Some(" 8:blocks each(items) "));
        assert_eq!(document.node_value(end.expect("end")).as_deref(), Some(" 8:/blocks "));
    }

    #[test]
    fn comment_range_content_is_replaced() {
        let (runtime, host) = runtime("<p></p><!-- blocks x -->old<b></b><!-- /blocks --><i></i>");
        let document = runtime.document().clone();
        let start = document.child_at(host, 1).expect("start");
        write_inner_html(&runtime, start, "<u>new</u>");
        assert_eq!(
            document.inner_html(host),
            "<p></p><!-- blocks x --><u>new</u><!-- /blocks --><i></i>"
        );
    }

    #[test]
    fn select_values_pick_matching_options() {
        let (runtime, host) =
            runtime(r#"<select multiple><option value="a">A</option><option value="b">B</option></select>"#);
        let document = runtime.document().clone();
        let select = document.child_at(host, 0).expect("select");
        let values: AHashSet<String> = ["b".to_owned()].into_iter().collect();
        select_values(&runtime, select, &values);
        let selected = document.selected_options(select);
        assert_eq!(selected.len(), 1);
        assert_eq!(document.value(selected[0]), "b");
    }

    #[test]
    fn strip_id_only_removes_numeric_prefixes() {
        assert_eq!(strip_id("12:blocks x"), "blocks x");
        assert_eq!(strip_id("blocks x"), "blocks x");
        assert_eq!(strip_id("a1:x"), "a1:x");
    }
}
