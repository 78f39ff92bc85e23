#![forbid(unsafe_code)]

//! Build a virtual tree from live nodes.

use blocks_dom::NodeId;

use crate::elements::{DATA_ID_ATTR, parse_comment_id};
use crate::expression::{Expression, escape_value};
use crate::runtime::Runtime;

use super::html_element::strip_id;
use super::{Child, DATA_QUERY_ATTR, VirtualElement, style};

/// Elements whose content is kept as raw markup.
const RAW_CONTENT: &[&str] = &["script", "style", "code"];

/// Virtual elements for `node` and its following siblings.
pub(crate) fn create_virtual(runtime: &Runtime, node: NodeId) -> Vec<VirtualElement> {
    create_children(runtime, Some(node), None)
        .children
        .into_iter()
        .filter_map(|child| match child {
            Child::Element(element) => Some(element),
            _ => None,
        })
        .collect()
}

/// The virtual element for `node` alone, without its siblings.
pub(crate) fn create_root(runtime: &Runtime, node: NodeId) -> Option<VirtualElement> {
    runtime
        .document()
        .is_element(node)
        .then(|| create_element(runtime, node, None))
}

/// Virtual children for the live children of `element`.
pub(crate) fn create_child_list(runtime: &Runtime, element: &VirtualElement, node: NodeId) -> Vec<Child> {
    let first = runtime.document().first_child(node);
    create_children(runtime, first, Some(element)).children
}

struct Created {
    children: Vec<Child>,
    /// The `/blocks` comment that closed a comment range.
    end: Option<NodeId>,
}

fn create_children(runtime: &Runtime, mut cursor: Option<NodeId>, parent: Option<&VirtualElement>) -> Created {
    let document = runtime.document();
    let mut children = Vec::new();
    while let Some(node) = cursor {
        cursor = document.next_sibling(node);
        if document.is_element(node) {
            children.push(Child::Element(create_element(runtime, node, parent)));
        } else if document.is_text(node) {
            let data = escape_value(&document.node_value(node).unwrap_or_default());
            children.push(match Expression::create(&data, None) {
                Some(expression) => Child::Expression(expression.with_source(node)),
                None => Child::Text(data),
            });
        } else if document.is_comment(node) {
            let text = document.node_value(node).unwrap_or_default();
            let trimmed = text.trim();
            let body = strip_id(trimmed);
            let in_range = parent.is_some_and(VirtualElement::is_comment);
            let marker = parse_comment_id(&text).filter(|_| body == "blocks");

            if let Some(id) = marker {
                // A text expression rendered on the server.
                match runtime
                    .server_expression(id)
                    .and_then(|source| Expression::create(&source, None))
                {
                    Some(expression) => children.push(Child::Expression(expression.with_marker(id))),
                    None => children.push(Child::Text(format!("<!--{text}-->"))),
                }
            } else if let Some(query) = body.strip_prefix("blocks") {
                let element = VirtualElement::comment(body, Some(node), None);
                element.set_parent(parent);
                element.insert_attribute_raw(DATA_QUERY_ATTR, query.trim());
                if let Some(id) = parse_comment_id(&text) {
                    element.insert_attribute_raw(DATA_ID_ATTR, &id.to_string());
                }
                let inner = create_children(runtime, cursor, Some(&element));
                element.set_children(inner.children);
                element.set_comment_end(inner.end);
                cursor = inner.end.and_then(|end| document.next_sibling(end));
                children.push(Child::Element(element));
            } else if in_range && body.starts_with("/blocks") {
                return Created {
                    children,
                    end: Some(node),
                };
            } else if in_range || !body.starts_with("/blocks") {
                children.push(Child::Text(format!("<!--{text}-->")));
            }
        }
    }
    Created { children, end: None }
}

fn create_element(runtime: &Runtime, node: NodeId, parent: Option<&VirtualElement>) -> VirtualElement {
    let document = runtime.document();
    let tag = document.tag_name(node);
    let element = VirtualElement::new(&tag);
    element.set_parent(parent);
    element.restore_el(Some(node));
    if let Some(parent) = parent {
        element.set_each(parent.is_each() || parent.children_each());
    }

    for (name, value) in document.attributes(node) {
        if name == "style" {
            element.set_style_map(style::parse(&value));
        } else {
            element.insert_attribute_raw(&name, &value);
        }
    }

    let id = element.attribute(DATA_ID_ATTR);
    let use_server = !element.is_each() && runtime.has_server_data();
    let expressions = element
        .attributes()
        .into_iter()
        .filter_map(|(name, value)| {
            let source = id
                .as_deref()
                .filter(|_| use_server)
                .and_then(|id| runtime.server_attribute(id, &name))
                .unwrap_or(value);
            Expression::create(&source, Some(&name))
        })
        .collect();
    element.set_attribute_expressions(expressions);

    let skip = RAW_CONTENT.contains(&tag.as_str()) || document.has_class(node, "bl-skip");
    if skip {
        element.set_inner_html_raw(Some(document.inner_html(node)));
    } else {
        element.set_children(create_child_list(runtime, &element, node));
    }
    element
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use crate::virtual_element::RenderMode;
    use blocks_dom::Document;

    fn build(markup: &str) -> (Runtime, VirtualElement) {
        let document = Document::new();
        let host = document.create_element("div");
        document.set_inner_html(host, markup);
        document.append_child(document.body(), host);
        let runtime = Runtime::new(document, RuntimeConfig::default());
        let root = create_virtual(&runtime, host).remove(0);
        (runtime, root)
    }

    #[test]
    fn mirrors_attributes_style_and_children() {
        let (_runtime, root) = build(r#"<p class="a" style="color: red; font-size: 2px">hi <b>there</b></p>"#);
        let p = &root.element_children()[0];
        assert_eq!(p.tag_name(), "p");
        assert_eq!(p.attribute("class").as_deref(), Some("a"));
        assert_eq!(p.attribute("style"), None);
        assert_eq!(p.style("fontSize").as_deref(), Some("2px"));
        assert_eq!(p.child_count(), 2);
        assert!(p.parent().is_some_and(|parent| parent.ptr_eq(&root)));
    }

    #[test]
    fn interpolated_text_becomes_an_expression() {
        let (_runtime, root) = build("<p>Hello {{name}}!</p>");
        let p = &root.element_children()[0];
        assert!(matches!(&p.children()[0], Child::Expression(e) if e.text() == "Hello {{name}}!"));
    }

    #[test]
    fn attribute_templates_are_collected() {
        let (_runtime, root) = build(r#"<a title="{{t}}" href="/x"></a>"#);
        let a = &root.element_children()[0];
        let expressions = a.attribute_expressions();
        assert_eq!(expressions.len(), 1);
        assert_eq!(expressions[0].attribute(), Some("title"));
    }

    #[test]
    fn raw_content_elements_keep_markup() {
        let (_runtime, root) = build(r#"<div class="bl-skip"><b>{{x}}</b></div><script>if (a < b) {}</script>"#);
        let children = root.element_children();
        assert_eq!(children[0].inner_html().as_deref(), Some("<b>{{x}}</b>"));
        assert_eq!(children[0].child_count(), 0);
        assert!(children[1].inner_html().is_some());
    }

    #[test]
    fn comment_ranges_nest_until_their_end() {
        let (_runtime, root) =
            build("<!-- blocks each(items) --><li>x</li><!-- note --><!-- /blocks --><p></p><!-- plain -->");
        let children = root.children();
        assert_eq!(children.len(), 3);
        let Child::Element(range) = &children[0] else {
            panic!("expected a comment range");
        };
        assert!(range.is_comment());
        assert_eq!(range.query_text().as_deref(), Some("each(items)"));
        assert_eq!(range.child_count(), 2);
        assert_eq!(range.render_mode(), RenderMode::All);
        assert!(matches!(&children[2], Child::Text(t) if t == "<!-- plain -->"));
    }

    #[test]
    fn stamped_comment_ids_are_read() {
        let (_runtime, root) = build("<!-- 7:blocks with(a) --><!-- 7:/blocks -->");
        let range = &root.element_children()[0];
        assert_eq!(range.data_id(), Some(7));
        assert_eq!(range.query_text().as_deref(), Some("with(a)"));
    }
}
