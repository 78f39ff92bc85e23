#![forbid(unsafe_code)]

//! Rendering and syncing a virtual element.
//!
//! [`VirtualElement::render`] produces markup; [`VirtualElement::sync`]
//! walks the live nodes the tree was built from and patches them in place.
//! Both run the element's query pipeline first and unwind the scopes it
//! opened (`with`, `define`) once the element's content is done, on every
//! exit path.

use blocks_dom::html::decode_entities;
use blocks_dom::escape_attribute;

use crate::BlocksError;
use crate::elements::DATA_ID_ATTR;
use crate::query::{DomQuery, QueryTarget};

use super::style::kebab_case;
use super::{Child, Kind, RenderMode, ScopeExit, VirtualElement};

impl VirtualElement {
    /// Render this element and its content to markup.
    pub(crate) fn render(&self, query: &mut DomQuery) -> Result<String, BlocksError> {
        let el = self.take_el();
        let executed = self.execute(query);
        if !self.is_each() {
            self.restore_el(el);
        }
        let result = executed.and_then(|()| self.render_content(query));
        self.unwind(query);
        result
    }

    fn render_content(&self, query: &mut DomQuery) -> Result<String, BlocksError> {
        let mode = self.render_mode();
        if mode == RenderMode::None {
            return Ok(String::new());
        }
        let content = match (mode, self.inner_html()) {
            (RenderMode::ElementOnly, _) => String::new(),
            (_, Some(html)) => html,
            _ => self.render_children(query)?,
        };
        let mut html = self.render_begin_tag(query);
        html.push_str(&content);
        html.push_str(&self.render_end_tag(query));
        Ok(html)
    }

    /// Render the child list (or the `each` template) against the current
    /// context.
    pub(crate) fn render_children(&self, query: &mut DomQuery) -> Result<String, BlocksError> {
        let runtime = query.runtime().clone();
        let each = self.is_each();
        let mut html = String::new();
        for child in self.template_children() {
            match child {
                Child::Text(text) => html.push_str(&text),
                Child::Element(element) => {
                    if each {
                        element.set_each(true);
                    }
                    html.push_str(&element.render(query)?);
                }
                Child::Expression(expression) => {
                    html.push_str(&expression.get_value(&runtime, query.context(), None));
                }
            }
        }
        Ok(html)
    }

    pub(crate) fn render_begin_tag(&self, query: &DomQuery) -> String {
        let data = self.0.borrow();
        if let Kind::Comment { text, .. } = &data.kind {
            return match data.attributes.get(DATA_ID_ATTR) {
                Some(id) => format!("<!-- {id}:{text} -->"),
                None => format!("<!-- {text} -->"),
            };
        }

        let mut html = format!("<{}", data.tag);
        let selected = (data.tag == "option")
            .then(|| data.parent.upgrade())
            .flatten()
            .and_then(|parent| parent.borrow().values.clone())
            .map(|values| {
                data.attributes
                    .get("value")
                    .is_some_and(|value| values.contains(value))
            });
        for (name, value) in &data.attributes {
            if selected.is_some() && name == "selected" {
                continue;
            }
            push_attribute(&mut html, name, value);
        }
        if selected == Some(true) {
            push_attribute(&mut html, "selected", "selected");
        }

        let style: String = data
            .style
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| format!("{}:{};", kebab_case(name), value))
            .collect();
        if !style.is_empty() {
            push_attribute(&mut html, "style", &style);
        }

        if query.runtime().is_self_closing(&data.tag) {
            html.push_str(" />");
        } else {
            html.push('>');
        }
        html
    }

    pub(crate) fn render_end_tag(&self, query: &DomQuery) -> String {
        let data = self.0.borrow();
        if let Kind::Comment { .. } = &data.kind {
            return match data.attributes.get(DATA_ID_ATTR) {
                Some(id) => format!("<!-- {id}:/blocks -->"),
                None => "<!-- /blocks -->".to_owned(),
            };
        }
        if query.runtime().is_self_closing(&data.tag) {
            return String::new();
        }
        format!("</{}>", data.tag)
    }

    /// Patch the live nodes this element was built from.
    pub(crate) fn sync(&self, query: &mut DomQuery) -> Result<(), BlocksError> {
        let result = self.execute(query).and_then(|()| self.sync_children(query));
        self.unwind(query);
        result
    }

    fn sync_children(&self, query: &mut DomQuery) -> Result<(), BlocksError> {
        if self.inner_html().is_some() || self.children_each() {
            return Ok(());
        }
        let runtime = query.runtime().clone();
        let document = runtime.document();
        let each = self.is_each();
        for child in self.children() {
            match child {
                Child::Element(element) => {
                    if each {
                        element.set_each(true);
                    }
                    element.sync(query)?;
                }
                Child::Expression(expression) => {
                    let Some(source) = expression.source() else {
                        continue;
                    };
                    let Some(parent) = document.parent(source) else {
                        continue;
                    };
                    let html = expression.get_value(&runtime, query.context(), None);
                    let fragment = document.parse_fragment(&html);
                    document.insert_before(parent, fragment, Some(source));
                    document.destroy(fragment);
                    document.destroy(source);
                }
                Child::Text(_) => {}
            }
        }
        Ok(())
    }

    /// Run the query pipeline and the attribute templates of this element.
    fn execute(&self, query: &mut DomQuery) -> Result<(), BlocksError> {
        if self.is_each() {
            self.revert_changes();
            self.track_changes();
            self.restore_el(None);
        }
        if self.render_mode() == RenderMode::None {
            return Ok(());
        }

        let runtime = query.runtime().clone();
        let record = runtime.ensure_virtual_record(self);
        query.apply_context_to_element(self);

        let live = self.node().filter(|_| !self.is_each());
        for expression in self.attribute_expressions() {
            let Some(name) = expression.attribute() else {
                continue;
            };
            let value = decode_entities(&expression.get_value(&runtime, query.context(), Some(&record)));
            match live {
                Some(node) if !self.is_comment() => {
                    super::html_element::write_attribute(&runtime, node, name, Some(&value));
                }
                Some(_) => {}
                None => self.set_attribute(&runtime, name, Some(value)),
            }
        }

        let result = query.execute_element_query(QueryTarget::Virtual(self.clone()));
        runtime.clear_virtual(self, false);
        result
    }

    fn unwind(&self, query: &mut DomQuery) {
        for exit in self.take_scope_exits().into_iter().rev() {
            match exit {
                ScopeExit::RemoveProperty(name) => query.remove_property(&name),
                ScopeExit::PopContext => query.pop_context(),
                ScopeExit::RestoreContext(context) => query.set_context(context),
            }
        }
    }

    /// The template markup of this element as authored: tracked changes
    /// rolled back, attribute templates and interpolations unevaluated.
    pub(crate) fn source_markup(&self) -> String {
        self.revert_changes();
        let data = self.0.borrow();
        let (open, close) = match &data.kind {
            Kind::Comment { text, .. } => (format!("<!-- {text} -->"), "<!-- /blocks -->".to_owned()),
            Kind::Element => {
                let mut open = format!("<{}", data.tag);
                for (name, value) in &data.attributes {
                    if name != DATA_ID_ATTR {
                        push_attribute(&mut open, name, value);
                    }
                }
                let style: String = data
                    .style
                    .iter()
                    .map(|(name, value)| format!("{}:{};", kebab_case(name), value))
                    .collect();
                if !style.is_empty() {
                    push_attribute(&mut open, "style", &style);
                }
                if blocks_dom::is_void_element(&data.tag) {
                    open.push_str(" />");
                    return open;
                }
                open.push('>');
                (open, format!("</{}>", data.tag))
            }
        };
        let children = data.template.clone().unwrap_or_else(|| data.children.clone());
        let inner_html = data.inner_html.clone();
        drop(data);

        let mut html = open;
        match inner_html {
            Some(inner) if children.is_empty() => html.push_str(&inner),
            _ => html.push_str(&children_markup(&children)),
        }
        html.push_str(&close);
        html
    }
}

/// Authored markup of a child list.
pub(crate) fn children_markup(children: &[Child]) -> String {
    children
        .iter()
        .map(|child| match child {
            Child::Text(text) => text.clone(),
            Child::Expression(expression) => expression.text().to_owned(),
            Child::Element(element) => element.source_markup(),
        })
        .collect()
}

fn push_attribute(html: &mut String, name: &str, value: &str) {
    html.push(' ');
    html.push_str(name);
    if !value.is_empty() {
        html.push_str("=\"");
        html.push_str(&escape_attribute(value));
        html.push('"');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use crate::context::Context;
    use crate::runtime::Runtime;
    use crate::value::Value;
    use blocks_dom::Document;

    fn query_with(model: Value) -> DomQuery {
        let runtime = Runtime::new(Document::new(), RuntimeConfig::default());
        let mut query = DomQuery::new(runtime);
        query.set_context(Some(Context::root(model)));
        query
    }

    #[test]
    fn renders_attributes_style_and_void_tags() {
        let mut query = query_with(Value::Undefined);
        let runtime = query.runtime().clone();
        let div = VirtualElement::new("div");
        div.insert_attribute_raw("title", "a \"b\"");
        div.insert_attribute_raw("hidden", "");
        div.css(&runtime, "fontSize", &Value::from(3));
        div.css(&runtime, "color", &Value::from(""));
        let input = VirtualElement::new("input");
        input.set_parent(Some(&div));
        div.set_children(vec![Child::Element(input), Child::Text("x".into())]);

        assert_eq!(
            div.render(&mut query).expect("render"),
            r#"<div title="a &quot;b&quot;" hidden style="font-size:3px;"><input />x</div>"#
        );
    }

    #[test]
    fn render_mode_controls_output() {
        let mut query = query_with(Value::Undefined);
        let p = VirtualElement::new("p");
        p.set_children(vec![Child::Text("body".into())]);
        p.set_render_mode(RenderMode::ElementOnly);
        assert_eq!(p.render(&mut query).expect("render"), "<p></p>");
        p.set_render_mode(RenderMode::None);
        assert_eq!(p.render(&mut query).expect("render"), "");
    }

    #[test]
    fn inner_html_wins_over_children() {
        let mut query = query_with(Value::Undefined);
        let p = VirtualElement::new("p");
        p.set_children(vec![Child::Text("old".into())]);
        p.set_inner_html_raw(Some("<b>new</b>".into()));
        assert_eq!(p.render(&mut query).expect("render"), "<p><b>new</b></p>");
    }

    #[test]
    fn interpolations_render_against_the_context() {
        let mut query = query_with(Value::object([("name", Value::from("<Ann>"))]));
        let p = VirtualElement::new("p");
        let expression = crate::expression::Expression::create("Hi {{name}}", None).expect("expression");
        p.set_children(vec![Child::Expression(expression)]);
        assert_eq!(p.render(&mut query).expect("render"), "<p>Hi &lt;Ann&gt;</p>");
    }

    #[test]
    fn comment_ranges_render_their_delimiters() {
        let mut query = query_with(Value::Undefined);
        let range = VirtualElement::comment("blocks with(a)", None, None);
        range.set_children(vec![Child::Text("x".into())]);
        assert_eq!(
            range.render(&mut query).expect("render"),
            "<!-- blocks with(a) -->x<!-- /blocks -->"
        );
    }

    #[test]
    fn options_follow_the_select_values() {
        let mut query = query_with(Value::Undefined);
        let runtime = query.runtime().clone();
        let select = VirtualElement::new("select");
        let a = VirtualElement::new("option");
        a.insert_attribute_raw("value", "a");
        a.insert_attribute_raw("selected", "");
        let b = VirtualElement::new("option");
        b.insert_attribute_raw("value", "b");
        a.set_parent(Some(&select));
        b.set_parent(Some(&select));
        select.set_children(vec![Child::Element(a), Child::Element(b)]);
        select.attr(&runtime, "value", &Value::from("b"));
        assert_eq!(
            select.render(&mut query).expect("render"),
            r#"<select><option value="a"></option><option value="b" selected="selected"></option></select>"#
        );
    }

    #[test]
    fn source_markup_is_unevaluated() {
        let p = VirtualElement::new("p");
        p.insert_attribute_raw("title", "{{t}}");
        p.insert_attribute_raw(DATA_ID_ATTR, "4");
        let expression = crate::expression::Expression::create("{{name}}", None).expect("expression");
        p.set_children(vec![Child::Expression(expression), Child::Text("!".into())]);
        assert_eq!(p.source_markup(), r#"<p title="{{t}}">{{name}}!</p>"#);
    }
}
