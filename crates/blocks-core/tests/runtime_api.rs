#![forbid(unsafe_code)]

//! Integration tests: the public `Runtime` surface.

use std::ops::ControlFlow;

use blocks_core::{
    BlocksError, ElementCall, ElementMethod, Observable, QueryDescriptor, QueryFlags, Runtime,
    RuntimeConfig, Value,
};
use blocks_dom::{Document, NodeId};

fn page(markup: &str) -> (Document, Runtime, NodeId) {
    let document = Document::new();
    let host = document.create_element("div");
    document.set_inner_html(host, markup);
    document.append_child(document.body(), host);
    let runtime = Runtime::new(document.clone(), RuntimeConfig::default());
    (document, runtime, host)
}

fn first(document: &Document, host: NodeId, tag: &str) -> NodeId {
    document.elements_by_tag_name(host, tag)[0]
}

#[test]
fn config_is_sanitized_on_construction() {
    let config = RuntimeConfig {
        plan_cache_capacity: 0,
        expression_cache_capacity: 1,
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::new(Document::new(), config);
    assert!(runtime.config().plan_cache_capacity >= 16);
    assert!(runtime.config().expression_cache_capacity >= 16);
}

#[test]
fn custom_call_queries_forward_to_element_methods() {
    let (document, runtime, host) = page(r#"<b data-query="label(caption)">x</b>"#);
    runtime.register_query(
        "label",
        QueryDescriptor::new(QueryFlags::empty()).with_call(ElementCall::Named {
            method: ElementMethod::Attr,
            prefix: Some("aria-label".into()),
        }),
    );
    let caption = Observable::new("close");
    runtime
        .query(Value::object([("caption", Value::from(caption.clone()))]), Some(host))
        .expect("query");
    let b = first(&document, host, "b");
    assert_eq!(document.get_attribute(b, "aria-label").as_deref(), Some("close"));

    caption.set("dismiss");
    assert_eq!(document.get_attribute(b, "aria-label").as_deref(), Some("dismiss"));
}

#[test]
fn custom_preprocess_queries_see_evaluated_arguments() {
    let (document, runtime, host) = page(r#"<i data-query="mark(1 + 1)"></i>"#);
    runtime.register_query(
        "mark",
        QueryDescriptor::new(QueryFlags::empty()).with_preprocess(|invocation, element| {
            let value = invocation.arg(0);
            element.attr(invocation.runtime(), "data-mark", &value);
            Ok(ControlFlow::Continue(()))
        }),
    );
    runtime.query(Value::Null, Some(host)).expect("query");
    let i = first(&document, host, "i");
    assert_eq!(document.get_attribute(i, "data-mark").as_deref(), Some("2"));
}

#[test]
fn execute_query_runs_preprocess_queries_on_live_nodes() {
    let (document, runtime, host) = page("<i></i>");
    runtime.register_query(
        "mark",
        QueryDescriptor::new(QueryFlags::empty()).with_preprocess(|invocation, element| {
            let value = invocation.arg(0);
            element.attr(invocation.runtime(), "data-mark", &value);
            Ok(ControlFlow::Break(()))
        }),
    );
    let i = first(&document, host, "i");
    runtime
        .execute_query(i, "mark", vec![Value::from("late")])
        .expect("execute");
    assert_eq!(document.get_attribute(i, "data-mark").as_deref(), Some("late"));
}

#[test]
fn unknown_queries_do_not_abort_the_pass() {
    let (document, runtime, host) = page(r#"<p data-query="nothing(1), text(word)"></p>"#);
    runtime
        .query(Value::object([("word", Value::from("kept"))]), Some(host))
        .expect("query");
    assert_eq!(document.text_content(first(&document, host, "p")), "kept");
}

#[test]
fn render_outside_each_is_an_error() {
    let runtime = Runtime::new(Document::new(), RuntimeConfig::default());
    let result = runtime.render_to_string(Value::Null, r#"<div data-query="render(true)"></div>"#);
    assert!(matches!(result, Err(BlocksError::RenderOutsideEach)));
}

#[test]
fn render_to_string_returns_the_content_only() {
    let runtime = Runtime::new(Document::new(), RuntimeConfig::default());
    let page = runtime
        .render_to_string(Value::object([("n", Value::from(3))]), "<p>{{n}}</p>")
        .expect("render");
    assert!(page.html.starts_with("<p"), "{}", page.html);
    assert!(page.html.ends_with("</p>"), "{}", page.html);
    assert!(page.html.contains(">3<"), "{}", page.html);
}

#[test]
fn reset_and_teardown_drop_records() {
    let (_document, runtime, host) = page("<p>{{a}}</p><p>{{b}}</p>");
    let a = Observable::new(1);
    let b = Observable::new(2);
    runtime
        .query(
            Value::object([("a", Value::from(a.clone())), ("b", Value::from(b.clone()))]),
            Some(host),
        )
        .expect("query");
    assert!(runtime.record_count() > 0);
    assert!(a.expression_subscription_count() > 0);

    runtime.teardown();
    assert_eq!(runtime.record_count(), 0);
    assert_eq!(a.expression_subscription_count(), 0);
    assert_eq!(b.expression_subscription_count(), 0);

    runtime.reset();
    assert_eq!(runtime.record_count(), 0);
}

#[test]
fn detached_records_are_collected() {
    let (document, runtime, host) = page(r#"<p data-query="text(a)"></p><span data-query="text(a)"></span>"#);
    let a = Observable::new("x");
    runtime
        .query(Value::object([("a", Value::from(a.clone()))]), Some(host))
        .expect("query");
    let before = runtime.record_count();
    let p = first(&document, host, "p");
    document.remove_child(host, p);

    runtime.collect_garbage();
    assert!(runtime.record_count() < before);
    // The surviving binding still works.
    a.set("y");
    assert_eq!(document.text_content(first(&document, host, "span")), "y");
}

#[test]
fn execute_query_and_data_item_use_the_bound_scope() {
    let (document, runtime, host) = page(r#"<ul data-query="each(items)"><li></li></ul>"#);
    let items = Observable::new(Value::array(vec![Value::from("a"), Value::from("b")]));
    runtime
        .query(Value::object([("items", Value::from(items))]), Some(host))
        .expect("query");
    let second = document.elements_by_tag_name(host, "li")[1];
    assert_eq!(runtime.data_item(second), Some(Value::from("b")));

    runtime
        .execute_query(second, "text", vec![Value::from("B")])
        .expect("execute");
    assert_eq!(document.text_content(second), "B");
}

#[test]
fn create_virtual_mirrors_live_markup() {
    let (document, runtime, host) = page(r#"<p class="a" data-query="text(x)">t</p><i></i>"#);
    let elements = runtime.create_virtual(document.first_child(host).expect("p"));
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].tag_name(), "p");
    assert_eq!(elements[0].attribute("class").as_deref(), Some("a"));
    assert_eq!(elements[0].query_text().as_deref(), Some("text(x)"));
    assert_eq!(elements[1].tag_name(), "i");
}

#[test]
fn input_events_write_back_without_queued_tasks() {
    let (document, runtime, host) = page(r#"<input data-query="val(v)">"#);
    let v = Observable::new("");
    runtime
        .query(Value::object([("v", Value::from(v.clone()))]), Some(host))
        .expect("query");
    assert_eq!(runtime.run_pending_tasks(), 0);
    let input = first(&document, host, "input");
    document.set_value(input, "typed");
    document.dispatch_event(&blocks_dom::DomEvent::new("input", input));
    assert_eq!(v.peek(), Value::from("typed"));
}
