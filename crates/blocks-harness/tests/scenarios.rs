#![forbid(unsafe_code)]

//! Integration tests: end-to-end binding scenarios against a headless page.

use std::cell::Cell;
use std::rc::Rc;

use blocks_core::{Observable, Value};
use blocks_harness::{Page, assert_markup, model};

fn strings(items: &[&str]) -> Observable {
    Observable::new(Value::array(items.iter().map(|s| Value::from(*s)).collect()))
}

// ============================================================================
// Interpolation
// ============================================================================

#[test]
fn interpolation_follows_the_observable() {
    let page = Page::new("<p>Hello {{name}}!</p>");
    let name = Observable::new("Ann");
    page.bind(model([("name", Value::from(name.clone()))])).expect("bind");
    assert_eq!(page.text(), "Hello Ann!");

    name.set("Bob");
    assert_eq!(page.text(), "Hello Bob!");
    name.set("Christopher");
    assert_eq!(page.text(), "Hello Christopher!");
}

#[test]
fn attribute_templates_rerender_whole_values() {
    let page = Page::new(r#"<a title="to {{who}} now">x</a>"#);
    let who = Observable::new("you");
    page.bind(model([("who", Value::from(who.clone()))])).expect("bind");
    let a = page.first("a").expect("a");
    assert_eq!(page.document().get_attribute(a, "title").as_deref(), Some("to you now"));
    who.set("them");
    assert_eq!(page.document().get_attribute(a, "title").as_deref(), Some("to them now"));
}

#[test]
fn plain_values_render_without_markers() {
    let page = Page::new("<b>{{a}} + {{b}}</b>");
    page.bind(model([("a", Value::from(1)), ("b", Value::from(2))])).expect("bind");
    assert_markup!(page.html(), "<b>1 + 2</b>");
}

// ============================================================================
// each
// ============================================================================

#[test]
fn each_expands_an_item_per_element() {
    let page = Page::new(r#"<ul data-query="each(items)"><li>{{$this}}</li></ul>"#);
    let items = strings(&["a", "b", "c"]);
    page.bind(model([("items", Value::from(items.clone()))])).expect("bind");
    assert_eq!(page.texts("li"), vec!["a", "b", "c"]);
}

#[test]
fn remove_at_keeps_the_surviving_nodes() {
    let page = Page::new(r#"<ul data-query="each(items)"><li>{{$this}}</li></ul>"#);
    let items = strings(&["a", "b", "c"]);
    page.bind(model([("items", Value::from(items.clone()))])).expect("bind");
    let before = page.all("li");

    items.remove_at(1);
    let after = page.all("li");
    assert_eq!(page.texts("li"), vec!["a", "c"]);
    assert_eq!(after, vec![before[0], before[2]]);
}

#[test]
fn push_and_unshift_insert_at_the_ends() {
    let page = Page::new(r#"<ul data-query="each(items)"><li>{{$this}}</li></ul>"#);
    let items = strings(&["b"]);
    page.bind(model([("items", Value::from(items.clone()))])).expect("bind");
    let b = page.first("li").expect("li");

    items.push("c");
    items.unshift(vec![Value::from("a")]);
    assert_eq!(page.texts("li"), vec!["a", "b", "c"]);
    assert_eq!(page.all("li")[1], b);
}

#[test]
fn each_inside_a_comment_range() {
    let page = Page::new("<ul><li>first</li><!-- blocks each(items) --><li>{{$this}}</li><!-- /blocks --></ul>");
    let items = strings(&["x", "y"]);
    page.bind(model([("items", Value::from(items.clone()))])).expect("bind");
    assert_eq!(page.texts("li"), vec!["first", "x", "y"]);

    items.remove_at(0);
    assert_eq!(page.texts("li"), vec!["first", "y"]);
}

#[test]
fn filtered_views_track_their_origin() {
    let page = Page::new(r#"<ul data-query="each(evens.view)"><li>{{$this}}</li></ul>"#);
    let numbers = Observable::new(Value::array((1..=4_i32).map(Value::from).collect()));
    let evens = numbers.filter(|value, _| value.to_number() % 2.0 == 0.0);
    page.bind(model([("evens", Value::from(evens.clone()))])).expect("bind");
    assert_eq!(page.texts("li"), vec!["2", "4"]);
    let before = page.all("li");

    numbers.push(6);
    assert_eq!(page.texts("li"), vec!["2", "4", "6"]);
    assert_eq!(page.all("li")[..2], before[..], "kept items keep their nodes");
    numbers.push(7);
    assert_eq!(page.texts("li"), vec!["2", "4", "6"]);
}

// ============================================================================
// Form sync
// ============================================================================

#[test]
fn text_inputs_write_back() {
    let page = Page::new(r#"<input data-query="val(name)"><span>{{name}}</span>"#);
    let name = Observable::new("Ann");
    page.bind(model([("name", Value::from(name.clone()))])).expect("bind");
    let input = page.first("input").expect("input");
    assert_eq!(page.document().value(input), "Ann");

    page.type_into(input, "Bob");
    assert_eq!(name.peek(), Value::from("Bob"));
    assert_eq!(page.texts("span"), vec!["Bob"]);

    name.set("Cy");
    assert_eq!(page.document().value(input), "Cy");
}

#[test]
fn checkboxes_write_bools() {
    let page = Page::new(r#"<input type="checkbox" data-query="checked(done)">"#);
    let done = Observable::new(false);
    page.bind(model([("done", Value::from(done.clone()))])).expect("bind");
    let input = page.first("input").expect("input");

    page.toggle(input);
    assert_eq!(done.peek(), Value::from(true));
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn click_queries_call_the_model() {
    let page = Page::new(r#"<button data-query="click(bump, 5)">+</button>"#);
    let total = Rc::new(Cell::new(0.0));
    let sink = Rc::clone(&total);
    let bump = Value::function(move |_, args| {
        sink.set(sink.get() + args.get(1).map_or(0.0, Value::to_number));
        Ok(Value::Undefined)
    });
    page.bind(model([("bump", bump)])).expect("bind");
    let button = page.first("button").expect("button");
    page.click(button);
    page.click(button);
    assert_eq!(total.get(), 10.0);
}

// ============================================================================
// Server round-trip
// ============================================================================

#[test]
fn server_markup_binds_on_the_client() {
    let markup = r#"<p>Hi {{name}}</p><ul data-query="each(items)"><li>{{$this}}</li></ul>"#;
    let rendered = Page::render_on_server(
        model([("name", Value::from(Observable::new("Ann"))), ("items", Value::from(strings(&["a", "b"])))]),
        markup,
    )
    .expect("server render");
    assert!(!rendered.server_data.is_empty());
    assert!(rendered.html.contains("Hi "), "{}", rendered.html);

    let client = Page::from_server(&rendered);
    let before = client.all("li");
    let name = Observable::new("Ann");
    let items = strings(&["a", "b"]);
    client
        .bind(model([("name", Value::from(name.clone())), ("items", Value::from(items.clone()))]))
        .expect("bind");
    assert_eq!(client.all("li"), before, "server nodes are kept");

    name.set("Bob");
    assert_eq!(client.texts("p"), vec!["Hi Bob"]);
    items.push("c");
    assert_eq!(client.texts("li"), vec!["a", "b", "c"]);
}

#[test]
fn server_data_survives_json() {
    let rendered = Page::render_on_server(
        model([("n", Value::from(Observable::new(1)))]),
        r#"<b title="{{n}}">{{n}}</b>"#,
    )
    .expect("server render");
    let json = rendered.server_data.to_json_string();
    let back = blocks_core::ServerData::from_json_str(&json).expect("parse");
    assert_eq!(back, rendered.server_data);
}
