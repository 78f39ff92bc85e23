#![no_main]

use arbitrary::Arbitrary;
use blocks_core::{Context, Observable, Value, evaluate};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    source: String,
    number: f64,
    text: String,
    flag: bool,
}

fuzz_target!(|input: Input| {
    let model = Value::object([
        ("n", Value::from(input.number)),
        ("s", Value::from(input.text.as_str())),
        ("b", Value::from(Observable::new(input.flag))),
        ("list", Value::array(vec![Value::from(1), Value::Null, Value::Undefined])),
    ]);
    let context = Context::root(model);
    // Errors are fine; panics are not.
    if let Ok(value) = evaluate(&input.source, &context) {
        let _ = value.to_display_string();
        let _ = value.to_json();
    }
});
