#![forbid(unsafe_code)]

//! Property tests: observable arrays against a plain vector model, and
//! bound lists against the same model.

use blocks_core::{Observable, Value, parse_query};
use blocks_harness::strategies::{ArrayOp, array_ops, query_text};
use blocks_harness::{Page, model};
use proptest::prelude::*;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn observable_of(items: &[i32]) -> Observable {
    Observable::new(Value::array(items.iter().copied().map(Value::from).collect()))
}

fn numbers(observable: &Observable) -> Vec<i32> {
    observable
        .to_vec()
        .iter()
        .map(|value| value.to_number() as i32)
        .collect()
}

/// Apply `op` to an observable array with the same index reduction the
/// model uses.
fn apply(observable: &Observable, op: &ArrayOp) {
    let len = observable.len();
    match op {
        ArrayOp::Push(v) => {
            observable.push(*v);
        }
        ArrayOp::Insert(at, v) => observable.add(*v, Some(at % (len + 1))),
        ArrayOp::RemoveAt(at) if len > 0 => {
            observable.remove_at(at % len);
        }
        ArrayOp::Swap(a, b) if len > 0 => observable.swap(a % len, b % len),
        ArrayOp::Move(from, to) if len > 0 => observable.move_item(from % len, to % len),
        ArrayOp::Reverse => observable.reverse(),
        ArrayOp::Pop => {
            observable.pop();
        }
        ArrayOp::Shift if len > 0 => {
            observable.shift();
        }
        ArrayOp::Splice(at, count, items) => {
            let at = at % (len + 1);
            let count = (*count).min(len - at);
            let at = isize::try_from(at).unwrap_or(isize::MAX);
            observable.splice(at, count, items.iter().copied().map(Value::from).collect());
        }
        _ => {}
    }
}

proptest! {
    #[test]
    fn array_operations_match_a_vector(start in prop::collection::vec(any::<i32>(), 0..8), ops in array_ops(24)) {
        let observable = observable_of(&start);
        let mut expected = start.clone();
        for op in &ops {
            op.apply(&mut expected);
            apply(&observable, op);
            prop_assert_eq!(numbers(&observable), expected.clone(), "after {:?}", op);
        }
    }

    #[test]
    fn query_parsing_is_deterministic(text in query_text()) {
        let first = parse_query(&text);
        prop_assert_eq!(&first, &parse_query(&text));
        prop_assert!(!first.is_empty());
    }
}

#[test]
fn bound_list_follows_reordering() {
    init_logging();
    let page = Page::new(r#"<ul data-query="each(items)"><li>{{$this}}</li></ul>"#);
    let start = [1, 2, 3, 4, 5];
    let items = observable_of(&start);
    page.bind(model([("items", Value::from(items.clone()))])).expect("bind");

    let mut expected = start.to_vec();
    let ops = [
        ArrayOp::Swap(0, 4),
        ArrayOp::Move(1, 3),
        ArrayOp::Reverse,
        ArrayOp::Splice(1, 2, vec![9, 8]),
        ArrayOp::RemoveAt(0),
        ArrayOp::Insert(2, 7),
    ];
    for op in &ops {
        op.apply(&mut expected);
        apply(&items, op);
        let shown: Vec<String> = expected.iter().map(ToString::to_string).collect();
        assert_eq!(page.texts("li"), shown, "after {op:?}");
    }
}
