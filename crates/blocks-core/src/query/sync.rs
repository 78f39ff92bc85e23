#![forbid(unsafe_code)]

//! Two-way form sync: user edits flow back into the bound observable.
//!
//! `attr('value', observable)` and `attr('checked', observable)` register
//! the element; binding installs one listener for the registered event (or
//! the `updateOn` override). `keydown` fires before the control's value
//! changes, so it compares on the next runtime task instead.

use blocks_dom::{DomEvent, NodeId};

use crate::runtime::Runtime;
use crate::value::Value;

/// Install the write-back listener for `event` on `node`.
pub(crate) fn listen(runtime: &Runtime, node: NodeId, event: &str) {
    let weak = runtime.downgrade();
    let deferred = event == "keydown";
    runtime
        .document()
        .add_event_listener(node, event, move |_event: &DomEvent| {
            let Some(runtime) = weak.upgrade() else {
                return;
            };
            if !deferred {
                write_back(&runtime, node);
                return;
            }
            let old = runtime.document().value(node);
            runtime.queue_task(move |runtime| {
                if runtime.document().value(node) != old {
                    write_back(runtime, node);
                }
            });
        });
    tracing::trace!(event, "form sync listener installed");
}

/// Push the control's current value into its observable.
pub(crate) fn write_back(runtime: &Runtime, node: NodeId) {
    let Some(observable) = runtime
        .record_of_node(node)
        .and_then(|record| record.borrow().value_observable.clone())
    else {
        return;
    };
    let document = runtime.document();
    let checkbox = document.get_attribute(node, "type").as_deref() == Some("checkbox");
    let multiple = document.tag_name(node) == "select" && document.has_attribute(node, "multiple");

    if checkbox {
        observable.set(document.checked(node));
    } else if multiple {
        let values = document
            .selected_options(node)
            .into_iter()
            .map(|option| Value::from(document.value(option)))
            .collect::<Vec<_>>();
        observable.set(Value::array(values));
    } else {
        // The observable's update would write the same value straight back.
        runtime.set_skip_execution(Some((node, "value")));
        observable.set(document.value(node));
        runtime.set_skip_execution(None);
    }
}
