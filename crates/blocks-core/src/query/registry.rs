#![forbid(unsafe_code)]

//! The table of named queries a runtime resolves pipelines against.

use std::rc::Rc;

use ahash::AHashMap;

use super::builtins;
use super::{ElementCall, ElementMethod, QueryDescriptor, QueryFlags};

/// Event names that double as queries: `click(handler, data)`.
const EVENT_QUERIES: &[&str] = &[
    "click",
    "dblclick",
    "mousedown",
    "mouseup",
    "mouseover",
    "mousemove",
    "mouseout",
    "select",
    "change",
    "submit",
    "reset",
    "focus",
    "blur",
    "keydown",
    "keypress",
    "keyup",
];

pub(crate) struct QueryRegistry {
    queries: AHashMap<String, Rc<QueryDescriptor>>,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        let mut registry = Self {
            queries: AHashMap::new(),
        };
        registry.install_builtins();
        registry
    }
}

impl QueryRegistry {
    pub(crate) fn get(&self, name: &str) -> Option<Rc<QueryDescriptor>> {
        self.queries.get(name).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    /// Register `descriptor` under `name`, replacing any previous entry.
    pub(crate) fn register(&mut self, name: &str, descriptor: QueryDescriptor) {
        self.queries.insert(name.to_owned(), Rc::new(descriptor));
    }

    fn install_builtins(&mut self) {
        use ElementMethod::{Attr, Css, Html, Text};

        let raw = QueryFlags::PASS_RAW_VALUES;
        let named = |method, prefix: Option<&str>| ElementCall::Named {
            method,
            prefix: prefix.map(str::to_owned),
        };

        self.register("if", QueryDescriptor::conditional(true));
        self.register("ifnot", QueryDescriptor::conditional(false));

        self.register("template", builtins::template());
        self.register("define", builtins::define());
        self.register("with", builtins::with());
        self.register("each", builtins::each());
        self.register("options", builtins::options());
        self.register("render", builtins::render());
        self.register("updateOn", builtins::update_on());
        self.register("animate", builtins::animate());
        self.register("setClass", builtins::set_class());
        self.register("focused", builtins::focused());
        self.register("on", builtins::on());

        let calls = [
            ("html", QueryFlags::empty(), ElementCall::Direct(Html)),
            ("text", QueryFlags::empty(), ElementCall::Direct(Text)),
            ("visible", QueryFlags::empty(), named(Css, Some("display"))),
            ("attr", raw, ElementCall::Direct(Attr)),
            ("val", raw, named(Attr, Some("value"))),
            ("checked", raw, named(Attr, None)),
            ("disabled", raw, named(Attr, None)),
            ("css", QueryFlags::empty(), ElementCall::Direct(Css)),
            ("width", QueryFlags::empty(), named(Css, None)),
            ("height", QueryFlags::empty(), named(Css, None)),
        ];
        for (name, flags, call) in calls {
            self.register(name, QueryDescriptor::new(flags).with_call(call));
        }

        for &event in EVENT_QUERIES {
            self.register(event, builtins::event(event));
        }
    }
}
