#![forbid(unsafe_code)]

//! Reactive templating core for blocks.
//!
//! This crate provides:
//! - [`Observable`] values with dependency tracking, array mutation and
//!   derived views
//! - an expression engine for `{{ ... }}` interpolations and `data-query`
//!   parameters
//! - [`VirtualElement`] trees that render markup or sync live nodes
//! - [`Runtime`], the container that binds a model to a document, renders
//!   pages on a server and hands the result back to a client
//!
//! ```
//! use blocks_core::{Observable, Runtime, RuntimeConfig, Value};
//! use blocks_dom::Document;
//!
//! let document = Document::new();
//! document.set_inner_html(document.body(), "<p>Hello {{name}}</p>");
//! let runtime = Runtime::new(document.clone(), RuntimeConfig::default());
//!
//! let name = Observable::new("world");
//! runtime
//!     .query(Value::object([("name", Value::from(name.clone()))]), None)
//!     .unwrap();
//! name.set("blocks");
//! assert_eq!(document.text_content(document.body()), "Hello blocks");
//! ```

pub mod animation;
mod chunk;
pub mod config;
pub mod context;
mod debug;
pub mod elements;
pub mod equality;
pub mod error;
pub mod expression;
pub mod observable;
mod observer;
pub mod query;
pub mod runtime;
pub mod server;
pub mod value;
pub mod virtual_element;

pub use animation::HIDE_CLASS;
pub use config::{ChunkSizing, RuntimeConfig};
pub use context::Context;
pub use elements::{ElementId, parse_comment_id};
pub use equality::{equals, strict_equals};
pub use error::BlocksError;
pub use expression::{Expression, evaluate};
pub use observable::{EventKind, Observable, ObservableEvent, Operation, Subscription};
pub use observer::{depth as observer_depth, observe, untracked};
pub use query::{
    DomQuery, ElementCall, ElementMethod, QueryArg, QueryCall, QueryDescriptor, QueryFlags,
    QueryInvocation, parse_query,
};
pub use runtime::Runtime;
pub use server::{RenderedPage, ServerData};
pub use value::{Func, Value};
pub use virtual_element::{RenderMode, VirtualElement};
