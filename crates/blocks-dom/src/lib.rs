#![forbid(unsafe_code)]

//! Headless DOM for the blocks templating core.
//!
//! The core reconciles a virtual element tree against "live" nodes. In a
//! browser those are real DOM nodes; here they live in an arena owned by a
//! [`Document`] and are addressed by generational [`NodeId`] handles, so a
//! stale handle to a removed-and-freed node can never alias a new one.
//!
//! The surface is deliberately the subset of the DOM the core touches:
//! tree mutation (`append_child`, `insert_before`, `remove_child`),
//! attributes and inline style, form properties (`value`, `checked`,
//! `selected`), `innerHTML`/`outerHTML` through a small HTML fragment parser,
//! connectivity checks, focus, and bubbling event dispatch.
//!
//! # Invariants
//!
//! 1. A node has at most one parent and appears exactly once in that
//!    parent's child list.
//! 2. Inserting a fragment moves its children and leaves the fragment empty.
//! 3. Event listeners are cloned out of the arena before they run, so a
//!    listener may freely mutate the document (including removing itself).
//! 4. Tag and attribute names are stored lowercase.

pub mod document;
pub mod event;
pub mod html;
pub mod node;

pub use document::Document;
pub use event::{DomEvent, Listener, ListenerId};
pub use html::{escape_attribute, escape_text, is_void_element};
pub use node::{NodeId, NodeKind};
