#![forbid(unsafe_code)]

//! Node storage for the document arena.

use indexmap::IndexMap;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::event::{Listener, ListenerId};

new_key_type! {
    /// Generational handle to a node owned by a [`Document`](crate::Document).
    pub struct NodeId;
}

/// The DOM node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Comment,
    Fragment,
}

impl NodeKind {
    /// The numeric `nodeType` a browser reports for this kind.
    #[must_use]
    pub const fn node_type(self) -> u8 {
        match self {
            Self::Element => 1,
            Self::Text => 3,
            Self::Comment => 8,
            Self::Document => 9,
            Self::Fragment => 11,
        }
    }
}

pub(crate) struct NodeData {
    pub(crate) kind: NodeKind,
    /// Lowercase tag name; empty for non-elements.
    pub(crate) tag: String,
    pub(crate) attributes: IndexMap<String, String>,
    /// Inline style declarations keyed by kebab-case property name.
    pub(crate) style: IndexMap<String, String>,
    /// Character data of text and comment nodes.
    pub(crate) data: String,
    pub(crate) value: Option<String>,
    pub(crate) checked: Option<bool>,
    pub(crate) selected: Option<bool>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) listeners: SmallVec<[(ListenerId, String, Listener); 2]>,
}

impl NodeData {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            tag: String::new(),
            attributes: IndexMap::new(),
            style: IndexMap::new(),
            data: String::new(),
            value: None,
            checked: None,
            selected: None,
            parent: None,
            children: Vec::new(),
            listeners: SmallVec::new(),
        }
    }

    pub(crate) fn element(tag: &str) -> Self {
        let mut node = Self::new(NodeKind::Element);
        node.tag = tag.to_ascii_lowercase();
        node
    }

    pub(crate) fn character_data(kind: NodeKind, data: &str) -> Self {
        let mut node = Self::new(kind);
        node.data = data.to_owned();
        node
    }
}
