#![forbid(unsafe_code)]

//! Node handles and per-node payloads.
//!
//! A [`NodeId`] is a plain copyable handle. It remembers the [`TreeId`] of
//! the arena that minted it so a handle from one document can never be used
//! to address a node in another.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identity of a single [`Tree`](crate::Tree) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(u32);

impl TreeId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for logging.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Handle to a node inside a [`Tree`](crate::Tree).
///
/// Identity is by handle: two nodes with equal payloads are still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    tree: TreeId,
    slot: usize,
}

impl NodeId {
    pub(crate) const fn new(tree: TreeId, slot: usize) -> Self {
        Self { tree, slot }
    }

    /// The tree this handle belongs to.
    #[must_use]
    pub const fn tree(self) -> TreeId {
        self.tree
    }

    pub(crate) const fn slot(self) -> usize {
        self.slot
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:n{}", self.tree, self.slot)
    }
}

/// Content of a node: an optional element name, attributes, own text and
/// the user "marked" flag.
///
/// Pure text nodes have no element name. The text of an element is the
/// concatenation of its own text and its descendants' (see
/// [`Tree::flattened_text`](crate::Tree::flattened_text)).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePayload {
    pub element: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub marked: bool,
}

impl NodePayload {
    /// An element with the given local name and nothing else.
    #[must_use]
    pub fn element(name: impl Into<String>) -> Self {
        Self {
            element: Some(name.into()),
            ..Self::default()
        }
    }

    /// A bare text node.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_marked(mut self, marked: bool) -> Self {
        self.marked = marked;
        self
    }

    /// Element local name, if this is an element.
    #[must_use]
    pub fn element_name(&self) -> Option<&str> {
        self.element.as_deref()
    }

    /// ASCII case-insensitive element name comparison.
    #[must_use]
    pub fn is_element(&self, name: &str) -> bool {
        self.element
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// The node's own text, not including descendants.
    #[must_use]
    pub fn own_text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}
