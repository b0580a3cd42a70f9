#![forbid(unsafe_code)]

//! Arena-backed document tree.
//!
//! Nodes live in a flat `Vec` and refer to each other by [`NodeId`]. A node
//! is *attached* when walking its parent chain reaches the root; a detached
//! node keeps its own subtree so a later re-insertion restores it intact.
//!
//! # Invariants
//!
//! 1. The root has no parent and never moves.
//! 2. A node appears in at most one parent's child list, and its `parent`
//!    field names exactly that parent.
//! 3. Parent chains are acyclic.
//!
//! Structural and content mutators are crate-private: after a tree has been
//! built with [`TreeBuilder`], only commands change it.

use std::cmp::Ordering;
use std::fmt;

use crate::error::TreeError;
use crate::node::{NodeId, NodePayload, TreeId};

struct NodeSlot {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    payload: NodePayload,
}

impl NodeSlot {
    fn new(payload: NodePayload) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            payload,
        }
    }
}

/// Document tree.
pub struct Tree {
    id: TreeId,
    slots: Vec<NodeSlot>,
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("id", &self.id)
            .field("nodes", &self.slots.len())
            .finish()
    }
}

impl Tree {
    /// Create a tree holding only a root node.
    #[must_use]
    pub fn new(root: NodePayload) -> Self {
        Self {
            id: TreeId::fresh(),
            slots: vec![NodeSlot::new(root)],
        }
    }

    #[must_use]
    pub fn id(&self) -> TreeId {
        self.id
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId::new(self.id, 0)
    }

    /// Number of nodes ever created, attached or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether `node` was minted by this tree.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        node.tree() == self.id && node.slot() < self.slots.len()
    }

    /// Create a new detached node. It becomes part of the document only
    /// once an insert command attaches it.
    pub fn create_node(&mut self, payload: NodePayload) -> NodeId {
        let id = NodeId::new(self.id, self.slots.len());
        self.slots.push(NodeSlot::new(payload));
        id
    }

    fn slot(&self, node: NodeId) -> Result<&NodeSlot, TreeError> {
        if node.tree() != self.id {
            return Err(TreeError::UnknownNode(node));
        }
        self.slots.get(node.slot()).ok_or(TreeError::UnknownNode(node))
    }

    fn slot_mut(&mut self, node: NodeId) -> Result<&mut NodeSlot, TreeError> {
        if node.tree() != self.id {
            return Err(TreeError::UnknownNode(node));
        }
        self.slots
            .get_mut(node.slot())
            .ok_or(TreeError::UnknownNode(node))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn payload(&self, node: NodeId) -> Option<&NodePayload> {
        self.slot(node).ok().map(|s| &s.payload)
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.slot(node).ok().and_then(|s| s.parent)
    }

    /// Children in order; empty for unknown nodes.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.slot(node).map_or(&[], |s| s.children.as_slice())
    }

    /// Position of `node` within its parent's children.
    #[must_use]
    pub fn child_index(&self, node: NodeId) -> Option<usize> {
        let parent = self.parent(node)?;
        self.children(parent).iter().position(|&c| c == node)
    }

    #[must_use]
    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.payload(node).and_then(NodePayload::own_text)
    }

    #[must_use]
    pub fn element_name(&self, node: NodeId) -> Option<&str> {
        self.payload(node).and_then(NodePayload::element_name)
    }

    #[must_use]
    pub fn is_marked(&self, node: NodeId) -> bool {
        self.payload(node).is_some_and(|p| p.marked)
    }

    /// Strict descendant test: a node is not its own descendant.
    #[must_use]
    pub fn is_descendant_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node);
        // Bounded so a corrupt (cyclic) arena cannot hang the walk.
        for _ in 0..self.slots.len() {
            let Some(current) = cursor else { break };
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Whether `node` is reachable from the root.
    #[must_use]
    pub fn is_attached(&self, node: NodeId) -> bool {
        if !self.contains(node) {
            return false;
        }
        node == self.root() || self.is_descendant_of(node, self.root())
    }

    /// `node` and all of its descendants in pre-order.
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.contains(node) {
            return out;
        }
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Concatenated own text of `node` and its descendants in pre-order.
    #[must_use]
    pub fn flattened_text(&self, node: NodeId) -> String {
        self.descendants(node)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    fn path_from_top(&self, node: NodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut cursor = node;
        for _ in 0..self.slots.len() {
            let Some(parent) = self.parent(cursor) else { break };
            path.push(self.child_index(cursor).unwrap_or(0));
            cursor = parent;
        }
        path.reverse();
        path
    }

    /// Pre-order document position comparison. Ancestors sort before their
    /// descendants.
    #[must_use]
    pub fn document_order(&self, a: NodeId, b: NodeId) -> Ordering {
        self.path_from_top(a).cmp(&self.path_from_top(b))
    }

    /// Structural snapshot of the whole document, including node identity.
    #[must_use]
    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshot_of(self.root())
    }

    /// Structural snapshot rooted at `node`.
    #[must_use]
    pub fn snapshot_of(&self, node: NodeId) -> NodeSnapshot {
        NodeSnapshot {
            id: node,
            payload: self.payload(node).cloned().unwrap_or_default(),
            children: self
                .children(node)
                .iter()
                .map(|&c| self.snapshot_of(c))
                .collect(),
        }
    }

    /// Verify parent/child consistency across the whole arena.
    pub fn check_invariants(&self) -> Result<(), TreeError> {
        if self.slots[0].parent.is_some() {
            return Err(TreeError::Corrupt("root has a parent".into()));
        }
        let mut seen_as_child = vec![false; self.slots.len()];
        for (index, slot) in self.slots.iter().enumerate() {
            let this = NodeId::new(self.id, index);
            for &child in &slot.children {
                let child_slot = self.slot(child)?;
                if std::mem::replace(&mut seen_as_child[child.slot()], true) {
                    return Err(TreeError::Corrupt(format!("{child} has two parents")));
                }
                if child_slot.parent != Some(this) {
                    return Err(TreeError::Corrupt(format!(
                        "{child} listed under {this} but points elsewhere"
                    )));
                }
            }
            if let Some(parent) = slot.parent {
                if !self.children(parent).contains(&this) {
                    return Err(TreeError::Corrupt(format!(
                        "{this} points at {parent} which does not list it"
                    )));
                }
                if self.is_descendant_of(parent, this) {
                    return Err(TreeError::Corrupt(format!("cycle through {this}")));
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Crate-private mutators (used by commands)
    // ========================================================================

    pub(crate) fn set_text(
        &mut self,
        node: NodeId,
        text: Option<String>,
    ) -> Result<Option<String>, TreeError> {
        let slot = self.slot_mut(node)?;
        Ok(std::mem::replace(&mut slot.payload.text, text))
    }

    pub(crate) fn set_marked(&mut self, node: NodeId, marked: bool) -> Result<bool, TreeError> {
        let slot = self.slot_mut(node)?;
        Ok(std::mem::replace(&mut slot.payload.marked, marked))
    }

    /// Validate that `node` could be attached at `parent[index]`.
    pub(crate) fn check_attach(
        &self,
        node: NodeId,
        parent: NodeId,
        index: usize,
    ) -> Result<(), TreeError> {
        let slot = self.slot(node)?;
        let parent_slot = self.slot(parent)?;
        if node == self.root() {
            return Err(TreeError::RootImmovable(node));
        }
        if slot.parent.is_some() {
            return Err(TreeError::AlreadyAttached(node));
        }
        if parent == node || self.is_descendant_of(parent, node) {
            return Err(TreeError::WouldCycle { node, parent });
        }
        let len = parent_slot.children.len();
        if index > len {
            return Err(TreeError::IndexOutOfBounds { index, len });
        }
        Ok(())
    }

    pub(crate) fn attach(
        &mut self,
        node: NodeId,
        parent: NodeId,
        index: usize,
    ) -> Result<(), TreeError> {
        self.check_attach(node, parent, index)?;
        self.slot_mut(parent)?.children.insert(index, node);
        self.slot_mut(node)?.parent = Some(parent);
        Ok(())
    }

    pub(crate) fn detach(
        &mut self,
        node: NodeId,
        parent: NodeId,
        index: usize,
    ) -> Result<(), TreeError> {
        if node == self.root() {
            return Err(TreeError::RootImmovable(node));
        }
        let parent_slot = self.slot_mut(parent)?;
        if parent_slot.children.get(index) != Some(&node) {
            return Err(TreeError::NotChildAt {
                node,
                parent,
                index,
            });
        }
        parent_slot.children.remove(index);
        self.slot_mut(node)?.parent = None;
        Ok(())
    }
}

/// Owned copy of a subtree, used to compare document states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub payload: NodePayload,
    pub children: Vec<NodeSnapshot>,
}

/// Builds the initial document before any command runs.
///
/// ```
/// use talkbook_core::{NodePayload, TreeBuilder};
///
/// let mut builder = TreeBuilder::new(NodePayload::element("body"));
/// let root = builder.root();
/// let h1 = builder.child(root, NodePayload::element("h1"));
/// builder.child(h1, NodePayload::text("Chapter 1"));
/// let tree = builder.build();
/// assert_eq!(tree.flattened_text(h1), "Chapter 1");
/// ```
pub struct TreeBuilder {
    tree: Tree,
}

impl TreeBuilder {
    #[must_use]
    pub fn new(root: NodePayload) -> Self {
        Self {
            tree: Tree::new(root),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Append a new child at the end of `parent`'s children.
    ///
    /// # Panics
    ///
    /// Panics if `parent` was not created by this builder.
    pub fn child(&mut self, parent: NodeId, payload: NodePayload) -> NodeId {
        assert!(
            self.tree.contains(parent),
            "parent {parent} does not belong to this builder"
        );
        let node = self.tree.create_node(payload);
        self.tree.slots[parent.slot()].children.push(node);
        self.tree.slots[node.slot()].parent = Some(parent);
        node
    }

    #[must_use]
    pub fn build(self) -> Tree {
        self.tree
    }
}
