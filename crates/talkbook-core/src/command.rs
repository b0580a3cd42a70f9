#![forbid(unsafe_code)]

//! Reversible edit commands.
//!
//! A [`Command`] pairs [`CommandMetadata`] with one [`CommandOp`]. The op
//! captures everything needed to apply and revert the change, so
//! `execute` followed by `unexecute` restores the prior tree exactly.
//!
//! # Invariants
//!
//! - A command is either applied or not; applying an applied command or
//!   reverting an unapplied one is [`CommandError::IllegalState`].
//! - Composite children apply in order and revert in reverse order.
//! - A composite whose child fails mid-way reverts the children it already
//!   applied before returning the error.
//!
//! # Failure Modes
//!
//! - **State drift**: the tree no longer holds the value captured at
//!   creation. Leaf commands check before touching the tree and report
//!   [`CommandError::StateDrift`] instead of corrupting history.

use std::fmt;

use crate::error::{CommandError, CommandResult};
use crate::node::NodeId;
use crate::tree::Tree;

/// Who triggered a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandSource {
    /// Direct user action.
    #[default]
    User,
    /// Application logic acting on the user's behalf.
    Programmatic,
    /// An external collaborator (script, plug-in).
    External,
}

/// Descriptive data carried by every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMetadata {
    /// Label shown in undo/redo menus.
    pub short_description: String,
    /// Longer description for tooltips and logs.
    pub long_description: String,
    pub source: CommandSource,
}

impl CommandMetadata {
    #[must_use]
    pub fn new(short: impl Into<String>, long: impl Into<String>) -> Self {
        Self {
            short_description: short.into(),
            long_description: long.into(),
            source: CommandSource::User,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: CommandSource) -> Self {
        self.source = source;
        self
    }
}

/// Discriminant of a [`CommandOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ChangeText,
    SetMarked,
    Insert,
    Remove,
    Composite,
}

impl CommandKind {
    /// Insert or remove.
    #[must_use]
    pub const fn is_structure_edit(self) -> bool {
        matches!(self, Self::Insert | Self::Remove)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChangeText => "change-text",
            Self::SetMarked => "set-marked",
            Self::Insert => "insert",
            Self::Remove => "remove",
            Self::Composite => "composite",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Leaf operations
// ============================================================================

/// Replace a node's own text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeText {
    node: NodeId,
    old_text: Option<String>,
    new_text: Option<String>,
}

impl ChangeText {
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[must_use]
    pub fn old_text(&self) -> Option<&str> {
        self.old_text.as_deref()
    }

    #[must_use]
    pub fn new_text(&self) -> Option<&str> {
        self.new_text.as_deref()
    }

    fn swap(&self, tree: &mut Tree, from: &Option<String>, to: &Option<String>) -> CommandResult {
        if !tree.contains(self.node) {
            return Err(crate::TreeError::UnknownNode(self.node).into());
        }
        let current = tree.text(self.node);
        if current != from.as_deref() {
            return Err(CommandError::StateDrift {
                node: self.node,
                expected: format!("{from:?}"),
                actual: format!("{current:?}"),
            });
        }
        tree.set_text(self.node, to.clone())?;
        Ok(())
    }
}

/// Set or clear a node's marked flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetMarked {
    node: NodeId,
    old_marked: bool,
    new_marked: bool,
}

impl SetMarked {
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[must_use]
    pub fn old_marked(&self) -> bool {
        self.old_marked
    }

    #[must_use]
    pub fn new_marked(&self) -> bool {
        self.new_marked
    }

    fn swap(&self, tree: &mut Tree, from: bool, to: bool) -> CommandResult {
        let payload = tree
            .payload(self.node)
            .ok_or(crate::TreeError::UnknownNode(self.node))?;
        if payload.marked != from {
            return Err(CommandError::StateDrift {
                node: self.node,
                expected: from.to_string(),
                actual: payload.marked.to_string(),
            });
        }
        tree.set_marked(self.node, to)?;
        Ok(())
    }
}

/// Direction of a [`StructureEdit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureEditKind {
    Insert,
    Remove,
}

/// Attach or detach a node (with its subtree) at `parent[index]`.
///
/// The parent and index are fixed when the command is created, so undoing a
/// removal puts the node back exactly where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureEdit {
    kind: StructureEditKind,
    node: NodeId,
    parent: NodeId,
    index: usize,
}

impl StructureEdit {
    #[must_use]
    pub fn kind(&self) -> StructureEditKind {
        self.kind
    }

    #[must_use]
    pub fn is_insert(&self) -> bool {
        self.kind == StructureEditKind::Insert
    }

    /// The node being inserted or removed.
    #[must_use]
    pub fn tree_node(&self) -> NodeId {
        self.node
    }

    #[must_use]
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    fn attach(&self, tree: &mut Tree) -> CommandResult {
        tree.attach(self.node, self.parent, self.index)?;
        Ok(())
    }

    fn detach(&self, tree: &mut Tree) -> CommandResult {
        tree.detach(self.node, self.parent, self.index)?;
        Ok(())
    }
}

/// Ordered group of commands applied and reverted as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composite {
    children: Vec<Command>,
}

impl Composite {
    #[must_use]
    pub fn children(&self) -> &[Command] {
        &self.children
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn apply(&mut self, tree: &mut Tree) -> CommandResult {
        for i in 0..self.children.len() {
            if let Err(err) = self.children[i].execute(tree) {
                for j in (0..i).rev() {
                    if let Err(rollback) = self.children[j].unexecute(tree) {
                        tracing::error!(
                            child = j,
                            error = %rollback,
                            "composite rollback failed after apply error"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn unapply(&mut self, tree: &mut Tree) -> CommandResult {
        for i in (0..self.children.len()).rev() {
            if let Err(err) = self.children[i].unexecute(tree) {
                for j in i + 1..self.children.len() {
                    if let Err(rollback) = self.children[j].execute(tree) {
                        tracing::error!(
                            child = j,
                            error = %rollback,
                            "composite rollback failed after revert error"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

/// The edit a [`Command`] performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOp {
    ChangeText(ChangeText),
    SetMarked(SetMarked),
    StructureEdit(StructureEdit),
    Composite(Composite),
}

// ============================================================================
// Command
// ============================================================================

/// A reversible edit with metadata and an applied flag.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    metadata: CommandMetadata,
    op: CommandOp,
    applied: bool,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind())
            .field("description", &self.metadata.short_description)
            .field("applied", &self.applied)
            .field("op", &self.op)
            .finish()
    }
}

impl Command {
    fn unapplied(metadata: CommandMetadata, op: CommandOp) -> Self {
        Self {
            metadata,
            op,
            applied: false,
        }
    }

    pub(crate) fn change_text(
        metadata: CommandMetadata,
        node: NodeId,
        old_text: Option<String>,
        new_text: Option<String>,
    ) -> Self {
        Self::unapplied(
            metadata,
            CommandOp::ChangeText(ChangeText {
                node,
                old_text,
                new_text,
            }),
        )
    }

    pub(crate) fn set_marked(
        metadata: CommandMetadata,
        node: NodeId,
        old_marked: bool,
        new_marked: bool,
    ) -> Self {
        Self::unapplied(
            metadata,
            CommandOp::SetMarked(SetMarked {
                node,
                old_marked,
                new_marked,
            }),
        )
    }

    pub(crate) fn structure_edit(
        metadata: CommandMetadata,
        kind: StructureEditKind,
        node: NodeId,
        parent: NodeId,
        index: usize,
    ) -> Self {
        Self::unapplied(
            metadata,
            CommandOp::StructureEdit(StructureEdit {
                kind,
                node,
                parent,
                index,
            }),
        )
    }

    pub(crate) fn composite(metadata: CommandMetadata, children: Vec<Command>) -> Self {
        Self::unapplied(metadata, CommandOp::Composite(Composite { children }))
    }

    /// Wrap commands that were applied one by one inside a transaction into
    /// a single applied composite.
    pub fn from_committed_transaction(
        metadata: CommandMetadata,
        children: Vec<Command>,
    ) -> CommandResult<Self> {
        if let Some(pending) = children.iter().find(|c| !c.applied) {
            return Err(CommandError::IllegalState(format!(
                "committed transaction contains unapplied command '{}'",
                pending.short_description()
            )));
        }
        let mut cmd = Self::composite(metadata, children);
        cmd.applied = true;
        Ok(cmd)
    }

    /// Wrap commands that a cancelled transaction already reverted.
    pub fn from_cancelled_transaction(
        metadata: CommandMetadata,
        children: Vec<Command>,
    ) -> CommandResult<Self> {
        if let Some(live) = children.iter().find(|c| c.applied) {
            return Err(CommandError::IllegalState(format!(
                "cancelled transaction contains applied command '{}'",
                live.short_description()
            )));
        }
        Ok(Self::composite(metadata, children))
    }

    /// Apply the edit to `tree`.
    pub fn execute(&mut self, tree: &mut Tree) -> CommandResult {
        if self.applied {
            return Err(CommandError::IllegalState(format!(
                "'{}' is already applied",
                self.metadata.short_description
            )));
        }
        match &mut self.op {
            CommandOp::ChangeText(op) => op.swap(tree, &op.old_text, &op.new_text)?,
            CommandOp::SetMarked(op) => op.swap(tree, op.old_marked, op.new_marked)?,
            CommandOp::StructureEdit(op) => match op.kind {
                StructureEditKind::Insert => op.attach(tree)?,
                StructureEditKind::Remove => op.detach(tree)?,
            },
            CommandOp::Composite(op) => op.apply(tree)?,
        }
        self.applied = true;
        Ok(())
    }

    /// Revert a previously applied edit.
    pub fn unexecute(&mut self, tree: &mut Tree) -> CommandResult {
        if !self.applied {
            return Err(CommandError::IllegalState(format!(
                "'{}' is not applied",
                self.metadata.short_description
            )));
        }
        match &mut self.op {
            CommandOp::ChangeText(op) => op.swap(tree, &op.new_text, &op.old_text)?,
            CommandOp::SetMarked(op) => op.swap(tree, op.new_marked, op.old_marked)?,
            CommandOp::StructureEdit(op) => match op.kind {
                StructureEditKind::Insert => op.detach(tree)?,
                StructureEditKind::Remove => op.attach(tree)?,
            },
            CommandOp::Composite(op) => op.unapply(tree)?,
        }
        self.applied = false;
        Ok(())
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    #[must_use]
    pub fn op(&self) -> &CommandOp {
        &self.op
    }

    #[must_use]
    pub fn metadata(&self) -> &CommandMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn short_description(&self) -> &str {
        &self.metadata.short_description
    }

    #[must_use]
    pub fn long_description(&self) -> &str {
        &self.metadata.long_description
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match &self.op {
            CommandOp::ChangeText(_) => CommandKind::ChangeText,
            CommandOp::SetMarked(_) => CommandKind::SetMarked,
            CommandOp::StructureEdit(op) => match op.kind {
                StructureEditKind::Insert => CommandKind::Insert,
                StructureEditKind::Remove => CommandKind::Remove,
            },
            CommandOp::Composite(_) => CommandKind::Composite,
        }
    }

    /// The node a leaf command targets. `None` for composites.
    #[must_use]
    pub fn tree_node(&self) -> Option<NodeId> {
        match &self.op {
            CommandOp::ChangeText(op) => Some(op.node),
            CommandOp::SetMarked(op) => Some(op.node),
            CommandOp::StructureEdit(op) => Some(op.node),
            CommandOp::Composite(_) => None,
        }
    }

    #[must_use]
    pub fn as_composite(&self) -> Option<&Composite> {
        match &self.op {
            CommandOp::Composite(c) => Some(c),
            _ => None,
        }
    }

    /// Kinds of all leaves, flattening nested composites, in apply order.
    #[must_use]
    pub fn leaf_kinds(&self) -> Vec<CommandKind> {
        let mut out = Vec::new();
        self.visit_leaves(&mut |c| out.push(c.kind()));
        out
    }

    /// Target nodes of all leaves, in apply order.
    #[must_use]
    pub fn affected_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.visit_leaves(&mut |c| out.extend(c.tree_node()));
        out
    }

    fn visit_leaves(&self, f: &mut impl FnMut(&Command)) {
        match &self.op {
            CommandOp::Composite(c) => c.children.iter().for_each(|child| child.visit_leaves(f)),
            _ => f(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::CommandFactory;
    use crate::node::NodePayload;
    use crate::tree::TreeBuilder;

    fn fixture() -> (Tree, CommandFactory, NodeId, NodeId) {
        let mut b = TreeBuilder::new(NodePayload::element("body"));
        let root = b.root();
        let p = b.child(root, NodePayload::element("p"));
        let text = b.child(p, NodePayload::text("hello"));
        let tree = b.build();
        let factory = CommandFactory::new(&tree);
        (tree, factory, p, text)
    }

    #[test]
    fn change_text_round_trip() {
        let (mut tree, factory, _, text) = fixture();
        let before = tree.snapshot();
        let mut cmd = factory
            .create_tree_node_change_text_command(&tree, text, "bye")
            .unwrap();
        cmd.execute(&mut tree).unwrap();
        assert_eq!(tree.text(text), Some("bye"));
        cmd.unexecute(&mut tree).unwrap();
        assert_eq!(tree.snapshot(), before);
    }

    #[test]
    fn double_execute_is_illegal() {
        let (mut tree, factory, p, _) = fixture();
        let mut cmd = factory
            .create_tree_node_set_is_marked_command(&tree, p, true)
            .unwrap();
        cmd.execute(&mut tree).unwrap();
        assert!(matches!(
            cmd.execute(&mut tree),
            Err(CommandError::IllegalState(_))
        ));
        cmd.unexecute(&mut tree).unwrap();
        assert!(matches!(
            cmd.unexecute(&mut tree),
            Err(CommandError::IllegalState(_))
        ));
    }

    #[test]
    fn drift_is_detected() {
        let (mut tree, factory, _, text) = fixture();
        let mut first = factory
            .create_tree_node_change_text_command(&tree, text, "one")
            .unwrap();
        let mut stale = factory
            .create_tree_node_change_text_command(&tree, text, "two")
            .unwrap();
        first.execute(&mut tree).unwrap();
        let err = stale.execute(&mut tree).unwrap_err();
        assert!(matches!(err, CommandError::StateDrift { .. }));
        assert!(!stale.is_applied());
        assert_eq!(tree.text(text), Some("one"));
    }

    #[test]
    fn composite_rolls_back_on_failure() {
        let (mut tree, factory, p, text) = fixture();
        let before = tree.snapshot();
        let mark = factory
            .create_tree_node_set_is_marked_command(&tree, p, true)
            .unwrap();
        let edit = factory
            .create_tree_node_change_text_command(&tree, text, "x")
            .unwrap();
        // Same text edit twice: the second one drifts.
        let dup = edit.clone();
        let mut composite = factory
            .create_composite_command("Batch", "Batch edit", vec![mark, edit, dup])
            .unwrap();
        assert!(composite.execute(&mut tree).is_err());
        assert!(!composite.is_applied());
        assert_eq!(tree.snapshot(), before);
    }

    #[test]
    fn composite_round_trip_reports_leaves() {
        let (mut tree, factory, _, text) = fixture();
        let first = factory
            .create_tree_node_change_text_command(&tree, text, "world")
            .unwrap();
        let mut composite = factory
            .create_composite_command("Two", "Two", vec![first])
            .unwrap();
        composite.execute(&mut tree).unwrap();
        composite.unexecute(&mut tree).unwrap();
        assert_eq!(tree.text(text), Some("hello"));
        assert_eq!(composite.leaf_kinds(), vec![CommandKind::ChangeText]);
        assert_eq!(composite.affected_nodes(), vec![text]);
        assert_eq!(composite.tree_node(), None);
    }

    #[test]
    fn structure_edit_kinds() {
        let (mut tree, factory, p, _) = fixture();
        let remove = factory.create_tree_node_remove_command(&tree, p).unwrap();
        assert_eq!(remove.kind(), CommandKind::Remove);
        assert!(remove.kind().is_structure_edit());
        let fresh = tree.create_node(NodePayload::element("hr"));
        let insert = factory
            .create_tree_node_insert_command(&tree, fresh, tree.root(), 0)
            .unwrap();
        assert_eq!(insert.kind(), CommandKind::Insert);
        assert_eq!(insert.tree_node(), Some(fresh));
    }

    #[test]
    fn transaction_wrappers_check_applied_state() {
        let (mut tree, factory, p, _) = fixture();
        let mut cmd = factory
            .create_tree_node_set_is_marked_command(&tree, p, true)
            .unwrap();
        let meta = CommandMetadata::new("Tx", "Transaction");
        assert!(Command::from_committed_transaction(meta.clone(), vec![cmd.clone()]).is_err());
        assert!(Command::from_cancelled_transaction(meta.clone(), vec![cmd.clone()]).is_ok());
        cmd.execute(&mut tree).unwrap();
        let committed = Command::from_committed_transaction(meta.clone(), vec![cmd.clone()]).unwrap();
        assert!(committed.is_applied());
        assert!(Command::from_cancelled_transaction(meta, vec![cmd]).is_err());
    }

    #[test]
    fn metadata_source_defaults_to_user() {
        let meta = CommandMetadata::new("a", "b");
        assert_eq!(meta.source, CommandSource::User);
        let meta = meta.with_source(CommandSource::External);
        assert_eq!(meta.source, CommandSource::External);
    }

    #[test]
    fn kind_display() {
        assert_eq!(CommandKind::SetMarked.to_string(), "set-marked");
        assert!(!CommandKind::Composite.is_structure_edit());
    }
}
