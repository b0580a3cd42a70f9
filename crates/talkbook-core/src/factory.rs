#![forbid(unsafe_code)]

//! Validated command construction.
//!
//! The factory is the only way to build leaf commands. It captures the
//! "before" state from the tree at creation time and rejects arguments that
//! could never apply cleanly, so a command that reaches the undo history is
//! always reversible.

use tracing::trace;

use crate::command::{Command, CommandMetadata, StructureEditKind};
use crate::error::{CommandError, CommandResult};
use crate::node::{NodeId, TreeId};
use crate::tree::Tree;

/// Creates commands bound to one document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFactory {
    tree: TreeId,
}

impl CommandFactory {
    #[must_use]
    pub fn new(tree: &Tree) -> Self {
        Self { tree: tree.id() }
    }

    #[must_use]
    pub fn tree_id(&self) -> TreeId {
        self.tree
    }

    fn check_node(&self, tree: &Tree, node: NodeId, role: &str) -> CommandResult {
        if tree.id() != self.tree {
            return Err(CommandError::InvalidArgument(format!(
                "factory is bound to {} but was given tree {}",
                self.tree,
                tree.id()
            )));
        }
        if !tree.contains(node) {
            return Err(CommandError::InvalidArgument(format!(
                "{role} {node} does not belong to tree {}",
                self.tree
            )));
        }
        Ok(())
    }

    /// Replace the own text of `node`.
    pub fn create_tree_node_change_text_command(
        &self,
        tree: &Tree,
        node: NodeId,
        new_text: impl Into<String>,
    ) -> CommandResult<Command> {
        self.check_node(tree, node, "node")?;
        let old_text = tree.text(node).map(str::to_owned);
        let new_text = new_text.into();
        trace!(%node, ?old_text, new_text = %new_text, "create change-text command");
        let metadata = CommandMetadata::new(
            "Change text",
            format!("Change the text of {node} to \"{new_text}\""),
        );
        Ok(Command::change_text(metadata, node, old_text, Some(new_text)))
    }

    /// Set or clear the marked flag of `node`.
    pub fn create_tree_node_set_is_marked_command(
        &self,
        tree: &Tree,
        node: NodeId,
        marked: bool,
    ) -> CommandResult<Command> {
        self.check_node(tree, node, "node")?;
        let old_marked = tree.is_marked(node);
        let (short, verb) = if marked {
            ("Mark", "Mark")
        } else {
            ("Unmark", "Remove the mark from")
        };
        let metadata = CommandMetadata::new(short, format!("{verb} {node}"));
        Ok(Command::set_marked(metadata, node, old_marked, marked))
    }

    /// Attach the detached `node` at `parent[index]`.
    pub fn create_tree_node_insert_command(
        &self,
        tree: &Tree,
        node: NodeId,
        parent: NodeId,
        index: usize,
    ) -> CommandResult<Command> {
        self.check_node(tree, node, "node")?;
        self.check_node(tree, parent, "parent")?;
        tree.check_attach(node, parent, index)
            .map_err(|err| CommandError::InvalidArgument(err.to_string()))?;
        let metadata = CommandMetadata::new(
            "Insert",
            format!("Insert {node} under {parent} at position {index}"),
        );
        Ok(Command::structure_edit(
            metadata,
            StructureEditKind::Insert,
            node,
            parent,
            index,
        ))
    }

    /// Detach `node` from its current position.
    pub fn create_tree_node_remove_command(
        &self,
        tree: &Tree,
        node: NodeId,
    ) -> CommandResult<Command> {
        self.check_node(tree, node, "node")?;
        if node == tree.root() {
            return Err(CommandError::InvalidArgument(format!(
                "{node} is the document root and cannot be removed"
            )));
        }
        let (Some(parent), Some(index)) = (tree.parent(node), tree.child_index(node)) else {
            return Err(CommandError::InvalidArgument(format!(
                "{node} is not attached to a parent"
            )));
        };
        let metadata = CommandMetadata::new(
            "Remove",
            format!("Remove {node} from {parent} at position {index}"),
        );
        Ok(Command::structure_edit(
            metadata,
            StructureEditKind::Remove,
            node,
            parent,
            index,
        ))
    }

    /// Group unapplied commands into one composite.
    pub fn create_composite_command(
        &self,
        short_description: impl Into<String>,
        long_description: impl Into<String>,
        children: Vec<Command>,
    ) -> CommandResult<Command> {
        if let Some(applied) = children.iter().find(|c| c.is_applied()) {
            return Err(CommandError::InvalidArgument(format!(
                "composite child '{}' is already applied",
                applied.short_description()
            )));
        }
        Ok(Command::composite(
            CommandMetadata::new(short_description, long_description),
            children,
        ))
    }
}
