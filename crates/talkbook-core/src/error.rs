#![forbid(unsafe_code)]

//! Error types for tree mutation and command execution.

use thiserror::Error;

use crate::node::NodeId;

/// A structural or lookup failure inside a [`Tree`](crate::Tree).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The handle was minted by a different tree or is out of range.
    #[error("node {0} does not belong to this tree")]
    UnknownNode(NodeId),

    /// Insertion target already has a parent.
    #[error("node {0} is already attached to a parent")]
    AlreadyAttached(NodeId),

    /// The root node never moves.
    #[error("node {0} is the document root and cannot be moved")]
    RootImmovable(NodeId),

    /// Attaching `node` under `parent` would make it its own ancestor.
    #[error("inserting {node} under {parent} would create a cycle")]
    WouldCycle { node: NodeId, parent: NodeId },

    /// Child index outside `0..=len`.
    #[error("child index {index} out of bounds (child count {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Detach expected `node` at `parent[index]` but found something else.
    #[error("node {node} is not the child of {parent} at index {index}")]
    NotChildAt {
        node: NodeId,
        parent: NodeId,
        index: usize,
    },

    /// Parent/child links disagree.
    #[error("tree invariant violated: {0}")]
    Corrupt(String),
}

/// Failure while creating, applying or reverting a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Rejected at creation time by the factory.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Command applied twice, reverted while not applied, or similar.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The tree no longer holds the value the command captured.
    #[error("state drift on {node}: expected {expected}, found {actual}")]
    StateDrift {
        node: NodeId,
        expected: String,
        actual: String,
    },
}

/// Result alias for command operations.
pub type CommandResult<T = ()> = Result<T, CommandError>;
