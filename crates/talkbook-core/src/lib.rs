#![forbid(unsafe_code)]

//! Document model for talkbook.
//!
//! This crate holds the pieces every other layer agrees on:
//!
//! - [`Tree`]: an arena of [`NodePayload`]s addressed by [`NodeId`].
//! - [`Command`]: a reversible edit (text change, mark toggle, structural
//!   insert/remove, or a composite of those).
//! - [`CommandFactory`]: validated construction of commands.
//!
//! Once a tree is built, commands are the only path that mutates it. The
//! undo/redo machinery that applies commands and notifies observers lives in
//! `talkbook-runtime`.

pub mod command;
pub mod error;
pub mod factory;
pub mod node;
pub mod tree;

pub use command::{
    ChangeText, Command, CommandKind, CommandMetadata, CommandOp, CommandSource, Composite,
    SetMarked, StructureEdit, StructureEditKind,
};
pub use error::{CommandError, CommandResult, TreeError};
pub use factory::CommandFactory;
pub use node::{NodeId, NodePayload, TreeId};
pub use tree::{NodeSnapshot, Tree, TreeBuilder};
