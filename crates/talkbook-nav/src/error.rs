#![forbid(unsafe_code)]

//! Errors raised while maintaining a navigation index.

use talkbook_core::{CommandKind, NodeId};
use talkbook_runtime::HookError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The node does not belong to the indexed tree.
    #[error("{index}: unknown node {node}")]
    UnknownNode { index: &'static str, node: NodeId },

    /// A composite mixed edit kinds that are only handled one at a time.
    #[error("{index}: unexpected composite of {}", join_kinds(.kinds))]
    UnexpectedComposite {
        index: &'static str,
        kinds: Vec<CommandKind>,
    },
}

fn join_kinds(kinds: &[CommandKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<IndexError> for HookError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::UnexpectedComposite { index, kinds } => HookError::UnexpectedComposite {
                host: index.to_string(),
                kinds: join_kinds(&kinds),
            },
            IndexError::UnknownNode { index, node } => HookError::Failed {
                host: index.to_string(),
                message: format!("unknown node {node}"),
            },
        }
    }
}
