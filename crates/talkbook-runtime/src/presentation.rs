#![forbid(unsafe_code)]

//! An open document: tree, command factory and undo/redo manager together.
//!
//! [`Presentation`] is the usual entry point for editing code. It forwards
//! to the [`UndoRedoManager`] with its own tree, so callers never juggle the
//! two separately. It holds `Rc`s and is `!Send`; to use it from several
//! threads, build it inside a [`DocumentExecutor`](crate::DocumentExecutor).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use talkbook_core::{Command, CommandFactory, NodeId, NodePayload, Tree};
use tracing::warn;

use crate::config::RuntimeConfig;
use crate::undo::{HookHost, Hooker, TransactionInfo, UndoRedoError, UndoRedoManager};

/// An open document: its tree, command factory and undo/redo history.
pub struct Presentation {
    tree: Tree,
    factory: CommandFactory,
    undo_redo: UndoRedoManager,
    config: RuntimeConfig,
}

impl fmt::Debug for Presentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Presentation")
            .field("tree", &self.tree)
            .field("undo_redo", &self.undo_redo)
            .finish()
    }
}

impl Presentation {
    #[must_use]
    pub fn new(tree: Tree) -> Self {
        Self::with_config(tree, RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(tree: Tree, config: RuntimeConfig) -> Self {
        let factory = CommandFactory::new(&tree);
        let undo_redo = UndoRedoManager::new(&tree, config.history);
        Self {
            tree,
            factory,
            undo_redo,
            config,
        }
    }

    #[must_use]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    #[must_use]
    pub fn command_factory(&self) -> &CommandFactory {
        &self.factory
    }

    #[must_use]
    pub fn undo_redo_manager(&self) -> &UndoRedoManager {
        &self.undo_redo
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a detached node, ready for an insert command.
    pub fn create_node(&mut self, payload: NodePayload) -> NodeId {
        self.tree.create_node(payload)
    }

    pub fn execute(&mut self, command: Command) -> Result<(), UndoRedoError> {
        self.undo_redo.execute(&mut self.tree, command)
    }

    pub fn undo(&mut self) -> Result<Option<String>, UndoRedoError> {
        self.undo_redo.undo(&mut self.tree)
    }

    pub fn redo(&mut self) -> Result<Option<String>, UndoRedoError> {
        self.undo_redo.redo(&mut self.tree)
    }

    pub fn start_transaction(&mut self, info: TransactionInfo) -> Result<(), UndoRedoError> {
        self.undo_redo.start_transaction(info)
    }

    pub fn end_transaction(&mut self) -> Result<(), UndoRedoError> {
        self.undo_redo.end_transaction(&self.tree)
    }

    pub fn cancel_transaction(&mut self) -> Result<(), UndoRedoError> {
        self.undo_redo.cancel_transaction(&mut self.tree)
    }

    /// Run `edit` inside a transaction.
    ///
    /// The transaction is committed when `edit` returns `Ok`. On `Err` it is
    /// cancelled (unwinding whatever `edit` executed) and the original error
    /// is returned.
    pub fn run_transaction<T>(
        &mut self,
        info: TransactionInfo,
        edit: impl FnOnce(&mut Self) -> Result<T, UndoRedoError>,
    ) -> Result<T, UndoRedoError> {
        self.start_transaction(info)?;
        match edit(self) {
            Ok(value) => {
                self.end_transaction()?;
                Ok(value)
            }
            Err(err) => {
                if self.undo_redo.is_transaction_active()
                    && let Err(cancel) = self.cancel_transaction()
                {
                    warn!(error = %cancel, "cancel after failed transaction body also failed");
                }
                Err(err)
            }
        }
    }

    /// Register a hook host with explicit suppression.
    pub fn hook<H: HookHost + 'static>(
        &self,
        host: Rc<RefCell<H>>,
        suppress_transaction_end_events: bool,
    ) -> Hooker {
        self.undo_redo.hook(host, suppress_transaction_end_events)
    }

    /// Register a hook host using the configured suppression default.
    pub fn hook_default<H: HookHost + 'static>(&self, host: Rc<RefCell<H>>) -> Hooker {
        self.undo_redo
            .hook(host, self.config.hooks.suppress_transaction_end_events)
    }
}
