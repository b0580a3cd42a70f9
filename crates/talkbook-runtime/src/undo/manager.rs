#![forbid(unsafe_code)]

//! Undo/redo history with transactions and change notification.
//!
//! [`UndoRedoManager`] owns two stacks of applied/reverted commands and an
//! optional open transaction. Every state change is pushed to registered
//! [`HookHost`]s as a [`ChangeNotice`].
//!
//! ```text
//!          execute(c)                       undo()
//!   Idle ─────────────► done: [.., c]   ──────────► undone: [.., c]
//!    │                  undone: []      ◄──────────
//!    │ start_transaction                   redo()
//!    ▼
//!   Active { buffer } ── execute(c) ──► buffer: [.., c]   (live Done, not trailing)
//!    │
//!    ├─ end_transaction ────► done: [.., Composite(buffer)]   (TransactionEnded)
//!    └─ cancel_transaction ─► buffer unwound in reverse       (TransactionCancelled)
//! ```
//!
//! # Invariants
//!
//! 1. Every command on the done stack is applied; every command on the
//!    undone stack is not.
//! 2. `done.len() <= max(config.max_depth, 1)` after any operation.
//! 3. A new command (or a non-empty committed transaction) clears the
//!    undone stack.
//! 4. Observers are notified only after the change is committed to the tree
//!    and to the stacks.
//!
//! # Failure Modes
//!
//! - **Command failure**: the tree and the stacks are left as they were and
//!   the error is returned as [`UndoRedoError::Command`].
//! - **Observer failure**: the change stays committed, the remaining hosts
//!   are still notified, and the first failure is returned as
//!   [`UndoRedoError::Observer`].
//! - **Misuse**: ending or cancelling with no open transaction is a
//!   programming error. It panics in debug builds and returns
//!   [`UndoRedoError::IllegalState`] in release builds.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use talkbook_core::{Command, CommandError, CommandMetadata, Tree, TreeId};
use thiserror::Error;
use tracing::{debug, debug_span, error, info, warn};
use web_time::Instant;

use super::hook::{ChangeNotice, HookError, HookHost, HookRegistry, Hooker, SharedHost, UndoRedoEvent};
use crate::config::HistoryConfig;

/// Caller-chosen identity for a transaction.
///
/// Starting a transaction with the same id as the open one folds into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Descriptions (and optional id) of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub short_description: String,
    pub long_description: String,
    pub id: Option<TransactionId>,
}

impl TransactionInfo {
    #[must_use]
    pub fn new(short: impl Into<String>, long: impl Into<String>) -> Self {
        Self {
            short_description: short.into(),
            long_description: long.into(),
            id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: TransactionId) -> Self {
        self.id = Some(id);
        self
    }
}

struct ActiveTransaction {
    info: TransactionInfo,
    depth: u32,
    buffer: Vec<Command>,
}

/// Errors returned by [`UndoRedoManager`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UndoRedoError {
    /// Operation not allowed in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Applying or reverting a command failed; nothing was committed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The change was committed but an observer reported a failure.
    #[error("change committed but an observer failed: {0}")]
    Observer(#[from] HookError),
}

fn misuse(operation: &str) -> UndoRedoError {
    let message = format!("{operation} called with no open transaction");
    error!(operation, "undo manager misuse: no open transaction");
    if cfg!(debug_assertions) {
        panic!("{message}");
    }
    UndoRedoError::IllegalState(message)
}

/// Undo/redo history for one document tree.
pub struct UndoRedoManager {
    tree: TreeId,
    config: HistoryConfig,
    done: VecDeque<Command>,
    undone: VecDeque<Command>,
    transaction: Option<ActiveTransaction>,
    hooks: Rc<RefCell<HookRegistry>>,
}

impl fmt::Debug for UndoRedoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoRedoManager")
            .field("tree", &self.tree)
            .field("done", &self.done.len())
            .field("undone", &self.undone.len())
            .field(
                "transaction",
                &self.transaction.as_ref().map(|t| &t.info.short_description),
            )
            .field("hooks", &self.hooks.borrow().len())
            .finish()
    }
}

impl UndoRedoManager {
    /// Create a manager for `tree`.
    #[must_use]
    pub fn new(tree: &Tree, config: HistoryConfig) -> Self {
        Self {
            tree: tree.id(),
            config,
            done: VecDeque::new(),
            undone: VecDeque::new(),
            transaction: None,
            hooks: Rc::new(RefCell::new(HookRegistry::default())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    fn check_tree(&self, tree: &Tree) -> Result<(), UndoRedoError> {
        if tree.id() == self.tree {
            Ok(())
        } else {
            Err(UndoRedoError::IllegalState(format!(
                "manager is bound to tree {} but was given {}",
                self.tree,
                tree.id()
            )))
        }
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    /// Register `host` for notifications.
    ///
    /// With `suppress_transaction_end_events`, the host never receives
    /// `TransactionEnded`; it is expected to have handled the live `Done`
    /// notices instead. The returned [`Hooker`] unhooks on drop.
    pub fn hook<H: HookHost + 'static>(
        &self,
        host: Rc<RefCell<H>>,
        suppress_transaction_end_events: bool,
    ) -> Hooker {
        let host: SharedHost = host;
        let id = self
            .hooks
            .borrow_mut()
            .add(host, suppress_transaction_end_events);
        debug!(hook_id = id, suppress_transaction_end_events, "host hooked");
        Hooker::new(&self.hooks, id, suppress_transaction_end_events)
    }

    /// Number of hosts currently registered.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }

    fn dispatch(
        &self,
        tree: &Tree,
        event: UndoRedoEvent,
        command: &Command,
    ) -> Result<(), UndoRedoError> {
        let recipients = self.hooks.borrow().recipients(event);
        if recipients.is_empty() {
            return Ok(());
        }
        let notice = ChangeNotice::new(event, command, self.transaction.is_some());
        let started = Instant::now();
        let span = debug_span!(
            "talkbook.undo.notify",
            event = %event,
            hosts = recipients.len(),
            trailing = notice.is_no_transaction_or_trailing_edge,
            duration_us = tracing::field::Empty
        );
        let _guard = span.enter();

        let mut first_error = None;
        for host in &recipients {
            let outcome = match host.try_borrow_mut() {
                Ok(mut host) => host.on_undo_redo_manager_changed(tree, &notice),
                Err(_) => Err(HookError::HostBusy {
                    host: "unknown".into(),
                }),
            };
            if let Err(err) = outcome {
                warn!(event = %event, error = %err, "hook host failed");
                first_error.get_or_insert(err);
            }
        }
        for host in &recipients {
            if let Ok(host) = host.try_borrow() {
                host.after_notification();
            }
        }
        span.record("duration_us", started.elapsed().as_micros() as u64);
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }

    // ========================================================================
    // Execute / undo / redo
    // ========================================================================

    fn push_done(&mut self, command: Command) {
        self.done.push_back(command);
        let limit = self.config.max_depth.max(1);
        while self.done.len() > limit {
            if let Some(evicted) = self.done.pop_front() {
                debug!(
                    description = evicted.short_description(),
                    "history depth exceeded; oldest entry evicted"
                );
            }
        }
    }

    /// Apply `command` and record it.
    ///
    /// Outside a transaction the command goes on the done stack and the
    /// undone stack is cleared. Inside a transaction it is buffered and
    /// reported live with `is_no_transaction_or_trailing_edge == false`.
    pub fn execute(&mut self, tree: &mut Tree, mut command: Command) -> Result<(), UndoRedoError> {
        self.check_tree(tree)?;
        let _span = debug_span!(
            "talkbook.undo.execute",
            kind = %command.kind(),
            description = command.short_description(),
            in_transaction = self.transaction.is_some()
        )
        .entered();

        command.execute(tree)?;
        match self.transaction.as_mut() {
            Some(tx) => tx.buffer.push(command),
            None => {
                self.undone.clear();
                self.push_done(command);
            }
        }

        let recorded = match &self.transaction {
            Some(tx) => tx.buffer.last(),
            None => self.done.back(),
        };
        match recorded {
            Some(cmd) => self.dispatch(tree, UndoRedoEvent::CommandDone, cmd),
            None => Ok(()),
        }
    }

    /// Revert the most recent command. `Ok(None)` if there is nothing to
    /// undo.
    pub fn undo(&mut self, tree: &mut Tree) -> Result<Option<String>, UndoRedoError> {
        self.check_tree(tree)?;
        self.reject_in_transaction("undo")?;
        let Some(mut command) = self.done.pop_back() else {
            debug!("undo requested with empty history");
            return Ok(None);
        };
        let _span = debug_span!(
            "talkbook.undo.undo",
            kind = %command.kind(),
            description = command.short_description()
        )
        .entered();

        if let Err(err) = command.unexecute(tree) {
            error!(error = %err, "undo failed; command kept on the done stack");
            self.done.push_back(command);
            return Err(err.into());
        }
        let description = command.short_description().to_owned();
        self.undone.push_back(command);
        if let Some(cmd) = self.undone.back() {
            self.dispatch(tree, UndoRedoEvent::CommandUnDone, cmd)?;
        }
        Ok(Some(description))
    }

    /// Re-apply the most recently undone command. `Ok(None)` if there is
    /// nothing to redo.
    pub fn redo(&mut self, tree: &mut Tree) -> Result<Option<String>, UndoRedoError> {
        self.check_tree(tree)?;
        self.reject_in_transaction("redo")?;
        let Some(mut command) = self.undone.pop_back() else {
            debug!("redo requested with empty redo stack");
            return Ok(None);
        };
        let _span = debug_span!(
            "talkbook.undo.redo",
            kind = %command.kind(),
            description = command.short_description()
        )
        .entered();

        if let Err(err) = command.execute(tree) {
            error!(error = %err, "redo failed; command kept on the undone stack");
            self.undone.push_back(command);
            return Err(err.into());
        }
        let description = command.short_description().to_owned();
        self.push_done(command);
        if let Some(cmd) = self.done.back() {
            self.dispatch(tree, UndoRedoEvent::CommandReDone, cmd)?;
        }
        Ok(Some(description))
    }

    fn reject_in_transaction(&self, operation: &str) -> Result<(), UndoRedoError> {
        match &self.transaction {
            Some(tx) => {
                warn!(
                    operation,
                    transaction = tx.info.short_description.as_str(),
                    "rejected while a transaction is open"
                );
                Err(UndoRedoError::IllegalState(format!(
                    "cannot {operation} while transaction '{}' is open",
                    tx.info.short_description
                )))
            }
            None => Ok(()),
        }
    }

    /// Drop both stacks without touching the tree.
    pub fn clear_history(&mut self) -> Result<(), UndoRedoError> {
        self.reject_in_transaction("clear history")?;
        info!(
            done = self.done.len(),
            undone = self.undone.len(),
            "history cleared"
        );
        self.done.clear();
        self.undone.clear();
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a transaction.
    ///
    /// If one is already open with the same non-`None` id, the call nests
    /// into it and only the matching outermost `end_transaction` commits.
    /// Any other start while a transaction is open is rejected.
    pub fn start_transaction(&mut self, info: TransactionInfo) -> Result<(), UndoRedoError> {
        if let Some(tx) = self.transaction.as_mut() {
            if info.id.is_some() && info.id == tx.info.id {
                tx.depth += 1;
                debug!(depth = tx.depth, "transaction re-entered");
                return Ok(());
            }
            warn!(
                open = tx.info.short_description.as_str(),
                requested = info.short_description.as_str(),
                "nested transaction rejected"
            );
            return Err(UndoRedoError::IllegalState(format!(
                "transaction '{}' is already open",
                tx.info.short_description
            )));
        }
        info!(
            description = info.short_description.as_str(),
            id = info.id.map(TransactionId::get),
            "transaction started"
        );
        self.transaction = Some(ActiveTransaction {
            info,
            depth: 1,
            buffer: Vec::new(),
        });
        Ok(())
    }

    /// Close the open transaction, committing its commands as one composite.
    ///
    /// An empty transaction leaves the history untouched but still reports
    /// `TransactionEnded` with an empty composite.
    pub fn end_transaction(&mut self, tree: &Tree) -> Result<(), UndoRedoError> {
        self.check_tree(tree)?;
        let mut tx = self
            .transaction
            .take()
            .ok_or_else(|| misuse("end_transaction"))?;
        if tx.depth > 1 {
            tx.depth -= 1;
            debug!(depth = tx.depth, "nested transaction closed");
            self.transaction = Some(tx);
            return Ok(());
        }

        let count = tx.buffer.len();
        let metadata = CommandMetadata::new(tx.info.short_description, tx.info.long_description);
        let composite = Command::from_committed_transaction(metadata, tx.buffer)?;
        info!(
            description = composite.short_description(),
            commands = count,
            "transaction committed"
        );
        if count == 0 {
            return self.dispatch(tree, UndoRedoEvent::TransactionEnded, &composite);
        }
        self.undone.clear();
        self.push_done(composite);
        match self.done.back() {
            Some(cmd) => self.dispatch(tree, UndoRedoEvent::TransactionEnded, cmd),
            None => Ok(()),
        }
    }

    /// Abort the open transaction (all nesting levels), reverting its
    /// commands in reverse order.
    pub fn cancel_transaction(&mut self, tree: &mut Tree) -> Result<(), UndoRedoError> {
        self.check_tree(tree)?;
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| misuse("cancel_transaction"))?;
        let mut buffer = tx.buffer;
        let mut first_error = None;
        for command in buffer.iter_mut().rev() {
            if let Err(err) = command.unexecute(tree) {
                error!(
                    description = command.short_description(),
                    error = %err,
                    "failed to unwind command during cancel"
                );
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err.into());
        }

        let count = buffer.len();
        let metadata = CommandMetadata::new(tx.info.short_description, tx.info.long_description);
        let composite = Command::from_cancelled_transaction(metadata, buffer)?;
        info!(
            description = composite.short_description(),
            commands = count,
            "transaction cancelled"
        );
        self.dispatch(tree, UndoRedoEvent::TransactionCancelled, &composite)
    }

    #[must_use]
    pub fn is_transaction_active(&self) -> bool {
        self.transaction.is_some()
    }

    /// The open transaction's info, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<&TransactionInfo> {
        self.transaction.as_ref().map(|t| &t.info)
    }

    /// Nesting depth of the open transaction; 0 when idle.
    #[must_use]
    pub fn transaction_depth(&self) -> u32 {
        self.transaction.as_ref().map_or(0, |t| t.depth)
    }

    /// Commands buffered in the open transaction.
    #[must_use]
    pub fn pending_commands(&self) -> &[Command] {
        self.transaction
            .as_ref()
            .map_or(&[], |t| t.buffer.as_slice())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether `undo` would do something right now.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.transaction.is_none() && !self.done.is_empty()
    }

    /// Whether `redo` would do something right now.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.transaction.is_none() && !self.undone.is_empty()
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.done.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.undone.len()
    }

    #[must_use]
    pub fn next_undo_description(&self) -> Option<&str> {
        self.done.back().map(Command::short_description)
    }

    #[must_use]
    pub fn next_redo_description(&self) -> Option<&str> {
        self.undone.back().map(Command::short_description)
    }

    /// Up to `limit` undo descriptions, most recent first.
    #[must_use]
    pub fn undo_descriptions(&self, limit: usize) -> Vec<&str> {
        self.done
            .iter()
            .rev()
            .take(limit)
            .map(Command::short_description)
            .collect()
    }

    /// Up to `limit` redo descriptions, next redo first.
    #[must_use]
    pub fn redo_descriptions(&self, limit: usize) -> Vec<&str> {
        self.undone
            .iter()
            .rev()
            .take(limit)
            .map(Command::short_description)
            .collect()
    }
}
