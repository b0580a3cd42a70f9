#![forbid(unsafe_code)]

//! Change notification from the undo/redo manager to observers.
//!
//! Every successful state change of the manager produces one
//! [`ChangeNotice`] per registered [`HookHost`]. The notice carries the
//! event, the command it concerns and two flags that let observers choose
//! between incremental work and deferred rebuilds:
//!
//! ```text
//!   event                 done  end   trailing  command
//!   --------------------  ----  ----  --------  ---------------------------
//!   Done (no transaction)  T     F     T         the command
//!   Done (in transaction)  T     F     F         the command
//!   TransactionEnded       T     T     T         committed composite
//!   TransactionCancelled   F     T     T         composite of unwound cmds
//!   UnDone                 F     F     T         the command
//!   ReDone                 T     F     T         the command
//! ```
//!
//! `end` is [`ChangeNotice::is_transaction_end_event`], `trailing` is
//! [`ChangeNotice::is_no_transaction_or_trailing_edge`].
//!
//! # Invariants
//!
//! - Hosts are notified in registration order.
//! - Hosts registered with suppression never receive `TransactionEnded`.
//! - Delivery iterates a snapshot of the host list, so a host may unhook
//!   itself (or others) while being notified.
//! - [`HookHost::after_notification`] runs for every recipient only after
//!   all of them have handled the notice.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use talkbook_core::{Command, Tree};
use thiserror::Error;

/// What happened to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UndoRedoEvent {
    CommandDone,
    CommandReDone,
    CommandUnDone,
    TransactionEnded,
    TransactionCancelled,
}

impl UndoRedoEvent {
    /// Whether the change moved the document forward.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(
            self,
            Self::CommandDone | Self::CommandReDone | Self::TransactionEnded
        )
    }

    #[must_use]
    pub const fn is_transaction_end(self) -> bool {
        matches!(self, Self::TransactionEnded | Self::TransactionCancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CommandDone => "done",
            Self::CommandReDone => "redone",
            Self::CommandUnDone => "undone",
            Self::TransactionEnded => "transaction-ended",
            Self::TransactionCancelled => "transaction-cancelled",
        }
    }
}

impl fmt::Display for UndoRedoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification delivered to a [`HookHost`].
#[derive(Debug, Clone, Copy)]
pub struct ChangeNotice<'a> {
    pub event: UndoRedoEvent,
    /// `true` if the command is now applied.
    pub done: bool,
    pub command: &'a Command,
    /// `true` for `TransactionEnded` and `TransactionCancelled`.
    pub is_transaction_end_event: bool,
    /// `false` only for commands executed live inside an open transaction.
    pub is_no_transaction_or_trailing_edge: bool,
}

impl<'a> ChangeNotice<'a> {
    /// Derive the flags for `event`. `in_transaction` is whether a
    /// transaction is still open when the notice is sent.
    #[must_use]
    pub fn new(event: UndoRedoEvent, command: &'a Command, in_transaction: bool) -> Self {
        let is_transaction_end_event = event.is_transaction_end();
        Self {
            event,
            done: event.is_done(),
            command,
            is_transaction_end_event,
            is_no_transaction_or_trailing_edge: is_transaction_end_event || !in_transaction,
        }
    }
}

/// Failure reported by a host while handling a notice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// A composite mixed command kinds the host only handles separately.
    #[error("{host}: unexpected composite of {kinds}")]
    UnexpectedComposite { host: String, kinds: String },

    /// The host was already mutably borrowed when the notice arrived.
    #[error("{host}: host is busy (re-entrant notification)")]
    HostBusy { host: String },

    #[error("{host}: {message}")]
    Failed { host: String, message: String },
}

/// Observer of undo/redo state changes.
///
/// The tree passed in already reflects the change.
pub trait HookHost {
    fn on_undo_redo_manager_changed(
        &mut self,
        tree: &Tree,
        notice: &ChangeNotice<'_>,
    ) -> Result<(), HookError>;

    /// Called once every recipient has handled the notice, while no host
    /// is mutably borrowed. Publish observable state here so subscribers
    /// can read any host.
    fn after_notification(&self) {}

    /// Name used in logs and errors.
    fn host_name(&self) -> &str {
        "hook-host"
    }
}

pub(crate) type SharedHost = Rc<RefCell<dyn HookHost>>;

struct HookEntry {
    id: u64,
    host: SharedHost,
    suppress_transaction_end_events: bool,
}

/// Registered hosts in registration order.
#[derive(Default)]
pub(crate) struct HookRegistry {
    next_id: u64,
    entries: Vec<HookEntry>,
}

impl HookRegistry {
    pub(crate) fn add(&mut self, host: SharedHost, suppress_transaction_end_events: bool) -> u64 {
        self.next_id += 1;
        self.entries.push(HookEntry {
            id: self.next_id,
            host,
            suppress_transaction_end_events,
        });
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Hosts that should see `event`, in registration order.
    pub(crate) fn recipients(&self, event: UndoRedoEvent) -> Vec<SharedHost> {
        self.entries
            .iter()
            .filter(|e| {
                !(e.suppress_transaction_end_events && event == UndoRedoEvent::TransactionEnded)
            })
            .map(|e| Rc::clone(&e.host))
            .collect()
    }
}

/// Registration guard returned by
/// [`UndoRedoManager::hook`](crate::UndoRedoManager::hook).
///
/// [`unhook`](Self::unhook) is idempotent; dropping the guard unhooks too.
pub struct Hooker {
    registry: Option<Weak<RefCell<HookRegistry>>>,
    id: u64,
    suppress_transaction_end_events: bool,
}

impl fmt::Debug for Hooker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooker")
            .field("id", &self.id)
            .field("hooked", &self.is_hooked())
            .field(
                "suppress_transaction_end_events",
                &self.suppress_transaction_end_events,
            )
            .finish()
    }
}

impl Hooker {
    pub(crate) fn new(
        registry: &Rc<RefCell<HookRegistry>>,
        id: u64,
        suppress_transaction_end_events: bool,
    ) -> Self {
        Self {
            registry: Some(Rc::downgrade(registry)),
            id,
            suppress_transaction_end_events,
        }
    }

    /// Stop receiving notifications. Safe to call any number of times,
    /// including from inside the host's own callback.
    pub fn unhook(&mut self) {
        let Some(registry) = self.registry.take() else {
            return;
        };
        if let Some(registry) = registry.upgrade() {
            registry.borrow_mut().remove(self.id);
            tracing::debug!(hook_id = self.id, "host unhooked");
        }
    }

    /// Whether the host is still registered with a live manager.
    #[must_use]
    pub fn is_hooked(&self) -> bool {
        self.registry
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|r| r.borrow().entries.iter().any(|e| e.id == self.id))
    }

    #[must_use]
    pub fn suppresses_transaction_end_events(&self) -> bool {
        self.suppress_transaction_end_events
    }
}

impl Drop for Hooker {
    fn drop(&mut self) {
        self.unhook();
    }
}
