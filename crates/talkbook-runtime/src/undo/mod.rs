#![forbid(unsafe_code)]

//! Undo/redo history and observer notification.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      UndoRedoManager                          │
//! │   done stack ◄── undo/redo ──► undone stack                  │
//! │        ▲                                                     │
//! │        │ execute / end_transaction                           │
//! │   open transaction buffer ── cancel ──► unwound              │
//! └───────────────┬──────────────────────────────────────────────┘
//!                 │ ChangeNotice (event, done, command, flags)
//!                 ▼
//!        HookHost 1, HookHost 2, ...   (registration order)
//! ```
//!
//! # Module Structure
//!
//! - [`manager`]: the [`UndoRedoManager`] state machine.
//! - [`hook`]: [`HookHost`], [`ChangeNotice`] and the [`Hooker`] guard.

pub mod hook;
pub mod manager;

pub use hook::{ChangeNotice, HookError, HookHost, Hooker, UndoRedoEvent};
pub use manager::{TransactionId, TransactionInfo, UndoRedoError, UndoRedoManager};
