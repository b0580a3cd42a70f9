#![forbid(unsafe_code)]

//! Editing runtime for talkbook documents.
//!
//! - [`undo`]: the [`UndoRedoManager`] with transactions and the
//!   [`HookHost`] notification protocol.
//! - [`presentation`]: [`Presentation`], one open document.
//! - [`reactive`]: [`Observable`] values for derived views.
//! - [`executor`]: [`DocumentExecutor`], the owner thread for `!Send`
//!   document state.
//! - [`config`]: [`RuntimeConfig`], loadable from TOML/JSON with the
//!   `config` feature.
//!
//! This crate emits `tracing` spans and events but never installs a
//! subscriber; that is the embedding application's job.

pub mod config;
pub mod executor;
pub mod presentation;
pub mod reactive;
pub mod undo;

pub use config::{ConfigError, ExecutorConfig, HistoryConfig, HookConfig, RuntimeConfig};
pub use executor::{DocumentExecutor, ExecutorError, ExecutorHandle};
pub use presentation::Presentation;
pub use reactive::{Observable, Subscription};
pub use undo::{
    ChangeNotice, HookError, HookHost, Hooker, TransactionId, TransactionInfo, UndoRedoError,
    UndoRedoEvent, UndoRedoManager,
};
