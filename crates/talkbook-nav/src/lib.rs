#![forbid(unsafe_code)]

//! Navigation indexes for talkbook documents.
//!
//! Each index is an [`IndexMaintainer`] parameterised by an
//! [`IndexPolicy`]:
//!
//! - [`HeadingPolicy`]: `h1`..`h6`, `hd`, `levelhd`.
//! - [`PagePolicy`]: `pagenum` elements and `epub:type="pagebreak"`.
//! - [`MarkerPolicy`]: nodes with the marked flag.
//!
//! Maintainers are [`HookHost`](talkbook_runtime::HookHost)s. Hook them to
//! a document's undo/redo manager, or let [`NavigationPanes`] do it for all
//! three at once.
//!
//! # Example
//!
//! ```
//! use talkbook_core::{NodePayload, TreeBuilder};
//! use talkbook_nav::{NavigationPanes, toggle_mark};
//! use talkbook_runtime::Presentation;
//!
//! let mut b = TreeBuilder::new(NodePayload::element("body"));
//! let root = b.root();
//! let p = b.child(root, NodePayload::element("p").with_text("Chapter 1"));
//! let mut doc = Presentation::new(b.build());
//!
//! let panes = NavigationPanes::load(&doc);
//! toggle_mark(&mut doc, p).unwrap();
//! assert_eq!(panes.markers().borrow().nodes(), vec![p]);
//!
//! doc.undo().unwrap();
//! assert!(panes.markers().borrow().is_empty());
//! ```

pub mod error;
pub mod index;
pub mod panes;
pub mod policy;

pub use error::IndexError;
pub use index::{IndexEntry, IndexMaintainer};
pub use panes::{NavigationPanes, SharedIndex, remove_all_marks, toggle_mark};
pub use policy::{
    HeadingPolicy, IndexPolicy, MARKER_LABEL_MAX_CHARS, MarkerPolicy, PagePolicy,
    normalize_whitespace,
};
