#![forbid(unsafe_code)]

//! The three navigation indexes of an open document.
//!
//! [`NavigationPanes::load`] builds the headings, pages and markers indexes
//! for a [`Presentation`] and hooks them to its undo/redo manager;
//! [`NavigationPanes::unload`] (or dropping the panes) unhooks them.
//!
//! Bulk edits such as [`remove_all_marks`] run inside a transaction, so the
//! indexes see one composite and rebuild once on undo and redo. That is a
//! convention of these helpers; the manager does not enforce it.

use std::cell::RefCell;
use std::rc::Rc;

use talkbook_core::NodeId;
use talkbook_runtime::{Hooker, Presentation, TransactionInfo, UndoRedoError};
use tracing::{debug, info};

use crate::index::IndexMaintainer;
use crate::policy::{HeadingPolicy, MarkerPolicy, PagePolicy};

pub type SharedIndex<P> = Rc<RefCell<IndexMaintainer<P>>>;

#[derive(Debug)]
pub struct NavigationPanes {
    headings: SharedIndex<HeadingPolicy>,
    pages: SharedIndex<PagePolicy>,
    markers: SharedIndex<MarkerPolicy>,
    hookers: Vec<Hooker>,
}

impl NavigationPanes {
    /// Build all three indexes and hook them with the document's configured
    /// transaction-end suppression.
    #[must_use]
    pub fn load(presentation: &Presentation) -> Self {
        let tree = presentation.tree();
        let headings = Rc::new(RefCell::new(IndexMaintainer::<HeadingPolicy>::new(tree)));
        let pages = Rc::new(RefCell::new(IndexMaintainer::<PagePolicy>::new(tree)));
        let markers = Rc::new(RefCell::new(IndexMaintainer::<MarkerPolicy>::new(tree)));
        let hookers = vec![
            presentation.hook_default(Rc::clone(&headings)),
            presentation.hook_default(Rc::clone(&pages)),
            presentation.hook_default(Rc::clone(&markers)),
        ];
        info!(
            tree = %tree.id(),
            headings = headings.borrow().len(),
            pages = pages.borrow().len(),
            markers = markers.borrow().len(),
            "navigation panes loaded"
        );
        Self {
            headings,
            pages,
            markers,
            hookers,
        }
    }

    /// Unhook every index. The indexes stay readable but stop updating.
    pub fn unload(&mut self) {
        if !self.is_loaded() {
            return;
        }
        for hooker in &mut self.hookers {
            hooker.unhook();
        }
        info!("navigation panes unloaded");
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.hookers.iter().any(Hooker::is_hooked)
    }

    #[must_use]
    pub fn headings(&self) -> &SharedIndex<HeadingPolicy> {
        &self.headings
    }

    #[must_use]
    pub fn pages(&self) -> &SharedIndex<PagePolicy> {
        &self.pages
    }

    #[must_use]
    pub fn markers(&self) -> &SharedIndex<MarkerPolicy> {
        &self.markers
    }
}

/// Flip the marked flag of `node` as one undoable edit.
pub fn toggle_mark(presentation: &mut Presentation, node: NodeId) -> Result<bool, UndoRedoError> {
    let marked = !presentation.tree().is_marked(node);
    let command = presentation
        .command_factory()
        .create_tree_node_set_is_marked_command(presentation.tree(), node, marked)?;
    presentation.execute(command)?;
    Ok(marked)
}

/// Unmark every node listed in `markers` in a single transaction.
///
/// Returns how many nodes were unmarked. Does nothing (and records no
/// history) when the index is empty.
pub fn remove_all_marks(
    presentation: &mut Presentation,
    markers: &SharedIndex<MarkerPolicy>,
) -> Result<usize, UndoRedoError> {
    let nodes = markers.borrow().nodes();
    if nodes.is_empty() {
        debug!("remove all marks: nothing marked");
        return Ok(0);
    }
    let info = TransactionInfo::new("Remove all marks", "Remove all marks");
    presentation.run_transaction(info, |doc| {
        for &node in &nodes {
            let command = doc
                .command_factory()
                .create_tree_node_set_is_marked_command(doc.tree(), node, false)?;
            doc.execute(command)?;
        }
        Ok(nodes.len())
    })
}
