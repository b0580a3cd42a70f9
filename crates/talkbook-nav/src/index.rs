#![forbid(unsafe_code)]

//! Derived index maintainer.
//!
//! An [`IndexMaintainer`] keeps a filtered, document-ordered list of the
//! nodes a policy selects, and stays in sync by observing the undo/redo
//! manager. It is a materialized view: edits are applied as small deltas
//! (re-checking only the nodes a command can have affected) and the list
//! is only rebuilt from the root for composites on their trailing edge.
//!
//! ```text
//!   ChangeNotice ──► dispatch on CommandOp
//!                     │
//!     ChangeText ─────┤ invalidate labels of node + ancestors,
//!                     │ refresh node + ancestors
//!     SetMarked ──────┤ refresh node
//!     StructureEdit ──┤ invalidate (forced when the node left the tree),
//!                     │ refresh subtree + old/new parent chain
//!     Composite ──────┘ trailing edge: rebuild from root
//!                       live (inside a transaction): replay children
//! ```
//!
//! Entry labels are computed lazily and cached per entry. Invalidation
//! only drops the cache; the next [`IndexEntry::label`] call recomputes.
//!
//! Membership is always re-derived from the tree as it is when the notice
//! arrives, never from values captured in the command. The manager applies
//! every change before notifying, so the tree already reflects `done`.
//!
//! Observers of [`IndexMaintainer::is_empty_observable`] and
//! [`IndexMaintainer::revision`] are notified from
//! [`HookHost::after_notification`], once the manager has released the
//! index. A subscriber may therefore borrow the index (or any other hooked
//! index) to read the new list.

use std::cell::{Cell, OnceCell};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use talkbook_core::{Command, CommandKind, CommandOp, NodeId, Tree, TreeId};
use talkbook_runtime::{ChangeNotice, HookError, HookHost, Observable};
use tracing::{debug, debug_span, error, trace};
use web_time::Instant;

use crate::error::IndexError;
use crate::policy::IndexPolicy;

// ============================================================================
// Entries
// ============================================================================

/// One listed node and its lazily computed label.
pub struct IndexEntry<P> {
    node: NodeId,
    label: OnceCell<String>,
    _policy: PhantomData<fn() -> P>,
}

impl<P> fmt::Debug for IndexEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexEntry")
            .field("node", &self.node)
            .field("label", &self.label.get())
            .finish()
    }
}

impl<P: IndexPolicy> IndexEntry<P> {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            label: OnceCell::new(),
            _policy: PhantomData,
        }
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The label, computed from `tree` on first use after an invalidation.
    pub fn label(&self, tree: &Tree) -> &str {
        self.label.get_or_init(|| P::label(tree, self.node))
    }

    #[must_use]
    pub fn is_label_cached(&self) -> bool {
        self.label.get().is_some()
    }

    /// The cached label, without computing it.
    #[must_use]
    pub fn cached_label(&self) -> Option<&str> {
        self.label.get().map(String::as_str)
    }

    pub fn invalidate_label(&mut self) {
        self.label.take();
    }
}

// ============================================================================
// Maintainer
// ============================================================================

/// Filtered view of a tree kept current by undo/redo notifications.
///
/// Hook it with suppression of transaction-end events on: live notices
/// inside a transaction are applied incrementally, and the composite is
/// still seen (and rebuilt from) on undo and redo.
pub struct IndexMaintainer<P: IndexPolicy> {
    tree: TreeId,
    entries: Vec<IndexEntry<P>>,
    is_empty: Observable<bool>,
    revision: Observable<u64>,
    rebuilds: u64,
    /// Membership changed since observers were last told.
    dirty: Cell<bool>,
    /// Inside a notification: publishing waits for `after_notification`.
    notifying: bool,
}

impl<P: IndexPolicy> fmt::Debug for IndexMaintainer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexMaintainer")
            .field("index", &P::NAME)
            .field("tree", &self.tree)
            .field("entries", &self.entries)
            .field("rebuilds", &self.rebuilds)
            .finish()
    }
}

impl<P: IndexPolicy> IndexMaintainer<P> {
    /// Build the index for `tree`.
    #[must_use]
    pub fn new(tree: &Tree) -> Self {
        let mut maintainer = Self {
            tree: tree.id(),
            entries: Vec::new(),
            is_empty: Observable::new(true),
            revision: Observable::new(0),
            rebuilds: 0,
            dirty: Cell::new(false),
            notifying: false,
        };
        maintainer.rebuild(tree);
        maintainer
    }

    #[must_use]
    pub fn tree_id(&self) -> TreeId {
        self.tree
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry<P>] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.position(node).is_some()
    }

    #[must_use]
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.entries.iter().position(|e| e.node == node)
    }

    /// Listed nodes in document order.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        self.entries.iter().map(|e| e.node).collect()
    }

    /// Label of a listed node.
    pub fn label(&self, tree: &Tree, node: NodeId) -> Option<&str> {
        let index = self.position(node)?;
        Some(self.entries[index].label(tree))
    }

    /// Emits `true` while the index has no entries.
    #[must_use]
    pub fn is_empty_observable(&self) -> Observable<bool> {
        self.is_empty.clone()
    }

    /// Bumped once per change to the list's membership.
    #[must_use]
    pub fn revision(&self) -> Observable<u64> {
        self.revision.clone()
    }

    /// How many times the list was rebuilt from the root, including the
    /// initial build.
    #[must_use]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Add a node found outside the undo/redo flow (e.g. while parsing).
    ///
    /// Returns `Ok(false)` if the node is already listed or does not belong
    /// in this index.
    pub fn add(&mut self, tree: &Tree, node: NodeId) -> Result<bool, IndexError> {
        self.check_node(tree, node)?;
        let added = self.is_member(tree, node) && self.insert(tree, node);
        self.publish();
        Ok(added)
    }

    /// Drop a node from the list. Returns whether it was listed.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let removed = self.take(node);
        self.publish();
        removed
    }

    /// Discard every entry and rescan the whole tree.
    pub fn rebuild(&mut self, tree: &Tree) {
        let started = Instant::now();
        let span = debug_span!(
            "talkbook.nav.rebuild",
            index = P::NAME,
            entries = tracing::field::Empty,
            duration_us = tracing::field::Empty
        );
        let _guard = span.enter();

        let before = self.nodes();
        self.entries = tree
            .descendants(tree.root())
            .into_iter()
            .filter(|&node| P::qualifies(tree, node))
            .map(IndexEntry::new)
            .collect();
        self.rebuilds += 1;
        if self.entries.iter().map(|e| e.node).ne(before) {
            self.dirty.set(true);
        }
        self.publish();

        span.record("entries", self.entries.len());
        span.record("duration_us", started.elapsed().as_micros() as u64);
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Listed nodes whose label contains `term`, ignoring ASCII case. An
    /// empty term matches nothing.
    pub fn search(&self, tree: &Tree, term: &str) -> Vec<NodeId> {
        if term.is_empty() {
            return Vec::new();
        }
        let needle = term.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|e| e.label(tree).to_ascii_lowercase().contains(&needle))
            .map(|e| e.node)
            .collect()
    }

    /// First match after `after` in document order, or the first match.
    pub fn find_next(&self, tree: &Tree, term: &str, after: Option<NodeId>) -> Option<NodeId> {
        let matches = self.search(tree, term);
        match after {
            None => matches.first().copied(),
            Some(after) => matches
                .into_iter()
                .find(|&m| tree.document_order(m, after) == Ordering::Greater),
        }
    }

    /// Last match before `before` in document order, or the last match.
    pub fn find_previous(
        &self,
        tree: &Tree,
        term: &str,
        before: Option<NodeId>,
    ) -> Option<NodeId> {
        let matches = self.search(tree, term);
        match before {
            None => matches.last().copied(),
            Some(before) => matches
                .into_iter()
                .rev()
                .find(|&m| tree.document_order(m, before) == Ordering::Less),
        }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    fn check_node(&self, tree: &Tree, node: NodeId) -> Result<(), IndexError> {
        if tree.id() != self.tree || !tree.contains(node) {
            return Err(IndexError::UnknownNode {
                index: P::NAME,
                node,
            });
        }
        Ok(())
    }

    fn is_member(&self, tree: &Tree, node: NodeId) -> bool {
        P::qualifies(tree, node) && tree.is_attached(node)
    }

    /// Entries are attached, so their document order is well defined.
    fn insert(&mut self, tree: &Tree, node: NodeId) -> bool {
        if self.contains(node) {
            return false;
        }
        let at = self
            .entries
            .partition_point(|e| tree.document_order(e.node, node) == Ordering::Less);
        self.entries.insert(at, IndexEntry::new(node));
        self.dirty.set(true);
        true
    }

    fn take(&mut self, node: NodeId) -> bool {
        let Some(index) = self.position(node) else {
            return false;
        };
        self.entries.remove(index);
        self.dirty.set(true);
        true
    }

    /// Re-derive membership of `nodes`. Leavers go first so that every
    /// entry is attached when new ones are placed.
    fn refresh(&mut self, tree: &Tree, nodes: &[NodeId]) {
        let (members, leavers): (Vec<NodeId>, Vec<NodeId>) =
            nodes.iter().copied().partition(|&n| self.is_member(tree, n));
        for node in leavers {
            self.take(node);
        }
        for node in members {
            self.insert(tree, node);
        }
    }

    /// Drop cached labels that may now be stale: entries at or above `node`,
    /// or all of them when `force` is set.
    fn invalidate_containing(&mut self, tree: &Tree, node: NodeId, force: bool) {
        let mut invalidated = 0usize;
        for entry in &mut self.entries {
            if force || entry.node == node || tree.is_descendant_of(node, entry.node) {
                entry.invalidate_label();
                invalidated += 1;
            }
        }
        trace!(index = P::NAME, node = %node, force, invalidated, "labels invalidated");
    }

    fn publish(&self) {
        if self.notifying || !self.dirty.replace(false) {
            return;
        }
        self.is_empty.set(self.entries.is_empty());
        self.revision.set(self.revision.get().wrapping_add(1));
    }

    // ========================================================================
    // Change handling
    // ========================================================================

    fn apply(
        &mut self,
        tree: &Tree,
        command: &Command,
        done: bool,
        is_transaction_end_event: bool,
        trailing_edge: bool,
    ) -> Result<(), IndexError> {
        match command.op() {
            CommandOp::ChangeText(op) => {
                if is_transaction_end_event {
                    return Ok(());
                }
                self.invalidate_containing(tree, op.node(), false);
                self.refresh(tree, &with_ancestors(tree, op.node()));
            }
            CommandOp::SetMarked(op) => {
                self.refresh(tree, &[op.node()]);
            }
            CommandOp::StructureEdit(op) => {
                let gone = if op.is_insert() { !done } else { done };
                self.invalidate_containing(tree, op.tree_node(), gone);
                let mut nodes = tree.descendants(op.tree_node());
                nodes.extend(with_ancestors(tree, op.parent()));
                self.refresh(tree, &nodes);
            }
            CommandOp::Composite(composite) => {
                if composite.is_empty() {
                    return Ok(());
                }
                if !trailing_edge {
                    for child in composite.children() {
                        self.apply(tree, child, done, is_transaction_end_event, false)?;
                    }
                    return Ok(());
                }
                self.rebuild(tree);
                let kinds = command.leaf_kinds();
                if is_mixed(&kinds) {
                    error!(index = P::NAME, ?kinds, "composite mixes edit kinds");
                    return Err(IndexError::UnexpectedComposite {
                        index: P::NAME,
                        kinds,
                    });
                }
            }
        }
        Ok(())
    }
}

impl<P: IndexPolicy> HookHost for IndexMaintainer<P> {
    fn on_undo_redo_manager_changed(
        &mut self,
        tree: &Tree,
        notice: &ChangeNotice<'_>,
    ) -> Result<(), HookError> {
        if tree.id() != self.tree {
            return Err(HookError::Failed {
                host: P::NAME.to_string(),
                message: format!(
                    "notice for tree {} but index built for {}",
                    tree.id(),
                    self.tree
                ),
            });
        }
        let _span = debug_span!(
            "talkbook.nav.on_change",
            index = P::NAME,
            event = %notice.event,
            command = %notice.command.kind(),
            done = notice.done
        )
        .entered();

        self.notifying = true;
        let outcome = self.apply(
            tree,
            notice.command,
            notice.done,
            notice.is_transaction_end_event,
            notice.is_no_transaction_or_trailing_edge,
        );
        self.notifying = false;
        if self.dirty.get() {
            debug!(index = P::NAME, entries = self.entries.len(), "index membership changed");
        }
        outcome.map_err(HookError::from)
    }

    fn after_notification(&self) {
        self.publish();
    }

    fn host_name(&self) -> &str {
        P::NAME
    }
}

/// `node` and every ancestor up to the root.
fn with_ancestors(tree: &Tree, node: NodeId) -> Vec<NodeId> {
    let mut out = vec![node];
    let mut cursor = tree.parent(node);
    while let Some(parent) = cursor {
        out.push(parent);
        cursor = tree.parent(parent);
    }
    out
}

/// A composite is mixed when its leaves span more than one of: text
/// changes, mark changes, structure edits.
fn is_mixed(kinds: &[CommandKind]) -> bool {
    fn class(kind: CommandKind) -> u8 {
        match kind {
            CommandKind::ChangeText => 0,
            CommandKind::SetMarked => 1,
            CommandKind::Insert | CommandKind::Remove | CommandKind::Composite => 2,
        }
    }
    kinds
        .split_first()
        .is_some_and(|(&first, rest)| rest.iter().any(|&k| class(k) != class(first)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{HeadingPolicy, MarkerPolicy, PagePolicy};
    use std::cell::Cell;
    use std::rc::Rc;
    use talkbook_core::{NodePayload, TreeBuilder};

    struct Doc {
        tree: Tree,
        h1: NodeId,
        h1_text: NodeId,
        p: NodeId,
        page: NodeId,
        h2: NodeId,
    }

    /// body > [h1 > "Start", p(marked) > "Intro", pagenum "1", section > h2 "Next"]
    fn doc() -> Doc {
        let mut b = TreeBuilder::new(NodePayload::element("body"));
        let root = b.root();
        let h1 = b.child(root, NodePayload::element("h1"));
        let h1_text = b.child(h1, NodePayload::text("Start"));
        let p = b.child(root, NodePayload::element("p").with_marked(true));
        b.child(p, NodePayload::text("Intro"));
        let page = b.child(root, NodePayload::element("pagenum").with_text("1"));
        let section = b.child(root, NodePayload::element("section"));
        let h2 = b.child(section, NodePayload::element("h2").with_text("Next"));
        Doc {
            tree: b.build(),
            h1,
            h1_text,
            p,
            page,
            h2,
        }
    }

    #[test]
    fn build_selects_members_in_document_order() {
        let d = doc();
        let headings = IndexMaintainer::<HeadingPolicy>::new(&d.tree);
        assert_eq!(headings.nodes(), vec![d.h1, d.h2]);
        assert_eq!(headings.rebuild_count(), 1);
        assert!(!headings.is_empty_observable().get());

        let markers = IndexMaintainer::<MarkerPolicy>::new(&d.tree);
        assert_eq!(markers.nodes(), vec![d.p]);

        let pages = IndexMaintainer::<PagePolicy>::new(&d.tree);
        assert_eq!(pages.nodes(), vec![d.page]);
        assert_eq!(pages.label(&d.tree, d.page), Some("1"));
    }

    #[test]
    fn labels_are_lazy_and_invalidation_drops_them() {
        let d = doc();
        let mut headings = IndexMaintainer::<HeadingPolicy>::new(&d.tree);
        assert!(!headings.entries()[0].is_label_cached());
        assert_eq!(headings.label(&d.tree, d.h1), Some("Start"));
        assert_eq!(headings.entries()[0].cached_label(), Some("Start"));
        assert!(!headings.entries()[1].is_label_cached());

        headings.invalidate_containing(&d.tree, d.h1_text, false);
        assert!(!headings.entries()[0].is_label_cached());

        headings.label(&d.tree, d.h2);
        headings.invalidate_containing(&d.tree, d.h1_text, false);
        assert!(headings.entries()[1].is_label_cached());
        headings.invalidate_containing(&d.tree, d.h1_text, true);
        assert!(!headings.entries()[1].is_label_cached());
    }

    #[test]
    fn add_is_deduplicated_and_ordered() {
        let d = doc();
        let mut markers = IndexMaintainer::<MarkerPolicy>::new(&d.tree);
        assert_eq!(markers.add(&d.tree, d.p), Ok(false));
        assert_eq!(markers.add(&d.tree, d.h1), Ok(false));
        assert_eq!(markers.len(), 1);

        assert!(markers.remove(d.p));
        assert!(!markers.remove(d.p));
        assert!(markers.is_empty());
        assert!(markers.is_empty_observable().get());

        assert_eq!(markers.add(&d.tree, d.p), Ok(true));
        assert_eq!(markers.nodes(), vec![d.p]);
    }

    #[test]
    fn add_rejects_foreign_nodes() {
        let d = doc();
        let other = doc();
        let mut markers = IndexMaintainer::<MarkerPolicy>::new(&d.tree);
        assert_eq!(
            markers.add(&d.tree, other.p),
            Err(IndexError::UnknownNode {
                index: "markers",
                node: other.p,
            })
        );
    }

    #[test]
    fn detached_members_are_not_listed() {
        let mut d = doc();
        let loose = d
            .tree
            .create_node(NodePayload::element("h3").with_text("Loose"));
        let mut headings = IndexMaintainer::<HeadingPolicy>::new(&d.tree);
        assert_eq!(headings.add(&d.tree, loose), Ok(false));
        assert!(!headings.contains(loose));
    }

    #[test]
    fn revision_bumps_once_per_membership_change() {
        let d = doc();
        let mut markers = IndexMaintainer::<MarkerPolicy>::new(&d.tree);
        let revision = markers.revision();
        let seen = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&seen);
        let _sub = revision.subscribe(move |_| counter.set(counter.get() + 1));

        let start = revision.get();
        markers.rebuild(&d.tree);
        assert_eq!(revision.get(), start);
        markers.remove(d.p);
        assert_eq!(revision.get(), start + 1);
        markers.rebuild(&d.tree);
        assert_eq!(revision.get(), start + 2);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn search_is_case_insensitive_and_ordered() {
        let d = doc();
        let headings = IndexMaintainer::<HeadingPolicy>::new(&d.tree);
        assert_eq!(headings.search(&d.tree, "sTaRt"), vec![d.h1]);
        assert_eq!(headings.search(&d.tree, "t"), vec![d.h1, d.h2]);
        assert!(headings.search(&d.tree, "").is_empty());

        assert_eq!(headings.find_next(&d.tree, "t", None), Some(d.h1));
        assert_eq!(headings.find_next(&d.tree, "t", Some(d.h1)), Some(d.h2));
        assert_eq!(headings.find_next(&d.tree, "t", Some(d.h2)), None);
        assert_eq!(headings.find_next(&d.tree, "t", Some(d.p)), Some(d.h2));
        assert_eq!(headings.find_previous(&d.tree, "t", None), Some(d.h2));
        assert_eq!(headings.find_previous(&d.tree, "t", Some(d.h2)), Some(d.h1));
        assert_eq!(headings.find_previous(&d.tree, "t", Some(d.h1)), None);
    }

    #[test]
    fn mixed_composite_detection() {
        use CommandKind::*;
        assert!(!is_mixed(&[]));
        assert!(!is_mixed(&[Insert, Remove, Insert]));
        assert!(!is_mixed(&[SetMarked, SetMarked]));
        assert!(is_mixed(&[SetMarked, ChangeText]));
        assert!(is_mixed(&[Remove, SetMarked]));
    }
}
