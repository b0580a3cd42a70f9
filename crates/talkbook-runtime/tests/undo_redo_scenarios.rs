#![forbid(unsafe_code)]

//! End-to-end undo/redo scenarios through [`Presentation`].
//!
//! Covers:
//! - Undo of every command kind restores the exact tree; redo restores the
//!   edited tree.
//! - Unhooking is idempotent and stops delivery.
//! - A new edit after undo clears the redo stack.
//! - A transaction undoes and redoes as one unit.
//! - Cancelling a transaction restores the tree and reports a trailing-edge
//!   composite.
//! - Notice flags match the event table for a full session.
//!
//! Run:
//!   cargo test -p talkbook-runtime --test undo_redo_scenarios

use std::cell::RefCell;
use std::rc::Rc;

use talkbook_core::{CommandKind, NodeId, NodePayload, Tree, TreeBuilder};
use talkbook_runtime::{
    ChangeNotice, HookError, HookHost, HistoryConfig, Presentation, RuntimeConfig,
    TransactionInfo, UndoRedoEvent,
};

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

struct Doc {
    doc: Presentation,
    chapter: NodeId,
    heading: NodeId,
    heading_text: NodeId,
    para: NodeId,
}

/// body > section(chapter) > [h1 > "Intro", p > "Body"]
fn doc() -> Doc {
    init_tracing();
    let mut b = TreeBuilder::new(NodePayload::element("body"));
    let root = b.root();
    let chapter = b.child(root, NodePayload::element("section"));
    let heading = b.child(chapter, NodePayload::element("h1"));
    let heading_text = b.child(heading, NodePayload::text("Intro"));
    let para = b.child(chapter, NodePayload::element("p"));
    b.child(para, NodePayload::text("Body"));
    let mut config = RuntimeConfig::default();
    config.history = HistoryConfig::unlimited();
    Doc {
        doc: Presentation::with_config(b.build(), config),
        chapter,
        heading,
        heading_text,
        para,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    event: UndoRedoEvent,
    kind: CommandKind,
    done: bool,
    end: bool,
    trailing: bool,
}

#[derive(Default)]
struct Recorder {
    seen: Vec<Seen>,
}

impl HookHost for Recorder {
    fn on_undo_redo_manager_changed(
        &mut self,
        _tree: &Tree,
        notice: &ChangeNotice<'_>,
    ) -> Result<(), HookError> {
        self.seen.push(Seen {
            event: notice.event,
            kind: notice.command.kind(),
            done: notice.done,
            end: notice.is_transaction_end_event,
            trailing: notice.is_no_transaction_or_trailing_edge,
        });
        Ok(())
    }

    fn host_name(&self) -> &str {
        "recorder"
    }
}

fn seen(event: UndoRedoEvent, kind: CommandKind, done: bool, end: bool, trailing: bool) -> Seen {
    Seen {
        event,
        kind,
        done,
        end,
        trailing,
    }
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn every_command_kind_round_trips() {
    let mut d = doc();
    let initial = d.doc.tree().snapshot();

    let text = d
        .doc
        .command_factory()
        .create_tree_node_change_text_command(d.doc.tree(), d.heading_text, "Preface")
        .unwrap();
    d.doc.execute(text).unwrap();

    let mark = d
        .doc
        .command_factory()
        .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, true)
        .unwrap();
    d.doc.execute(mark).unwrap();

    let fresh = d.doc.create_node(NodePayload::element("h2").with_text("New"));
    let insert = d
        .doc
        .command_factory()
        .create_tree_node_insert_command(d.doc.tree(), fresh, d.chapter, 1)
        .unwrap();
    d.doc.execute(insert).unwrap();

    let remove = d
        .doc
        .command_factory()
        .create_tree_node_remove_command(d.doc.tree(), d.heading)
        .unwrap();
    d.doc.execute(remove).unwrap();

    let edited = d.doc.tree().snapshot();
    assert_ne!(edited, initial);

    while d.doc.undo().unwrap().is_some() {}
    assert_eq!(d.doc.tree().snapshot(), initial);
    assert!(d.doc.tree().check_invariants().is_ok());

    while d.doc.redo().unwrap().is_some() {}
    assert_eq!(d.doc.tree().snapshot(), edited);
}

#[test]
fn undo_of_removal_reinserts_at_original_index() {
    let mut d = doc();
    let remove = d
        .doc
        .command_factory()
        .create_tree_node_remove_command(d.doc.tree(), d.heading)
        .unwrap();
    d.doc.execute(remove).unwrap();
    assert_eq!(d.doc.tree().children(d.chapter), &[d.para]);
    assert!(!d.doc.tree().is_attached(d.heading_text));

    d.doc.undo().unwrap();
    assert_eq!(d.doc.tree().children(d.chapter), &[d.heading, d.para]);
    assert_eq!(d.doc.tree().child_index(d.heading), Some(0));
    assert!(d.doc.tree().is_attached(d.heading_text));
}

#[test]
fn new_edit_after_undo_clears_redo() {
    let mut d = doc();
    let mark = d
        .doc
        .command_factory()
        .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, true)
        .unwrap();
    d.doc.execute(mark).unwrap();
    d.doc.undo().unwrap();
    assert!(d.doc.undo_redo_manager().can_redo());

    let text = d
        .doc
        .command_factory()
        .create_tree_node_change_text_command(d.doc.tree(), d.heading_text, "Other")
        .unwrap();
    d.doc.execute(text).unwrap();
    assert!(!d.doc.undo_redo_manager().can_redo());
    assert_eq!(d.doc.redo().unwrap(), None);
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn unhook_is_idempotent_and_stops_delivery() {
    let mut d = doc();
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let mut hooker = d.doc.hook(Rc::clone(&recorder), false);

    let mark = d
        .doc
        .command_factory()
        .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, true)
        .unwrap();
    d.doc.execute(mark).unwrap();
    assert_eq!(recorder.borrow().seen.len(), 1);

    hooker.unhook();
    hooker.unhook();
    assert!(!hooker.is_hooked());

    d.doc.undo().unwrap();
    assert_eq!(recorder.borrow().seen.len(), 1);
}

#[test]
fn host_can_unhook_itself_during_notification() {
    struct OneShot {
        hooker: Option<talkbook_runtime::Hooker>,
        calls: usize,
    }
    impl HookHost for OneShot {
        fn on_undo_redo_manager_changed(
            &mut self,
            _tree: &Tree,
            _notice: &ChangeNotice<'_>,
        ) -> Result<(), HookError> {
            self.calls += 1;
            if let Some(mut hooker) = self.hooker.take() {
                hooker.unhook();
            }
            Ok(())
        }
    }

    let mut d = doc();
    let host = Rc::new(RefCell::new(OneShot {
        hooker: None,
        calls: 0,
    }));
    let hooker = d.doc.hook(Rc::clone(&host), false);
    host.borrow_mut().hooker = Some(hooker);

    for marked in [true, false] {
        let mark = d
            .doc
            .command_factory()
            .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, marked)
            .unwrap();
        d.doc.execute(mark).unwrap();
    }
    assert_eq!(host.borrow().calls, 1);
    assert_eq!(d.doc.undo_redo_manager().hook_count(), 0);
}

#[test]
fn full_session_flag_sequence() {
    let mut d = doc();
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let _hooker = d.doc.hook(Rc::clone(&recorder), false);

    let mark = d
        .doc
        .command_factory()
        .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, true)
        .unwrap();
    d.doc.execute(mark).unwrap();

    d.doc
        .start_transaction(TransactionInfo::new("Rename", "Rename chapter"))
        .unwrap();
    let text = d
        .doc
        .command_factory()
        .create_tree_node_change_text_command(d.doc.tree(), d.heading_text, "One")
        .unwrap();
    d.doc.execute(text).unwrap();
    d.doc.end_transaction().unwrap();

    d.doc.undo().unwrap();
    d.doc.redo().unwrap();

    d.doc
        .start_transaction(TransactionInfo::new("Drop", "Dropped"))
        .unwrap();
    let unmark = d
        .doc
        .command_factory()
        .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, false)
        .unwrap();
    d.doc.execute(unmark).unwrap();
    d.doc.cancel_transaction().unwrap();

    use CommandKind::*;
    use UndoRedoEvent::*;
    assert_eq!(
        recorder.borrow().seen,
        vec![
            seen(CommandDone, SetMarked, true, false, true),
            seen(CommandDone, ChangeText, true, false, false),
            seen(TransactionEnded, Composite, true, true, true),
            seen(CommandUnDone, Composite, false, false, true),
            seen(CommandReDone, Composite, true, false, true),
            seen(CommandDone, SetMarked, true, false, false),
            seen(TransactionCancelled, Composite, false, true, true),
        ]
    );
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn transaction_is_atomic_for_undo_and_redo() {
    let mut d = doc();
    let initial = d.doc.tree().snapshot();
    let para = d.para;
    let heading_text = d.heading_text;

    d.doc
        .run_transaction(TransactionInfo::new("Edit", "Edit chapter"), |doc| {
            let mark = doc
                .command_factory()
                .create_tree_node_set_is_marked_command(doc.tree(), para, true)?;
            doc.execute(mark)?;
            let text = doc
                .command_factory()
                .create_tree_node_change_text_command(doc.tree(), heading_text, "Renamed")?;
            doc.execute(text)
        })
        .unwrap();
    let edited = d.doc.tree().snapshot();
    assert_eq!(d.doc.undo_redo_manager().undo_depth(), 1);

    assert_eq!(d.doc.undo().unwrap().as_deref(), Some("Edit"));
    assert_eq!(d.doc.tree().snapshot(), initial);

    d.doc.redo().unwrap();
    assert_eq!(d.doc.tree().snapshot(), edited);
}

#[test]
fn cancel_restores_tree_and_history() {
    let mut d = doc();
    let mark = d
        .doc
        .command_factory()
        .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, true)
        .unwrap();
    d.doc.execute(mark).unwrap();
    let before = d.doc.tree().snapshot();

    d.doc
        .start_transaction(TransactionInfo::new("Scratch", "Scratch"))
        .unwrap();
    let remove = d
        .doc
        .command_factory()
        .create_tree_node_remove_command(d.doc.tree(), d.chapter)
        .unwrap();
    d.doc.execute(remove).unwrap();
    let unmark = d
        .doc
        .command_factory()
        .create_tree_node_set_is_marked_command(d.doc.tree(), d.para, false)
        .unwrap();
    d.doc.execute(unmark).unwrap();
    d.doc.cancel_transaction().unwrap();

    assert_eq!(d.doc.tree().snapshot(), before);
    assert_eq!(d.doc.undo_redo_manager().undo_depth(), 1);
    assert_eq!(d.doc.undo_redo_manager().next_undo_description(), Some("Mark"));
}
