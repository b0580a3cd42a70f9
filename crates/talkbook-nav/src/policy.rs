#![forbid(unsafe_code)]

//! Membership and label rules for the three navigation indexes.
//!
//! A policy is stateless: it answers from the tree as it is *now*. The
//! maintainer adds the "attached to the document" requirement on top, so
//! policies never need to look at ancestry.

use talkbook_core::{NodeId, Tree};

/// Longest marker description, in characters, before truncation.
pub const MARKER_LABEL_MAX_CHARS: usize = 40;

/// Rules deciding which nodes an index lists and what it shows for them.
pub trait IndexPolicy {
    /// Short name used in logs and errors.
    const NAME: &'static str;

    fn qualifies(tree: &Tree, node: NodeId) -> bool;

    fn label(tree: &Tree, node: NodeId) -> String;
}

/// Collapse runs of whitespace and trim both ends.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Headings
// ============================================================================

/// `h1`..`h6`, `hd` and `levelhd` elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadingPolicy;

impl HeadingPolicy {
    /// Heading level: the digit of `h1`..`h6`, 0 for `hd`/`levelhd`, `None`
    /// for non-headings.
    #[must_use]
    pub fn level(tree: &Tree, node: NodeId) -> Option<u8> {
        let name = tree.element_name(node)?.to_ascii_lowercase();
        match name.as_str() {
            "hd" | "levelhd" => Some(0),
            _ => {
                let digit = name.strip_prefix('h')?;
                match digit.parse::<u8>() {
                    Ok(level @ 1..=6) if digit.len() == 1 => Some(level),
                    _ => None,
                }
            }
        }
    }
}

impl IndexPolicy for HeadingPolicy {
    const NAME: &'static str = "headings";

    fn qualifies(tree: &Tree, node: NodeId) -> bool {
        Self::level(tree, node).is_some()
    }

    fn label(tree: &Tree, node: NodeId) -> String {
        normalize_whitespace(&tree.flattened_text(node))
    }
}

// ============================================================================
// Pages
// ============================================================================

/// Page-break markers: `pagenum` elements or `epub:type="pagebreak"`, with
/// something to show (an `id` or some text).
#[derive(Debug, Clone, Copy, Default)]
pub struct PagePolicy;

impl PagePolicy {
    fn is_page_break(tree: &Tree, node: NodeId) -> bool {
        let Some(payload) = tree.payload(node) else {
            return false;
        };
        payload.is_element("pagenum")
            || payload
                .attribute("epub:type")
                .is_some_and(|t| t.eq_ignore_ascii_case("pagebreak"))
    }

    fn id(tree: &Tree, node: NodeId) -> Option<&str> {
        tree.payload(node)?
            .attribute("id")
            .filter(|id| !id.trim().is_empty())
    }
}

impl IndexPolicy for PagePolicy {
    const NAME: &'static str = "pages";

    fn qualifies(tree: &Tree, node: NodeId) -> bool {
        Self::is_page_break(tree, node)
            && (Self::id(tree, node).is_some() || !tree.flattened_text(node).trim().is_empty())
    }

    fn label(tree: &Tree, node: NodeId) -> String {
        let text = normalize_whitespace(&tree.flattened_text(node));
        if text.is_empty() {
            Self::id(tree, node).unwrap_or_default().to_string()
        } else {
            text
        }
    }
}

// ============================================================================
// Markers
// ============================================================================

/// Nodes with the `marked` flag set.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerPolicy;

impl IndexPolicy for MarkerPolicy {
    const NAME: &'static str = "markers";

    fn qualifies(tree: &Tree, node: NodeId) -> bool {
        tree.is_marked(node)
    }

    /// `"<element>: <text>"`, text cut to [`MARKER_LABEL_MAX_CHARS`] plus
    /// `...`.
    fn label(tree: &Tree, node: NodeId) -> String {
        let mut text = normalize_whitespace(&tree.flattened_text(node));
        if let Some((cut, _)) = text.char_indices().nth(MARKER_LABEL_MAX_CHARS) {
            text.truncate(cut);
            text.push_str("...");
        }
        match tree.element_name(node) {
            Some(name) => format!("{name}: {text}"),
            None => text,
        }
    }
}
