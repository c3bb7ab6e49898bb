//! Per-render output tree.
//!
//! A page is assembled as a flat sequence of literal text nodes and shortcode
//! slots. Dispatch outcomes are written into their slot by index, so the
//! final HTML does not depend on the order in which dispatches complete, and
//! no render state is shared between two renders.

use pagekit_core::shortcode::{Segment, segments};
use pagekit_core::{Section, Shortcode};
use std::sync::Arc;

/// Where a shortcode sits in the page layout.
#[derive(Debug, Clone, Default)]
pub struct SlotPosition {
    /// Enclosing section, if any
    pub section: Option<Arc<Section>>,
    /// Row index inside the section
    pub row_index: usize,
    /// Column index inside the row
    pub column_index: usize,
}

impl SlotPosition {
    /// Position inside `section`.
    #[must_use]
    pub const fn new(section: Option<Arc<Section>>, row_index: usize, column_index: usize) -> Self {
        Self {
            section,
            row_index,
            column_index,
        }
    }
}

/// One shortcode occurrence awaiting its outcome.
#[derive(Debug, Clone)]
pub struct Slot {
    /// The parsed shortcode
    pub shortcode: Shortcode,
    /// Layout position
    pub position: SlotPosition,
    /// Text that replaces the token once resolved; the token stays otherwise
    pub replacement: Option<String>,
}

impl Slot {
    /// Whether the shortcode asked for the delayed pass.
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.shortcode.is_delayed()
    }
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Slot(usize),
}

/// Text and shortcode slots of one page, in document order.
#[derive(Debug, Clone, Default)]
pub struct RenderTree {
    nodes: Vec<Node>,
    slots: Vec<Slot>,
}

impl RenderTree {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append literal text.
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.nodes.last_mut() {
            last.push_str(text);
        } else {
            self.nodes.push(Node::Text(text.to_string()));
        }
    }

    /// Append a shortcode slot, returning its index.
    pub fn push_slot(&mut self, shortcode: Shortcode, position: SlotPosition) -> usize {
        let index = self.slots.len();
        self.slots.push(Slot {
            shortcode,
            position,
            replacement: None,
        });
        self.nodes.push(Node::Slot(index));
        index
    }

    /// Append `content`, turning each shortcode token into a slot at `position`.
    pub fn push_content(&mut self, content: &str, position: &SlotPosition) {
        for segment in segments(content) {
            match segment {
                Segment::Text(text) => self.push_text(text),
                Segment::Shortcode(shortcode) => {
                    self.push_slot(shortcode, position.clone());
                }
            }
        }
    }

    /// All slots, by index.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Number of slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Set the replacement of slot `index`; unknown indices are ignored.
    pub fn resolve(&mut self, index: usize, replacement: Option<String>) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.replacement = replacement;
        }
    }

    /// Assemble the HTML; unresolved slots keep their token text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut html = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => html.push_str(text),
                Node::Slot(index) => {
                    if let Some(slot) = self.slots.get(*index) {
                        html.push_str(slot.replacement.as_deref().unwrap_or(&slot.shortcode.code_text));
                    }
                }
            }
        }
        html
    }
}
