//! Shortcode tokens embedded in stored content.
//!
//! A shortcode is a bracket-delimited token naming a module and carrying
//! string attributes:
//!
//! ```text
//! [FAQ id="42" contentType="faq-item"]
//! [block id='7' /]
//! ```
//!
//! Names are matched case-insensitively and stored uppercased. Anything that
//! does not match the grammar (unterminated brackets, bare attributes,
//! unquoted values) is not a shortcode and stays plain text.
//!
//! Inside attribute values `&quot;` reads as `"`, so a value holding both
//! quote characters survives a round trip through token text.

use once_cell::sync::Lazy;
use regex::{CaptureMatches, Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property that defers a shortcode to the delayed dispatch pass.
pub const DELAYED_PROCESSING: &str = "delayedProcessing";

#[allow(clippy::expect_used)] // Constant pattern, covered by tests
static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\[([A-Za-z][A-Za-z0-9_-]*)((?:\s+[A-Za-z_][A-Za-z0-9_:.-]*\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*/?\]"#,
    )
    .expect("shortcode token pattern is valid")
});

#[allow(clippy::expect_used)] // Constant pattern, covered by tests
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("shortcode attribute pattern is valid")
});

/// One shortcode occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortcode {
    /// Uppercased module identifier
    pub name: String,
    /// Attribute values, always strings
    pub properties: BTreeMap<String, String>,
    /// The verbatim token, used for in-place substitution
    pub code_text: String,
}

impl Shortcode {
    /// Build a shortcode from structured parts, synthesising its token text.
    #[must_use]
    pub fn new(name: &str, properties: BTreeMap<String, String>) -> Self {
        let name = name.to_uppercase();
        let code_text = render_token(&name, &properties);
        Self {
            name,
            properties,
            code_text,
        }
    }

    /// Add or replace a property, keeping `code_text` in sync.
    #[must_use]
    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self.code_text = render_token(&self.name, &self.properties);
        self
    }

    /// Raw property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The `id` property most modules key their content on.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.property("id")
    }

    /// Property interpreted as a boolean (`true/false`, `yes/no`, `1/0`).
    #[must_use]
    pub fn property_bool(&self, key: &str) -> Option<bool> {
        match self.property(key)?.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        }
    }

    /// Property interpreted as an integer.
    #[must_use]
    pub fn property_i64(&self, key: &str) -> Option<i64> {
        self.property(key)?.trim().parse().ok()
    }

    /// Whether the shortcode asks to be processed after all others.
    ///
    /// Any value except an explicit false counts.
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.properties.contains_key(DELAYED_PROCESSING)
            && self.property_bool(DELAYED_PROCESSING) != Some(false)
    }

    /// Serialise back to token syntax.
    #[must_use]
    pub fn to_code_text(&self) -> String {
        render_token(&self.name, &self.properties)
    }

    fn from_captures(captures: &Captures<'_>) -> Option<Self> {
        let token = captures.get(0)?;
        let name = captures.get(1)?.as_str().to_uppercase();
        let properties = captures
            .get(2)
            .map(|attrs| parse_attributes(attrs.as_str()))
            .unwrap_or_default();
        Some(Self {
            name,
            properties,
            code_text: token.as_str().to_string(),
        })
    }
}

impl fmt::Display for Shortcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code_text)
    }
}

const QUOT: &str = "&quot;";

fn parse_attributes(attrs: &str) -> BTreeMap<String, String> {
    ATTRIBUTE
        .captures_iter(attrs)
        .filter_map(|c| {
            let key = c.get(1)?.as_str().to_string();
            let value = c.get(2).or_else(|| c.get(3))?.as_str().replace(QUOT, "\"");
            Some((key, value))
        })
        .collect()
}

fn render_token(name: &str, properties: &BTreeMap<String, String>) -> String {
    let mut token = format!("[{name}");
    for (key, value) in properties {
        if value.contains('"') && !value.contains('\'') {
            token.push_str(&format!(" {key}='{value}'"));
        } else {
            token.push_str(&format!(" {key}=\"{}\"", value.replace('"', QUOT)));
        }
    }
    token.push(']');
    token
}

/// Lazy iterator over the shortcodes of a content string, in document order.
///
/// Created by [`parse`]. Holds no state beyond the scan position, so parsing
/// the same string again yields the same sequence.
pub struct Shortcodes<'h> {
    matches: CaptureMatches<'static, 'h>,
}

impl Iterator for Shortcodes<'_> {
    type Item = Shortcode;

    fn next(&mut self) -> Option<Self::Item> {
        self.matches
            .by_ref()
            .find_map(|captures| Shortcode::from_captures(&captures))
    }
}

/// Scan `content` for shortcode tokens.
#[must_use]
pub fn parse(content: &str) -> Shortcodes<'_> {
    Shortcodes {
        matches: TOKEN.captures_iter(content),
    }
}

/// A piece of content: literal text or a shortcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'h> {
    /// Text between shortcodes, borrowed from the input
    Text(&'h str),
    /// A recognised shortcode
    Shortcode(Shortcode),
}

/// Lazy iterator splitting content into [`Segment`]s. Created by [`segments`].
pub struct Segments<'h> {
    content: &'h str,
    matches: CaptureMatches<'static, 'h>,
    cursor: usize,
    pending: Option<Shortcode>,
}

impl<'h> Iterator for Segments<'h> {
    type Item = Segment<'h>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(shortcode) = self.pending.take() {
            return Some(Segment::Shortcode(shortcode));
        }

        for captures in self.matches.by_ref() {
            let (Some(token), Some(shortcode)) = (captures.get(0), Shortcode::from_captures(&captures))
            else {
                continue;
            };
            let text = &self.content[self.cursor..token.start()];
            self.cursor = token.end();
            if text.is_empty() {
                return Some(Segment::Shortcode(shortcode));
            }
            self.pending = Some(shortcode);
            return Some(Segment::Text(text));
        }

        if self.cursor < self.content.len() {
            let rest = &self.content[self.cursor..];
            self.cursor = self.content.len();
            return Some(Segment::Text(rest));
        }
        None
    }
}

/// Split `content` into literal text and shortcodes, in document order.
///
/// Concatenating the text segments and each shortcode's `code_text` gives
/// back the input exactly.
#[must_use]
pub fn segments(content: &str) -> Segments<'_> {
    Segments {
        content,
        matches: TOKEN.captures_iter(content),
        cursor: 0,
        pending: None,
    }
}
