//! Content records and the page layout tree.
//!
//! Pages are read-only inputs to the render pipeline. They arrive as generic
//! [`ContentRecord`]s from the Data Service and are decoded into the typed
//! [`Page`] / [`Section`] / [`Row`] / [`Column`] tree.

use crate::module::ModuleDefinition;
use crate::shortcode::Shortcode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure to decode a content record into a layout type.
#[derive(Error, Debug)]
#[error("Content '{id}' is not a valid {kind}: {reason}")]
pub struct ContentDecodeError {
    /// Record id
    pub id: String,
    /// Expected layout type
    pub kind: &'static str,
    /// Decoder message
    pub reason: String,
}

/// A generic content item as stored by the Data Service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    /// Unique id
    pub id: String,
    /// Content type system id (e.g. `page`, `section`, `faq`)
    #[serde(default)]
    pub content_type_id: String,
    /// Public URL, for routable content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free-form fields
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<DateTime<Utc>>,
}

impl ContentRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new(id: impl Into<String>, content_type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_type_id: content_type_id.into(),
            url: None,
            data: Map::new(),
            updated_on: None,
        }
    }

    /// Set the URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set a data field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Read a data field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Read a string data field.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, kind: &'static str) -> Result<T, ContentDecodeError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| ContentDecodeError {
            id: self.id.clone(),
            kind,
            reason: e.to_string(),
        })
    }
}

/// Information about the inbound request a render serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Requested URL path
    pub url: String,
    /// Session id forwarded to the Data Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Authenticated user, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Query string parameters
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

impl RequestContext {
    /// Request for `url` without session or user.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Attach a session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Session id as a borrowed option.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Page-level assets contributed during a render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAssets {
    /// Inline snippets for the document head
    #[serde(default)]
    pub header_js: Vec<String>,
    /// Script URLs
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Stylesheet URLs
    #[serde(default)]
    pub stylesheets: Vec<String>,
}

impl PageAssets {
    /// Whether nothing was contributed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header_js.is_empty() && self.scripts.is_empty() && self.stylesheets.is_empty()
    }

    /// Append `other`, skipping entries already present.
    pub fn merge(&mut self, other: Self) {
        fn extend_unique(target: &mut Vec<String>, items: Vec<String>) {
            for item in items {
                if !target.contains(&item) {
                    target.push(item);
                }
            }
        }
        extend_unique(&mut self.header_js, other.header_js);
        extend_unique(&mut self.scripts, other.scripts);
        extend_unique(&mut self.stylesheets, other.stylesheets);
    }
}

/// A structured shortcode placed in a column by the page builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Module shortcode name
    pub name: String,
    /// Attributes
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Block {
    /// The equivalent shortcode.
    #[must_use]
    pub fn to_shortcode(&self) -> Shortcode {
        Shortcode::new(&self.name, self.properties.clone())
    }
}

/// A column: free text with embedded shortcodes, then structured blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Element id, used by modules to locate sibling columns
    #[serde(default)]
    pub id: String,
    /// CSS class
    #[serde(default)]
    pub class: String,
    /// Body text, may contain shortcode tokens
    #[serde(default)]
    pub content: String,
    /// Structured blocks rendered after `content`
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Column {
    /// Whether the column has neither text nor blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.blocks.is_empty()
    }
}

/// A row of columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// CSS class
    #[serde(default)]
    pub class: String,
    /// Columns, left to right
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// A page section: either raw content or a grid of rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Section id
    #[serde(default)]
    pub id: String,
    /// Title shown in the page builder
    #[serde(default)]
    pub title: String,
    /// Extra CSS class for the section element
    #[serde(default)]
    pub css_class: String,
    /// Raw content; when present, rows are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Rows, top to bottom
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Section {
    /// Decode a section content record.
    ///
    /// # Errors
    ///
    /// Returns [`ContentDecodeError`] when the record's fields do not match
    /// the section shape.
    pub fn from_record(record: &ContentRecord) -> Result<Self, ContentDecodeError> {
        let mut section: Self = record.decode("section")?;
        section.id.clone_from(&record.id);
        Ok(section)
    }

    /// Find a column by id anywhere in the section.
    #[must_use]
    pub fn column(&self, id: &str) -> Option<&Column> {
        self.rows
            .iter()
            .flat_map(|row| row.columns.iter())
            .find(|column| column.id == id)
    }
}

/// Fields of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    /// Page title
    #[serde(default)]
    pub title: String,
    /// Ids of section records, in order
    #[serde(default)]
    pub layout: Vec<String>,
    /// Inline rows, used when `layout` is empty
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Body HTML; after rendering, the assembled page HTML
    #[serde(default)]
    pub html: String,
    /// Markup injected into the document head
    #[serde(default)]
    pub header_js: String,
    /// Script tags
    #[serde(default)]
    pub js_links: String,
    /// Stylesheet tags
    #[serde(default)]
    pub css_links: String,
    /// Assets collected from shortcodes during the render
    #[serde(default)]
    pub assets: PageAssets,
    /// CSS class of the page body
    #[serde(default)]
    pub page_css_class: String,
    /// Page template id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_template: Option<String>,
    /// `<title>` override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_title: Option<String>,
    /// Started modules, filled in by the renderer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleDefinition>,
    /// Started modules the page builder may place in columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules_for_columns: Vec<ModuleDefinition>,
    /// Whether the request may open the page builder
    #[serde(default)]
    pub show_page_builder: bool,
    /// Any other field
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A page to render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Page id
    pub id: String,
    /// Public URL
    #[serde(default)]
    pub url: String,
    /// Page fields
    pub data: PageData,
}

impl Page {
    /// A page whose body is `html`.
    #[must_use]
    pub fn from_html(id: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: String::new(),
            data: PageData {
                html: html.into(),
                ..PageData::default()
            },
        }
    }

    /// Decode a page content record.
    ///
    /// # Errors
    ///
    /// Returns [`ContentDecodeError`] when the record's fields do not match
    /// the page shape.
    pub fn from_record(record: &ContentRecord) -> Result<Self, ContentDecodeError> {
        Ok(Self {
            id: record.id.clone(),
            url: record.url.clone().unwrap_or_default(),
            data: record.decode("page")?,
        })
    }
}
