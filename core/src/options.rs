//! Per-shortcode processing state.
//!
//! A [`ProcessingOptions`] value is created for every shortcode occurrence and
//! threaded through the whole dispatch lifecycle as the mutable payload of the
//! shortcode events. It is never shared between two shortcodes.

use crate::content::{ContentRecord, Page, PageAssets, RequestContext, Section};
use crate::shortcode::Shortcode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Data assembled for one shortcode's template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    /// Id of the content the view-model was built from
    pub id: String,
    /// Content type of that content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Template data, enriched by successive handlers
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ViewModel {
    /// Empty view-model for `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set a data field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    /// Read a data field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

impl From<ContentRecord> for ViewModel {
    fn from(record: ContentRecord) -> Self {
        Self {
            id: record.id,
            content_type: Some(record.content_type_id).filter(|t| !t.is_empty()),
            data: record.data,
        }
    }
}

/// Rendered module output, exposed to post-render handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedHtml {
    /// View-model id
    pub id: String,
    /// Owning module
    pub content_type: String,
    /// Shortcode name
    pub shortcode_name: String,
    /// Rendered fragment
    pub body: String,
}

/// Cooperative cancellation shared by every shortcode of one render.
///
/// A signal is triggered either explicitly through [`cancel`](Self::cancel) or
/// when its deadline passes. Clones share the cancel flag.
#[derive(Debug, Clone, Default)]
pub struct RenderSignal {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RenderSignal {
    /// A signal that never triggers on its own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger once `deadline` has passed.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Trigger once `timeout` has elapsed from now.
    ///
    /// A timeout too large to represent as an instant sets no deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested explicitly.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the render should stop dispatching.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// State threaded through one shortcode's lifecycle.
///
/// `module_name` is set when a module claims the shortcode, before any
/// enrichment handler runs. `view_model` fills up as it passes through the
/// data stages; handlers must tolerate partially populated data.
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    /// The shortcode being processed
    pub shortcode: Shortcode,
    /// Claiming module, once known
    pub module_name: Option<String>,
    /// Template data
    pub view_model: Option<ViewModel>,
    /// The inbound request
    pub req: Arc<RequestContext>,
    /// The page being rendered, when rendering a page
    pub page: Option<Arc<Page>>,
    /// The enclosing section, when inside one
    pub section: Option<Arc<Section>>,
    /// Row position inside the section
    pub row_index: usize,
    /// Column position inside the row
    pub column_index: usize,
    /// Module output, set after the view render
    pub processed_html: Option<ProcessedHtml>,
    /// Page assets this shortcode contributes
    pub assets: PageAssets,
    /// Whether this occurrence runs in the delayed pass
    pub delayed: bool,
    /// Cancellation for the enclosing render
    pub signal: RenderSignal,
}

impl ProcessingOptions {
    /// Options for `shortcode` served to `req`.
    #[must_use]
    pub fn new(shortcode: Shortcode, req: Arc<RequestContext>) -> Self {
        Self {
            shortcode,
            module_name: None,
            view_model: None,
            req,
            page: None,
            section: None,
            row_index: 0,
            column_index: 0,
            processed_html: None,
            assets: PageAssets::default(),
            delayed: false,
            signal: RenderSignal::default(),
        }
    }

    /// Attach the page being rendered.
    #[must_use]
    pub fn with_page(mut self, page: Arc<Page>) -> Self {
        self.page = Some(page);
        self
    }

    /// Record the shortcode's position in the layout.
    #[must_use]
    pub fn at(mut self, section: Option<Arc<Section>>, row_index: usize, column_index: usize) -> Self {
        self.section = section;
        self.row_index = row_index;
        self.column_index = column_index;
        self
    }

    /// Pre-seed the view-model; the default loader keeps it.
    #[must_use]
    pub fn with_view_model(mut self, view_model: ViewModel) -> Self {
        self.view_model = Some(view_model);
        self
    }

    /// Share the render's cancellation signal.
    #[must_use]
    pub fn with_signal(mut self, signal: RenderSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Mark for the delayed pass.
    #[must_use]
    pub const fn delayed(mut self, delayed: bool) -> Self {
        self.delayed = delayed;
        self
    }

    /// The view-model, created empty (keyed on the shortcode id) if absent.
    pub fn view_model_mut(&mut self) -> &mut ViewModel {
        let id = self.shortcode.id().unwrap_or_default().to_string();
        self.view_model.get_or_insert_with(|| ViewModel::new(id))
    }

    /// The column this shortcode sits in, if inside a section.
    #[must_use]
    pub fn column(&self) -> Option<&crate::content::Column> {
        self.section
            .as_ref()?
            .rows
            .get(self.row_index)?
            .columns
            .get(self.column_index)
    }
}
