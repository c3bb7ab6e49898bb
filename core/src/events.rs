//! The pipeline's event table.
//!
//! Event names are the wire protocol between the pipeline and every module,
//! so they keep the names modules have always subscribed to.

use crate::content::{Page, RequestContext};
use crate::event_bus::Event;
use crate::options::ProcessingOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// First event of a shortcode's lifecycle; the owning module claims it here.
pub const BEGIN_PROCESS_MODULE_SHORTCODE: Event<ProcessingOptions> = Event::new("beginProcessModuleShortCode");

/// Replaces [`BEGIN_PROCESS_MODULE_SHORTCODE`] for shortcodes in the delayed pass.
pub const BEGIN_PROCESS_MODULE_SHORTCODE_DELAYED: Event<ProcessingOptions> =
    Event::new("beginProcessModuleShortCodeDelayed");

/// Emitted once the view-model has been loaded.
pub const POST_MODULE_GET_DATA: Event<ProcessingOptions> = Event::new("postModuleGetData");

/// Secondary enrichment stage.
pub const POST_MODULE_GET_DATA_2: Event<ProcessingOptions> = Event::new("postModuleGetData2");

/// Last chance to alter the view-model before the view renders.
pub const ALTER_MODULE_VIEW_MODEL: Event<ProcessingOptions> = Event::new("alterModuleViewModule");

/// Emitted after the view rendered; `processed_html` is set.
pub const POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML: Event<ProcessingOptions> =
    Event::new("postProcessModuleShortCodeProcessedHtml");

/// Before a URL is resolved to a page; handlers may rewrite `url`.
pub const PRE_PROCESS_PAGE_URL_LOOKUP: Event<RequestContext> = Event::new("preProcessPageUrlLookup");

/// After the page record has been loaded.
pub const POST_PAGE_DATA_FETCH: Event<PageContext> = Event::new("postPageDataFetch");

/// Before the page's sections are walked.
pub const PRE_PROCESS_SECTIONS: Event<PageContext> = Event::new("preProcessSections");

/// After every shortcode of the page has been resolved.
pub const GET_RENDERED_PAGE_POST_DATA_FETCH: Event<PageContext> = Event::new("getRenderedPagePostDataFetch");

/// Right before the rendered page is returned.
pub const PRE_RENDER: Event<PageContext> = Event::new("preRender");

/// Once, after every module has started.
pub const MODULES_LOADED: Event<ModulesLoaded> = Event::new("modulesLoaded");

/// Emitted by the form-submission collaborator.
pub const AFTER_FORM_SUBMIT: Event<FormSubmission> = Event::new("afterFormSubmit");

/// Emitted by HTTP middleware at the start of a request.
pub const REQUEST_BEGIN: Event<RequestBegin> = Event::new("requestBegin");

/// The per-shortcode stages, in the order the dispatcher runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortcodeStage {
    /// Claim ([`BEGIN_PROCESS_MODULE_SHORTCODE`])
    Begin,
    /// Claim in the delayed pass
    BeginDelayed,
    /// [`POST_MODULE_GET_DATA`]
    PostModuleGetData,
    /// [`POST_MODULE_GET_DATA_2`]
    PostModuleGetData2,
    /// [`ALTER_MODULE_VIEW_MODEL`]
    AlterViewModel,
    /// [`POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML`]
    PostProcessHtml,
}

impl ShortcodeStage {
    /// Enrichment stages run between the data load and the view render.
    pub const ENRICHMENT: [Self; 3] = [Self::PostModuleGetData, Self::PostModuleGetData2, Self::AlterViewModel];

    /// The claim stage for a normal or delayed pass.
    #[must_use]
    pub const fn begin(delayed: bool) -> Self {
        if delayed { Self::BeginDelayed } else { Self::Begin }
    }

    /// The bus event backing this stage.
    #[must_use]
    pub const fn event(self) -> Event<ProcessingOptions> {
        match self {
            Self::Begin => BEGIN_PROCESS_MODULE_SHORTCODE,
            Self::BeginDelayed => BEGIN_PROCESS_MODULE_SHORTCODE_DELAYED,
            Self::PostModuleGetData => POST_MODULE_GET_DATA,
            Self::PostModuleGetData2 => POST_MODULE_GET_DATA_2,
            Self::AlterViewModel => ALTER_MODULE_VIEW_MODEL,
            Self::PostProcessHtml => POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML,
        }
    }
}

/// Payload of the page-level events.
#[derive(Debug, Clone)]
pub struct PageContext {
    /// The inbound request
    pub req: Arc<RequestContext>,
    /// The page, mutable by handlers
    pub page: Page,
}

impl PageContext {
    /// Wrap `page` for `req`.
    #[must_use]
    pub const fn new(req: Arc<RequestContext>, page: Page) -> Self {
        Self { req, page }
    }
}

/// Payload of [`MODULES_LOADED`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulesLoaded {
    /// System ids of the started modules, in start order
    pub modules: Vec<String>,
}

/// Payload of [`AFTER_FORM_SUBMIT`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    /// Content type of the submitted form
    pub content_type: String,
    /// Submitted fields
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Payload of [`REQUEST_BEGIN`].
///
/// The HTTP response stays with the host. `handled` is the only part of it
/// handlers see: a handler that answered the request itself sets it, and the
/// host then skips the page render.
#[derive(Debug, Clone)]
pub struct RequestBegin {
    /// The inbound request
    pub req: Arc<RequestContext>,
    /// Set by a handler that fully answered the request
    pub handled: bool,
}

impl RequestBegin {
    /// An unhandled request.
    #[must_use]
    pub const fn new(req: Arc<RequestContext>) -> Self {
        Self { req, handled: false }
    }
}
