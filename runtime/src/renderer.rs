//! Page and section renderer.
//!
//! Rendering a page runs, in order:
//!
//! 1. `preProcessPageUrlLookup` (URL renders only), then the page lookup
//! 2. `postPageDataFetch`, the page template merge, then `preProcessSections`
//! 3. Layout walk: page body, then sections, rows and columns, building a
//!    [`RenderTree`] with one slot per shortcode
//! 4. Shortcode pass over every slot, then the delayed pass
//! 5. Module metadata is attached, then `getRenderedPagePostDataFetch` and
//!    `preRender`
//!
//! Shortcode failures are contained in their slot. Page hook failures are
//! logged and counted, and the render carries on.

use crate::cache::RenderCache;
use crate::config::RenderConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::metrics::{DispatchMetrics, RenderMetrics};
use crate::tree::{RenderTree, SlotPosition};
use futures::stream::{self, StreamExt};
use pagekit_core::event_bus::Event;
use pagekit_core::events::{
    GET_RENDERED_PAGE_POST_DATA_FETCH, POST_PAGE_DATA_FETCH, PRE_PROCESS_PAGE_URL_LOOKUP, PRE_PROCESS_SECTIONS,
    PRE_RENDER,
};
use pagekit_core::{
    ContentDecodeError, DataServiceError, EmitError, EventBus, Page, PageAssets, PageContext, ProcessingOptions,
    RenderSignal, RequestContext, Section,
};
use std::sync::Arc;
use std::time::Instant;
use tera::escape_html;
use thiserror::Error;

const EMPTY_COLUMN: &str = r#"<span class="empty-column">empty column</span>"#;
const SECTION_CLASS: &str = "jumbotron-fluid pb";
const NO_TEMPLATE: &str = "none";

/// Errors that prevent a page from rendering at all.
#[derive(Error, Debug)]
pub enum RenderError {
    /// No page is published at the URL
    #[error("Page not found: {0}")]
    PageNotFound(String),

    /// The page lookup failed
    #[error("Page lookup failed: {0}")]
    DataService(#[from] DataServiceError),

    /// The page record is malformed
    #[error(transparent)]
    Decode(#[from] ContentDecodeError),
}

/// A shortcode that failed during a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFailure {
    /// Shortcode name
    pub shortcode: String,
    /// Error message
    pub error: String,
}

/// What happened to the shortcodes and hooks of one render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderReport {
    /// Shortcodes replaced by module output
    pub rendered: usize,
    /// Shortcodes no module claimed
    pub unclaimed: usize,
    /// Shortcodes whose module failed
    pub failed: usize,
    /// Shortcodes not dispatched because the render was cancelled
    pub skipped: usize,
    /// Layout section ids that could not be loaded
    pub missing_sections: usize,
    /// Page templates that could not be loaded
    pub missing_templates: usize,
    /// Page-level handlers that failed
    pub hook_failures: usize,
    /// Details of each failed shortcode
    pub failures: Vec<SlotFailure>,
}

impl RenderReport {
    /// Total shortcodes seen.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.rendered + self.unclaimed + self.failed + self.skipped
    }

    fn record(&mut self, name: &str, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Rendered { .. } => self.rendered += 1,
            DispatchOutcome::Unclaimed => self.unclaimed += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
            DispatchOutcome::Failed(error) => {
                self.failed += 1;
                self.failures.push(SlotFailure {
                    shortcode: name.to_string(),
                    error: error.to_string(),
                });
            }
        }
    }
}

/// A finished render.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// The page after every hook ran; `data.html` holds the assembled body
    pub page: Page,
    /// Assembled HTML
    pub html: String,
    /// Whether cancellation stopped the render before every shortcode ran
    pub truncated: bool,
    /// Per-render statistics
    pub report: RenderReport,
}

/// Walks pages and drives the dispatcher across their shortcodes.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    dispatcher: Dispatcher,
    concurrency: usize,
    cache: Option<RenderCache>,
}

impl PageRenderer {
    /// Sequential renderer without a cache.
    #[must_use]
    pub const fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            concurrency: 1,
            cache: None,
        }
    }

    /// Renderer configured from `config`.
    #[must_use]
    pub fn from_config(dispatcher: Dispatcher, config: &RenderConfig) -> Self {
        let renderer = Self::new(dispatcher).with_concurrency(config.concurrency);
        if config.cache.enabled {
            renderer.with_cache(RenderCache::new(config.cache.ttl(), config.cache.max_entries))
        } else {
            renderer
        }
    }

    /// Dispatch up to `concurrency` shortcodes of a pass at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Cache renders made through [`render_url`](Self::render_url).
    #[must_use]
    pub fn with_cache(mut self, cache: RenderCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The render cache, when enabled.
    #[must_use]
    pub const fn cache(&self) -> Option<&RenderCache> {
        self.cache.as_ref()
    }

    fn bus(&self) -> &EventBus {
        self.dispatcher.registry().bus()
    }

    /// Render the page published at `req.url`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::PageNotFound`] if no page has the URL, or an
    /// error if the page record cannot be loaded or decoded.
    #[tracing::instrument(skip_all, fields(url = %req.url))]
    pub async fn render_url(&self, mut req: RequestContext) -> Result<Arc<RenderedPage>, RenderError> {
        let mut report = RenderReport::default();
        if let Err(error) = self.bus().emit(PRE_PROCESS_PAGE_URL_LOOKUP, &mut req).await {
            hook_failed(&error, &mut report);
        }

        if let Some(cache) = &self.cache {
            if let Some(page) = cache.get(&req.url).await {
                tracing::debug!("Serving cached render");
                RenderMetrics::record_cache_hit();
                return Ok(page);
            }
            RenderMetrics::record_cache_miss();
        }

        let record = self
            .dispatcher
            .registry()
            .data_service()
            .get_content_by_url(&req.url, req.session())
            .await
            .map_err(|error| match error {
                DataServiceError::NotFound(_) => RenderError::PageNotFound(req.url.clone()),
                other => RenderError::DataService(other),
            })?;
        let page = Page::from_record(&record)?;

        let url = req.url.clone();
        let rendered = Arc::new(
            self.render_with_report(page, Arc::new(req), RenderSignal::default(), report)
                .await,
        );
        if let Some(cache) = &self.cache {
            cache.insert(&url, Arc::clone(&rendered)).await;
        }
        Ok(rendered)
    }

    /// Render an already loaded page.
    pub async fn render_page(&self, page: Page, req: Arc<RequestContext>) -> RenderedPage {
        self.render_page_with_signal(page, req, RenderSignal::default()).await
    }

    /// Render an already loaded page, stopping early once `signal` triggers.
    #[tracing::instrument(skip_all, fields(page = %page.id))]
    pub async fn render_page_with_signal(
        &self,
        page: Page,
        req: Arc<RequestContext>,
        signal: RenderSignal,
    ) -> RenderedPage {
        self.render_with_report(page, req, signal, RenderReport::default())
            .await
    }

    /// Render a content string as the body of an anonymous page.
    pub async fn render_content(&self, content: &str, req: Arc<RequestContext>) -> RenderedPage {
        self.render_page(Page::from_html("", content), req).await
    }

    async fn render_with_report(
        &self,
        page: Page,
        req: Arc<RequestContext>,
        signal: RenderSignal,
        mut report: RenderReport,
    ) -> RenderedPage {
        let started = Instant::now();
        let mut ctx = PageContext::new(Arc::clone(&req), page);

        self.page_hook(POST_PAGE_DATA_FETCH, &mut ctx, &mut report).await;
        self.merge_page_template(&mut ctx.page, &req, &mut report).await;
        self.page_hook(PRE_PROCESS_SECTIONS, &mut ctx, &mut report).await;

        let mut tree = self.build_tree(&ctx.page, &req, &mut report).await;
        let snapshot = Arc::new(ctx.page.clone());

        let (delayed, immediate): (Vec<usize>, Vec<usize>) =
            (0..tree.slot_count()).partition(|&index| tree.slots().get(index).is_some_and(|slot| slot.is_delayed()));

        let mut assets = PageAssets::default();
        for (indices, is_delayed) in [(immediate, false), (delayed, true)] {
            let pass = Pass {
                indices: &indices,
                delayed: is_delayed,
                page: &snapshot,
                req: &req,
                signal: &signal,
            };
            self.run_pass(&mut tree, pass, &mut report, &mut assets).await;
        }

        ctx.page.data.html = tree.render();
        ctx.page.data.assets.merge(assets);

        let registry = self.dispatcher.registry();
        ctx.page.data.modules = registry.definitions().to_vec();
        ctx.page.data.modules_for_columns = registry.definitions_for_columns().into_iter().cloned().collect();
        ctx.page.data.show_page_builder = req.user.is_some();

        self.page_hook(GET_RENDERED_PAGE_POST_DATA_FETCH, &mut ctx, &mut report)
            .await;
        self.page_hook(PRE_RENDER, &mut ctx, &mut report).await;
        if ctx.page.data.meta_title.is_none() && !ctx.page.data.title.is_empty() {
            ctx.page.data.meta_title = Some(ctx.page.data.title.clone());
        }

        let elapsed = started.elapsed();
        RenderMetrics::record_render(elapsed);
        tracing::debug!(
            rendered = report.rendered,
            unclaimed = report.unclaimed,
            failed = report.failed,
            skipped = report.skipped,
            elapsed_ms = elapsed.as_millis(),
            "Page rendered"
        );

        RenderedPage {
            html: ctx.page.data.html.clone(),
            page: ctx.page,
            truncated: report.skipped > 0,
            report,
        }
    }

    async fn page_hook(&self, event: Event<PageContext>, ctx: &mut PageContext, report: &mut RenderReport) {
        if let Err(error) = self.bus().emit(event, ctx).await {
            hook_failed(&error, report);
        }
    }

    /// Append the page template's `pageCssClass` to the page's own class.
    async fn merge_page_template(&self, page: &mut Page, req: &RequestContext, report: &mut RenderReport) {
        let Some(template_id) = page
            .data
            .page_template
            .clone()
            .filter(|id| !id.is_empty() && id != NO_TEMPLATE)
        else {
            return;
        };

        let data = self.dispatcher.registry().data_service();
        match data.get_content_by_id(&template_id, req.session()).await {
            Ok(template) => {
                if let Some(class) = template.str_field("pageCssClass").map(str::trim).filter(|c| !c.is_empty()) {
                    page.data.page_css_class = join_classes(&page.data.page_css_class, class);
                }
            }
            Err(error) => {
                tracing::warn!(template = %template_id, error = %error, "Skipping page template");
                report.missing_templates += 1;
            }
        }
    }

    async fn load_sections(&self, page: &Page, req: &RequestContext, report: &mut RenderReport) -> Vec<Arc<Section>> {
        if page.data.layout.is_empty() {
            if page.data.rows.is_empty() {
                return Vec::new();
            }
            return vec![Arc::new(Section {
                id: page.id.clone(),
                rows: page.data.rows.clone(),
                ..Section::default()
            })];
        }

        let data = self.dispatcher.registry().data_service();
        let mut sections = Vec::with_capacity(page.data.layout.len());
        for id in &page.data.layout {
            let loaded = match data.get_content_by_id(id, req.session()).await {
                Ok(record) => Section::from_record(&record).map_err(|e| e.to_string()),
                Err(error) => Err(error.to_string()),
            };
            match loaded {
                Ok(section) => sections.push(Arc::new(section)),
                Err(error) => {
                    tracing::warn!(section = %id, error = %error, "Skipping section");
                    report.missing_sections += 1;
                }
            }
        }
        sections
    }

    async fn build_tree(&self, page: &Page, req: &RequestContext, report: &mut RenderReport) -> RenderTree {
        let mut tree = RenderTree::new();
        if !page.data.html.is_empty() {
            tree.push_content(&page.data.html, &SlotPosition::default());
        }
        for section in self.load_sections(page, req, report).await {
            push_section(&mut tree, &section);
        }
        tree
    }

    async fn run_pass(&self, tree: &mut RenderTree, pass: Pass<'_>, report: &mut RenderReport, assets: &mut PageAssets) {
        if pass.indices.is_empty() {
            return;
        }
        tracing::debug!(shortcodes = pass.indices.len(), delayed = pass.delayed, "Dispatching pass");

        let jobs: Vec<(usize, ProcessingOptions)> = pass
            .indices
            .iter()
            .filter_map(|&index| {
                let slot = tree.slots().get(index)?;
                let options = ProcessingOptions::new(slot.shortcode.clone(), Arc::clone(pass.req))
                    .with_page(Arc::clone(pass.page))
                    .at(
                        slot.position.section.clone(),
                        slot.position.row_index,
                        slot.position.column_index,
                    )
                    .with_signal(pass.signal.clone())
                    .delayed(pass.delayed);
                Some((index, options))
            })
            .collect();

        let dispatcher = &self.dispatcher;
        let outcomes: Vec<(usize, DispatchOutcome)> = stream::iter(jobs)
            .map(|(index, options)| async move { (index, dispatcher.dispatch(options).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let policy = dispatcher.failure_policy();
        for (index, outcome) in outcomes {
            let Some(shortcode) = tree.slots().get(index).map(|slot| slot.shortcode.clone()) else {
                continue;
            };
            report.record(&shortcode.name, &outcome);
            let replacement = outcome.replacement(&shortcode, policy);
            if let DispatchOutcome::Rendered { assets: contributed, .. } = outcome {
                assets.merge(contributed);
            }
            tree.resolve(index, replacement);
        }
    }
}

fn hook_failed(error: &EmitError, report: &mut RenderReport) {
    tracing::warn!(event = error.event(), error = %error, "Page hook failed");
    DispatchMetrics::record_handler_failure(error.event());
    report.hook_failures += 1;
}

fn join_classes(own: &str, extra: &str) -> String {
    let own = own.trim();
    if own.is_empty() {
        extra.to_string()
    } else {
        format!("{own} {extra}")
    }
}

struct Pass<'a> {
    indices: &'a [usize],
    delayed: bool,
    page: &'a Arc<Page>,
    req: &'a Arc<RequestContext>,
    signal: &'a RenderSignal,
}

fn push_section(tree: &mut RenderTree, section: &Arc<Section>) {
    if let Some(content) = &section.content {
        tree.push_content(content, &SlotPosition::new(Some(Arc::clone(section)), 0, 0));
        return;
    }

    let class = if section.css_class.trim().is_empty() {
        SECTION_CLASS.to_string()
    } else {
        format!("{} {SECTION_CLASS}", section.css_class.trim())
    };
    tree.push_text(&format!(
        r#"<section data-id="{}" class="{}"><div class="section-overlay"><div class="container">"#,
        escape_html(&section.id),
        escape_html(&class)
    ));

    for (row_index, row) in section.rows.iter().enumerate() {
        tree.push_text(&format!(r#"<div class="{}">"#, escape_html(&row.class)));
        for (column_index, column) in row.columns.iter().enumerate() {
            tree.push_text(&format!(
                r#"<div id="{}" class="{}">"#,
                escape_html(&column.id),
                escape_html(&column.class)
            ));
            if column.is_empty() {
                tree.push_text(EMPTY_COLUMN);
            } else {
                let position = SlotPosition::new(Some(Arc::clone(section)), row_index, column_index);
                tree.push_content(&column.content, &position);
                for block in &column.blocks {
                    tree.push_slot(block.to_shortcode(), position.clone());
                }
            }
            tree.push_text("</div>");
        }
        tree.push_text("</div>");
    }

    tree.push_text("</div></div></section>");
}
