//! # Pagekit Runtime
//!
//! Boots modules and renders pages for the Pagekit shortcode pipeline.
//!
//! ## Core Components
//!
//! - **Module registry**: starts every module once and freezes the event bus
//! - **Dispatcher**: drives one shortcode through its lifecycle
//! - **Page renderer**: walks a page's layout and dispatches every shortcode
//! - **Views**: Tera templates registered by modules
//!
//! ## Example
//!
//! ```ignore
//! use pagekit_runtime::Runtime;
//! use pagekit_runtime::config::RenderConfig;
//!
//! let runtime = Runtime::builder()
//!     .config(RenderConfig::from_env()?)
//!     .data_service(data)
//!     .module(AlertModule)
//!     .build()
//!     .await?;
//! runtime.init_tracing()?;
//! let metrics = runtime.start_metrics()?;
//!
//! let rendered = runtime.render_url(RequestContext::new("/about")).await?;
//! println!("{}", rendered.html);
//! ```

use crate::config::RenderConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RuntimeError;
use crate::metrics::{MetricsError, MetricsServer};
use crate::registry::{ModuleRegistry, ModuleRegistryBuilder};
use crate::renderer::{PageRenderer, RenderError, RenderedPage};
use crate::telemetry::TelemetryError;
use crate::view::TeraViewRenderer;
use pagekit_core::{DataService, EventBus, Module, Page, RenderSignal, RequestContext, ViewRenderer};
use std::fmt;
use std::sync::Arc;

/// Rendered-page cache
pub mod cache;

/// Layered configuration
pub mod config;

/// Per-shortcode lifecycle
pub mod dispatcher;

/// Prometheus metrics for observability
pub mod metrics;

/// Module boot and lookup
pub mod registry;

/// Page and section rendering
pub mod renderer;

/// Logging setup
pub mod telemetry;

/// Render tree
pub mod tree;

/// Tera view renderer
pub mod view;

/// Module wrapper markup
pub mod wrapper;

/// Error types for building a [`Runtime`]
pub mod error {
    use crate::config::ConfigError;
    use crate::registry::BootError;
    use pagekit_core::ViewError;
    use thiserror::Error;

    /// Errors that can occur while building a runtime
    #[derive(Error, Debug)]
    pub enum RuntimeError {
        /// The configuration is invalid
        #[error(transparent)]
        Config(#[from] ConfigError),

        /// A module failed to boot
        #[error(transparent)]
        Boot(#[from] BootError),

        /// A module template failed to load
        #[error("Template error: {0}")]
        View(#[from] ViewError),

        /// No Data Service was provided
        #[error("A data service is required")]
        MissingDataService,
    }
}

pub use dispatcher::{DispatchError, DispatchOutcome};
pub use error::RuntimeError as Error;

/// Builder for [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RenderConfig,
    modules: ModuleRegistryBuilder,
    data: Option<Arc<dyn DataService>>,
    views: Option<Arc<dyn ViewRenderer>>,
}

impl RuntimeBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a module.
    #[must_use]
    pub fn module(mut self, module: impl Module + 'static) -> Self {
        self.modules = self.modules.register(module);
        self
    }

    /// Add a shared module.
    #[must_use]
    pub fn module_arc(mut self, module: Arc<dyn Module>) -> Self {
        self.modules = self.modules.register_arc(module);
        self
    }

    /// The Data Service modules and the renderer read from.
    #[must_use]
    pub fn data_service(mut self, data: Arc<dyn DataService>) -> Self {
        self.data = Some(data);
        self
    }

    /// Render views with `views` instead of the templates modules register.
    #[must_use]
    pub fn view_renderer(mut self, views: Arc<dyn ViewRenderer>) -> Self {
        self.views = Some(views);
        self
    }

    /// Validate the configuration, boot the modules and assemble the renderer.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the configuration is invalid, no Data
    /// Service was given, a module fails to boot, or a registered template
    /// does not parse.
    pub async fn build(self) -> Result<Runtime, RuntimeError> {
        self.config.validate()?;
        let data = self.data.ok_or(RuntimeError::MissingDataService)?;

        let registry = Arc::new(self.modules.boot(data).await?);

        let views = match self.views {
            Some(views) => views,
            None => Arc::new(TeraViewRenderer::from_templates(registry.templates())?) as Arc<dyn ViewRenderer>,
        };

        let dispatcher = Dispatcher::new(Arc::clone(&registry), views)
            .with_failure_policy(self.config.failure_policy)
            .with_module_wrapper(self.config.wrap_modules)
            .with_timeout(self.config.shortcode_timeout());
        let renderer = PageRenderer::from_config(dispatcher, &self.config);

        tracing::info!(
            environment = %self.config.environment,
            concurrency = self.config.concurrency,
            cache = self.config.cache.enabled,
            "Runtime ready"
        );

        Ok(Runtime {
            config: self.config,
            registry,
            renderer,
        })
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("modules", &self.modules)
            .field("data", &self.data.is_some())
            .field("views", &self.views.is_some())
            .finish()
    }
}

/// A booted pipeline, ready to render.
///
/// Cheap to clone and safe to share between concurrent requests.
#[derive(Debug, Clone)]
pub struct Runtime {
    config: RenderConfig,
    registry: Arc<ModuleRegistry>,
    renderer: PageRenderer,
}

impl Runtime {
    /// Start building a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// The booted modules.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// The frozen event bus, for emitting collaborator events.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        self.registry.bus()
    }

    /// The page renderer.
    #[must_use]
    pub const fn renderer(&self) -> &PageRenderer {
        &self.renderer
    }

    /// The shortcode dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        self.renderer.dispatcher()
    }

    /// Install the global `tracing` subscriber from the observability config.
    ///
    /// # Errors
    ///
    /// See [`telemetry::init_tracing`].
    pub fn init_tracing(&self) -> Result<(), TelemetryError> {
        telemetry::init_tracing(&self.config.observability)
    }

    /// Install the Prometheus recorder when `metrics_enabled` is set.
    ///
    /// Returns `None` when metrics are disabled. The host serves
    /// [`MetricsServer::render`] on [`MetricsServer::addr`].
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the recorder cannot be installed.
    pub fn start_metrics(&self) -> Result<Option<MetricsServer>, MetricsError> {
        let observability = &self.config.observability;
        if !observability.metrics_enabled {
            return Ok(None);
        }
        let mut server = MetricsServer::new(observability.metrics_addr());
        server.start()?;
        Ok(Some(server))
    }

    /// Render the page published at `req.url`.
    ///
    /// # Errors
    ///
    /// See [`PageRenderer::render_url`].
    pub async fn render_url(&self, req: RequestContext) -> Result<Arc<RenderedPage>, RenderError> {
        self.renderer.render_url(req).await
    }

    /// Render an already loaded page.
    pub async fn render_page(&self, page: Page, req: Arc<RequestContext>) -> RenderedPage {
        self.renderer.render_page(page, req).await
    }

    /// Render an already loaded page under a cancellation signal.
    pub async fn render_page_with_signal(
        &self,
        page: Page,
        req: Arc<RequestContext>,
        signal: RenderSignal,
    ) -> RenderedPage {
        self.renderer.render_page_with_signal(page, req, signal).await
    }

    /// Render a content string.
    pub async fn render_content(&self, content: &str, req: Arc<RequestContext>) -> RenderedPage {
        self.renderer.render_content(content, req).await
    }
}
