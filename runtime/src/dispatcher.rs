//! The module dispatcher.
//!
//! Drives one shortcode through its lifecycle:
//!
//! ```text
//! claim ─▶ beginProcessModuleShortCode ─▶ data load ─▶ postModuleGetData
//!       ─▶ postModuleGetData2 ─▶ alterModuleViewModule ─▶ view render
//!       ─▶ postProcessModuleShortCodeProcessedHtml ─▶ (module wrapper)
//! ```
//!
//! Every stage after the claim is delivered to broadcast handlers and to
//! handlers scoped to the shortcode's name. A stage with no subscribers is a
//! no-op. The first failing stage ends the lifecycle with
//! [`DispatchOutcome::Failed`]; the failure never leaves the dispatcher as an
//! error, so the caller can keep rendering the rest of the page.
//!
//! The render signal is checked before every stage and before the view
//! render. Once it triggers, the lifecycle stops with
//! [`DispatchOutcome::Skipped`] and the token is left in place.

use crate::config::FailurePolicy;
use crate::metrics::DispatchMetrics;
use crate::registry::ModuleRegistry;
use crate::wrapper::wrap_module;
use pagekit_core::module::default_template;
use pagekit_core::{
    DataService, EmitError, HandlerError, PageAssets, ProcessedHtml, ProcessingOptions, ShortcodeStage,
    Shortcode, ViewError, ViewModel, ViewRenderer,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a claimed shortcode failed to render.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A handler of one of the lifecycle events failed
    #[error("{stage:?} stage failed: {source}")]
    Handler {
        /// Stage whose handler failed
        stage: ShortcodeStage,
        /// The bus error
        #[source]
        source: EmitError,
    },

    /// The module's data could not be loaded
    #[error("Data load for module '{module}' failed: {source}")]
    DataLoad {
        /// Owning module
        module: String,
        /// Loader error
        #[source]
        source: HandlerError,
    },

    /// The view failed to render
    #[error("View '{template}' failed: {source}")]
    View {
        /// Template name
        template: String,
        /// Renderer error
        #[source]
        source: ViewError,
    },

    /// The shortcode exceeded its time limit
    #[error("Shortcode '{shortcode}' timed out after {after:?}")]
    Timeout {
        /// Shortcode name
        shortcode: String,
        /// Configured limit
        after: Duration,
    },
}

/// Result of dispatching one shortcode.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The owning module rendered a fragment
    Rendered {
        /// Fragment replacing the token
        html: String,
        /// Page assets the module contributed
        assets: PageAssets,
    },
    /// No module claimed the shortcode
    Unclaimed,
    /// The owning module failed
    Failed(DispatchError),
    /// The render was cancelled before this shortcode finished
    Skipped,
}

impl DispatchOutcome {
    /// Metric label for the outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Rendered { .. } => "rendered",
            Self::Unclaimed => "unclaimed",
            Self::Failed(_) => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether a fragment was rendered.
    #[must_use]
    pub const fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered { .. })
    }

    /// Text that replaces `shortcode`'s token, or `None` to keep the token.
    #[must_use]
    pub fn replacement(&self, shortcode: &Shortcode, policy: FailurePolicy) -> Option<String> {
        match self {
            Self::Rendered { html, .. } => Some(html.clone()),
            Self::Failed(_) => Some(policy.placeholder(&shortcode.name, &shortcode.code_text)),
            Self::Unclaimed | Self::Skipped => None,
        }
    }
}

/// Why a lifecycle stopped early.
enum Halt {
    Cancelled,
    Failed(DispatchError),
}

impl From<DispatchError> for Halt {
    fn from(error: DispatchError) -> Self {
        Self::Failed(error)
    }
}

/// Resolves shortcodes to modules and runs their lifecycle.
///
/// Cheap to clone; clones share the registry and the view renderer.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    views: Arc<dyn ViewRenderer>,
    policy: FailurePolicy,
    wrap_modules: bool,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Dispatcher over a booted registry.
    #[must_use]
    pub fn new(registry: Arc<ModuleRegistry>, views: Arc<dyn ViewRenderer>) -> Self {
        Self {
            registry,
            views,
            policy: FailurePolicy::default(),
            wrap_modules: false,
            timeout: None,
        }
    }

    /// What replaces failed shortcodes in [`process_module_in_column`](Self::process_module_in_column).
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wrap rendered fragments in the module div.
    #[must_use]
    pub const fn with_module_wrapper(mut self, enabled: bool) -> Self {
        self.wrap_modules = enabled;
        self
    }

    /// Fail shortcodes that take longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The registry shortcodes are resolved against.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// The configured failure policy.
    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Dispatch one shortcode and substitute every occurrence of its token in
    /// `content`.
    ///
    /// Unclaimed and skipped shortcodes leave `content` unchanged; failed ones
    /// are replaced according to the failure policy.
    pub async fn process_module_in_column(&self, content: &str, options: ProcessingOptions) -> String {
        let shortcode = options.shortcode.clone();
        let outcome = self.dispatch(options).await;
        match outcome.replacement(&shortcode, self.policy) {
            Some(replacement) => content.replace(&shortcode.code_text, &replacement),
            None => content.to_string(),
        }
    }

    /// Run one shortcode's lifecycle.
    #[tracing::instrument(
        skip_all,
        fields(shortcode = %options.shortcode.name, delayed = options.delayed)
    )]
    pub async fn dispatch(&self, options: ProcessingOptions) -> DispatchOutcome {
        if options.signal.is_triggered() {
            tracing::debug!("Render cancelled, skipping shortcode");
            DispatchMetrics::record_outcome("skipped");
            return DispatchOutcome::Skipped;
        }

        let name = options.shortcode.name.clone();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(options)).await {
                Ok(outcome) => outcome,
                Err(_) => DispatchOutcome::Failed(DispatchError::Timeout {
                    shortcode: name.clone(),
                    after: limit,
                }),
            },
            None => self.run(options).await,
        };

        match &outcome {
            DispatchOutcome::Failed(error) => {
                if let DispatchError::Handler { source, .. } = error {
                    DispatchMetrics::record_handler_failure(source.event());
                }
                tracing::warn!(shortcode = %name, error = %error, "Module failed to render shortcode");
            }
            DispatchOutcome::Unclaimed => {
                tracing::debug!(shortcode = %name, "No module claimed shortcode");
            }
            DispatchOutcome::Rendered { .. } | DispatchOutcome::Skipped => {}
        }
        DispatchMetrics::record_outcome(outcome.label());
        outcome
    }

    async fn run(&self, mut options: ProcessingOptions) -> DispatchOutcome {
        match self.lifecycle(&mut options).await {
            Ok(Some(html)) => DispatchOutcome::Rendered {
                html,
                assets: std::mem::take(&mut options.assets),
            },
            Ok(None) => DispatchOutcome::Unclaimed,
            Err(Halt::Cancelled) => {
                tracing::debug!("Render cancelled mid-lifecycle");
                DispatchOutcome::Skipped
            }
            Err(Halt::Failed(error)) => DispatchOutcome::Failed(error),
        }
    }

    async fn emit_stage(&self, stage: ShortcodeStage, options: &mut ProcessingOptions) -> Result<(), Halt> {
        ensure_active(options)?;
        let scope = options.shortcode.name.clone();
        tracing::trace!(?stage, "Emitting stage");
        self.registry
            .bus()
            .emit_scoped(stage.event(), &scope, options)
            .await
            .map_err(|source| Halt::Failed(DispatchError::Handler { stage, source }))
    }

    async fn lifecycle(&self, options: &mut ProcessingOptions) -> Result<Option<String>, Halt> {
        let claim = self.registry.claim(&options.shortcode.name);
        if let Some(claim) = claim {
            options.module_name = Some(claim.module.clone());
        }

        self.emit_stage(ShortcodeStage::begin(options.delayed), options).await?;

        let Some(module) = options.module_name.clone() else {
            return Ok(None);
        };
        tracing::debug!(module = %module, "Shortcode claimed");

        if options.view_model.is_none() {
            ensure_active(options)?;
            let data = self.registry.data_service().as_ref();
            let loaded = match claim.and_then(|c| c.loader.as_ref()) {
                Some(loader) => loader.load(options, data).await,
                None => default_load(options, data).await,
            };
            let view_model = loaded.map_err(|source| DispatchError::DataLoad {
                module: module.clone(),
                source,
            })?;
            options.view_model = Some(view_model);
        }

        for stage in ShortcodeStage::ENRICHMENT {
            self.emit_stage(stage, options).await?;
        }

        ensure_active(options)?;
        let template = claim.map_or_else(|| default_template(&module), |c| c.template.clone());
        let rendered = self.views.render(&template, options.view_model_mut()).await;
        let body = rendered.map_err(|source| DispatchError::View { template, source })?;

        options.processed_html = Some(ProcessedHtml {
            id: options.view_model.as_ref().map(|vm| vm.id.clone()).unwrap_or_default(),
            content_type: module,
            shortcode_name: options.shortcode.name.clone(),
            body,
        });

        self.emit_stage(ShortcodeStage::PostProcessHtml, options).await?;

        let Some(processed) = options.processed_html.as_ref() else {
            return Ok(Some(String::new()));
        };
        if self.wrap_modules {
            Ok(Some(wrap_module(processed, options.view_model.as_ref())))
        } else {
            Ok(Some(processed.body.clone()))
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("wrap_modules", &self.wrap_modules)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn ensure_active(options: &ProcessingOptions) -> Result<(), Halt> {
    if options.signal.is_triggered() {
        Err(Halt::Cancelled)
    } else {
        Ok(())
    }
}

/// Load the content named by the shortcode's `id`, or start from an empty
/// view-model when there is none.
async fn default_load(options: &ProcessingOptions, data: &dyn DataService) -> Result<ViewModel, HandlerError> {
    match options.shortcode.id() {
        Some(id) => {
            let record = data.get_content_by_id(id, options.req.session()).await?;
            Ok(ViewModel::from(record))
        }
        None => Ok(ViewModel::default()),
    }
}
