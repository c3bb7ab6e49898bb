//! Configurable module double.

use pagekit_core::{Module, ModuleContext, ModuleDefinition, ModuleError};
use pagekit_core::module::ModuleFuture;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type Setup = dyn Fn(&mut ModuleContext) + Send + Sync;

/// A module assembled in the test that uses it.
///
/// # Example
///
/// ```
/// use pagekit_testing::TestModule;
///
/// let module = TestModule::new("alert", "Alert")
///     .claiming("ALERT")
///     .with_template("alert-main.html", "<b>{{ data.title }}</b>");
/// assert_eq!(module.startup_count(), 0);
/// ```
#[derive(Clone)]
pub struct TestModule {
    definition: ModuleDefinition,
    shortcodes: Vec<String>,
    templates: Vec<(String, String)>,
    setup: Vec<Arc<Setup>>,
    failure: Option<String>,
    started: Arc<AtomicUsize>,
}

impl TestModule {
    /// An enabled module with no registrations.
    #[must_use]
    pub fn new(system_id: &str, title: &str) -> Self {
        Self::from_definition(ModuleDefinition::new(system_id, title))
    }

    /// A module with an explicit definition.
    #[must_use]
    pub fn from_definition(definition: ModuleDefinition) -> Self {
        Self {
            definition,
            shortcodes: Vec::new(),
            templates: Vec::new(),
            setup: Vec::new(),
            failure: None,
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Claim `shortcode` with the default loader and template.
    #[must_use]
    pub fn claiming(mut self, shortcode: &str) -> Self {
        self.shortcodes.push(shortcode.to_string());
        self
    }

    /// Register a template.
    #[must_use]
    pub fn with_template(mut self, name: &str, source: &str) -> Self {
        self.templates.push((name.to_string(), source.to_string()));
        self
    }

    /// Run `setup` against the context at startup, after claims and templates.
    #[must_use]
    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&mut ModuleContext) + Send + Sync + 'static,
    {
        self.setup.push(Arc::new(setup));
        self
    }

    /// Fail startup with `message`.
    #[must_use]
    pub fn failing_startup(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Mark the module disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.definition.enabled = false;
        self
    }

    /// How many times `startup` ran, across clones.
    #[must_use]
    pub fn startup_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl Module for TestModule {
    fn definition(&self) -> ModuleDefinition {
        self.definition.clone()
    }

    fn startup<'a>(&'a self, ctx: &'a mut ModuleContext) -> ModuleFuture<'a> {
        Box::pin(async move {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.failure {
                return Err(ModuleError::Startup(message.clone()));
            }
            for shortcode in &self.shortcodes {
                ctx.claim_shortcode(shortcode);
            }
            for (name, source) in &self.templates {
                ctx.register_template(name.as_str(), source.as_str());
            }
            for setup in &self.setup {
                setup(ctx);
            }
            Ok(())
        })
    }
}

impl fmt::Debug for TestModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModule")
            .field("definition", &self.definition)
            .field("shortcodes", &self.shortcodes)
            .field("setup", &self.setup.len())
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}
