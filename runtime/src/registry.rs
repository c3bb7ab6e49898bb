//! Module registry and boot sequence.
//!
//! The registry is resolved once, at boot:
//! - Disabled modules are skipped
//! - Enabled modules start in a stable order (title, then system id)
//! - Every `startup` runs exactly once; the first failure aborts the boot
//! - Shortcode claims must be unique across modules
//! - The event bus is frozen and `modulesLoaded` is emitted
//!
//! After boot nothing in the registry changes, so it is shared as an `Arc`
//! between concurrent renders without locking.

use pagekit_core::events::{MODULES_LOADED, ModulesLoaded};
use pagekit_core::{
    DataService, EmitError, EventBus, Module, ModuleContext, ModuleDefinition, ModuleError, ShortcodeClaim,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort a boot.
#[derive(Error, Debug)]
pub enum BootError {
    /// A module's `startup` failed
    #[error("Module '{module}' failed to start: {source}")]
    StartupFailed {
        /// System id of the failing module
        module: String,
        /// The module's error
        #[source]
        source: ModuleError,
    },

    /// Two modules claimed the same shortcode name
    #[error("Shortcode '{shortcode}' claimed by both '{first}' and '{second}'")]
    DuplicateClaim {
        /// The contested name
        shortcode: String,
        /// Module that claimed it first
        first: String,
        /// Module that claimed it again
        second: String,
    },

    /// Two registered modules share a system id
    #[error("Module '{0}' is registered twice")]
    DuplicateModule(String),

    /// A `modulesLoaded` handler failed
    #[error("modulesLoaded handler failed: {0}")]
    ModulesLoaded(#[source] EmitError),
}

/// Collects modules before boot.
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleRegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module.
    #[must_use]
    pub fn register(self, module: impl Module + 'static) -> Self {
        self.register_arc(Arc::new(module))
    }

    /// Add a shared module.
    #[must_use]
    pub fn register_arc(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Number of registered modules, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Start every enabled module and freeze the result.
    ///
    /// # Errors
    ///
    /// - [`BootError::DuplicateModule`] if two modules share a system id
    /// - [`BootError::StartupFailed`] for the first module whose `startup` fails
    /// - [`BootError::DuplicateClaim`] if two modules claim the same shortcode
    /// - [`BootError::ModulesLoaded`] if a `modulesLoaded` handler fails
    #[tracing::instrument(skip_all, fields(modules = self.modules.len()))]
    pub async fn boot(self, data: Arc<dyn DataService>) -> Result<ModuleRegistry, BootError> {
        let mut enabled: Vec<(ModuleDefinition, Arc<dyn Module>)> = Vec::with_capacity(self.modules.len());
        for module in self.modules {
            let definition = module.definition();
            if !definition.enabled {
                tracing::debug!(module = %definition.system_id, "Skipping disabled module");
                continue;
            }
            if enabled.iter().any(|(d, _)| d.system_id == definition.system_id) {
                return Err(BootError::DuplicateModule(definition.system_id));
            }
            enabled.push((definition, module));
        }
        enabled.sort_by(|(a, _), (b, _)| a.title.cmp(&b.title).then_with(|| a.system_id.cmp(&b.system_id)));

        let mut ctx = ModuleContext::new(Arc::clone(&data));
        for (definition, module) in &enabled {
            ctx.set_current_module(&definition.system_id);
            module.startup(&mut ctx).await.map_err(|source| {
                tracing::error!(module = %definition.system_id, error = %source, "Module startup failed");
                BootError::StartupFailed {
                    module: definition.system_id.clone(),
                    source,
                }
            })?;
            tracing::debug!(module = %definition.system_id, "Module started");
        }

        let artifacts = ctx.into_artifacts();
        let mut claims: HashMap<String, ShortcodeClaim> = HashMap::with_capacity(artifacts.claims.len());
        for claim in artifacts.claims {
            if let Some(existing) = claims.get(&claim.shortcode) {
                tracing::error!(shortcode = %claim.shortcode, "Shortcode claimed twice");
                return Err(BootError::DuplicateClaim {
                    shortcode: claim.shortcode,
                    first: existing.module.clone(),
                    second: claim.module,
                });
            }
            claims.insert(claim.shortcode.clone(), claim);
        }

        let bus = artifacts.bus.build();
        let definitions: Vec<ModuleDefinition> = enabled.into_iter().map(|(definition, _)| definition).collect();

        let mut loaded = ModulesLoaded {
            modules: definitions.iter().map(|d| d.system_id.clone()).collect(),
        };
        bus.emit(MODULES_LOADED, &mut loaded)
            .await
            .map_err(BootError::ModulesLoaded)?;

        tracing::info!(
            modules = definitions.len(),
            shortcodes = claims.len(),
            events = bus.event_names().len(),
            "Modules loaded"
        );

        Ok(ModuleRegistry {
            definitions,
            claims,
            templates: artifacts.templates,
            bus,
            data,
        })
    }
}

impl fmt::Debug for ModuleRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistryBuilder")
            .field("modules", &self.modules.len())
            .finish()
    }
}

/// The booted, immutable module set.
pub struct ModuleRegistry {
    definitions: Vec<ModuleDefinition>,
    claims: HashMap<String, ShortcodeClaim>,
    templates: BTreeMap<String, String>,
    bus: EventBus,
    data: Arc<dyn DataService>,
}

impl ModuleRegistry {
    /// Start collecting modules.
    #[must_use]
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::new()
    }

    /// The frozen event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The Data Service modules were booted with.
    #[must_use]
    pub const fn data_service(&self) -> &Arc<dyn DataService> {
        &self.data
    }

    /// Started modules, in start order.
    #[must_use]
    pub fn definitions(&self) -> &[ModuleDefinition] {
        &self.definitions
    }

    /// Started modules the page builder may place in columns.
    #[must_use]
    pub fn definitions_for_columns(&self) -> Vec<&ModuleDefinition> {
        self.definitions
            .iter()
            .filter(|definition| definition.can_be_added_to_column)
            .collect()
    }

    /// Whether a module with this system id was started.
    #[must_use]
    pub fn is_loaded(&self, system_id: &str) -> bool {
        self.definitions.iter().any(|d| d.system_id == system_id)
    }

    /// The claim for a shortcode name, compared case-insensitively.
    #[must_use]
    pub fn claim(&self, shortcode: &str) -> Option<&ShortcodeClaim> {
        self.claims
            .get(shortcode)
            .or_else(|| self.claims.get(&shortcode.to_uppercase()))
    }

    /// All claimed shortcode names, sorted.
    #[must_use]
    pub fn shortcode_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.claims.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Template sources registered by modules.
    #[must_use]
    pub const fn templates(&self) -> &BTreeMap<String, String> {
        &self.templates
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.definitions.iter().map(|d| &d.system_id).collect::<Vec<_>>())
            .field("shortcodes", &self.shortcode_names())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
