//! The module contract.
//!
//! A module is an independently loaded unit of rendering logic. At boot it is
//! handed a [`ModuleContext`] through which it subscribes to bus events,
//! claims shortcode names, and registers view templates. Modules never see
//! each other; everything they share goes through the bus.

use crate::event_bus::{Event, EventBusBuilder, HandlerError, HandlerFuture};
use crate::options::{ProcessingOptions, ViewModel};
use crate::services::{DataService, DataServiceError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Future returned by [`Module::startup`].
pub type ModuleFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ModuleError>> + Send + 'a>>;

/// Future returned by a [`DataLoader`].
pub type LoaderFuture<'a> = Pin<Box<dyn Future<Output = Result<ViewModel, HandlerError>> + Send + 'a>>;

/// Errors raised by a module while it starts.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Startup could not complete
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Startup needed content that could not be loaded
    #[error("Data service error: {0}")]
    DataService(#[from] DataServiceError),

    /// A template the module ships is unusable
    #[error("Invalid template '{name}': {reason}")]
    InvalidTemplate {
        /// Template name
        name: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Static description of a module, as found in its `module.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    /// Unique module id
    #[serde(rename = "systemid")]
    pub system_id: String,
    /// Display title; modules start in title order
    pub title: String,
    /// Disabled modules are never started
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Whether the page builder offers the module for columns
    #[serde(default)]
    pub can_be_added_to_column: bool,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

const fn enabled_by_default() -> bool {
    true
}

impl ModuleDefinition {
    /// An enabled definition.
    #[must_use]
    pub fn new(system_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            title: title.into(),
            enabled: true,
            can_be_added_to_column: false,
            description: None,
        }
    }

    /// Offer the module to page-builder columns.
    #[must_use]
    pub const fn column_capable(mut self) -> Self {
        self.can_be_added_to_column = true;
        self
    }

    /// Disable the module.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A loadable module.
///
/// `startup` is called exactly once, at boot, before any request is served.
///
/// # Example
///
/// ```
/// use pagekit_core::module::{Module, ModuleContext, ModuleDefinition, ModuleFuture};
///
/// struct Alert;
///
/// impl Module for Alert {
///     fn definition(&self) -> ModuleDefinition {
///         ModuleDefinition::new("alert", "Alert").column_capable()
///     }
///
///     fn startup<'a>(&'a self, ctx: &'a mut ModuleContext) -> ModuleFuture<'a> {
///         Box::pin(async move {
///             ctx.claim_shortcode("ALERT");
///             ctx.register_template("alert-main.html", r#"<div class="alert">{{ data.title }}</div>"#);
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Module: Send + Sync {
    /// The module's static description.
    fn definition(&self) -> ModuleDefinition;

    /// Subscribe handlers, claim shortcodes, register templates.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole boot.
    fn startup<'a>(&'a self, ctx: &'a mut ModuleContext) -> ModuleFuture<'a>;
}

/// Loads the view-model of a claimed shortcode.
///
/// Closures of the shape `|options, data| Box::pin(async move { .. })`
/// implement this trait automatically.
pub trait DataLoader: Send + Sync {
    /// Build the view-model for `options`.
    fn load<'a>(&'a self, options: &'a ProcessingOptions, data: &'a dyn DataService) -> LoaderFuture<'a>;
}

impl<F> DataLoader for F
where
    F: for<'a> Fn(&'a ProcessingOptions, &'a dyn DataService) -> LoaderFuture<'a> + Send + Sync,
{
    fn load<'a>(&'a self, options: &'a ProcessingOptions, data: &'a dyn DataService) -> LoaderFuture<'a> {
        self(options, data)
    }
}

/// A module's claim on a shortcode name.
#[derive(Clone)]
pub struct ShortcodeClaim {
    /// Claimed name, uppercased
    pub shortcode: String,
    /// Owning module's system id
    pub module: String,
    /// Template rendered for this shortcode
    pub template: String,
    /// Custom data loader; the dispatcher's default loader when absent
    pub loader: Option<Arc<dyn DataLoader>>,
}

impl ShortcodeClaim {
    /// Claim `shortcode` for `module`, rendering `{module}-main.html`.
    #[must_use]
    pub fn new(shortcode: &str, module: &str) -> Self {
        Self {
            shortcode: shortcode.to_uppercase(),
            module: module.to_string(),
            template: default_template(module),
            loader: None,
        }
    }

    /// Render a different template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Load the view-model with a closure.
    #[must_use]
    pub fn with_loader<F>(self, loader: F) -> Self
    where
        F: for<'a> Fn(&'a ProcessingOptions, &'a dyn DataService) -> LoaderFuture<'a> + Send + Sync + 'static,
    {
        self.with_data_loader(Arc::new(loader))
    }

    /// Load the view-model with a shared loader.
    #[must_use]
    pub fn with_data_loader(mut self, loader: Arc<dyn DataLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

impl fmt::Debug for ShortcodeClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShortcodeClaim")
            .field("shortcode", &self.shortcode)
            .field("module", &self.module)
            .field("template", &self.template)
            .field("custom_loader", &self.loader.is_some())
            .finish()
    }
}

/// Template rendered for a module when nothing else is configured.
#[must_use]
pub fn default_template(module: &str) -> String {
    format!("{module}-main.html")
}

/// Everything modules registered during boot.
pub struct BootArtifacts {
    /// Subscriptions, not yet frozen
    pub bus: EventBusBuilder,
    /// Shortcode claims, in registration order
    pub claims: Vec<ShortcodeClaim>,
    /// Template sources by name
    pub templates: BTreeMap<String, String>,
}

/// Registration surface handed to [`Module::startup`].
///
/// One context is shared by every module of a boot; the boot sequence points
/// it at the module currently starting so claims are attributed correctly.
pub struct ModuleContext {
    module: String,
    bus: EventBusBuilder,
    claims: Vec<ShortcodeClaim>,
    templates: BTreeMap<String, String>,
    data: Arc<dyn DataService>,
}

impl ModuleContext {
    /// A fresh context backed by `data`.
    #[must_use]
    pub fn new(data: Arc<dyn DataService>) -> Self {
        Self {
            module: String::new(),
            bus: EventBusBuilder::new(),
            claims: Vec::new(),
            templates: BTreeMap::new(),
            data,
        }
    }

    /// Attribute subsequent registrations to `module`.
    pub fn set_current_module(&mut self, module: &str) {
        module.clone_into(&mut self.module);
    }

    /// System id of the module currently starting.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// The Data Service, for settings loaded at startup.
    #[must_use]
    pub fn data_service(&self) -> &Arc<dyn DataService> {
        &self.data
    }

    /// Claim `shortcode` for the current module with the default loader and template.
    pub fn claim_shortcode(&mut self, shortcode: &str) -> &mut Self {
        let claim = ShortcodeClaim::new(shortcode, &self.module);
        self.claim(claim)
    }

    /// Register a fully configured claim.
    pub fn claim(&mut self, claim: ShortcodeClaim) -> &mut Self {
        self.claims.push(claim);
        self
    }

    /// Subscribe a broadcast handler.
    pub fn on<P, F>(&mut self, event: Event<P>, handler: F) -> &mut Self
    where
        P: Send + 'static,
        F: for<'a> Fn(&'a mut P) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.bus.on(event, handler);
        self
    }

    /// Subscribe a handler that only sees emits for `shortcode`.
    pub fn on_shortcode<P, F>(&mut self, event: Event<P>, shortcode: &str, handler: F) -> &mut Self
    where
        P: Send + 'static,
        F: for<'a> Fn(&'a mut P) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.bus.on_scoped(event, shortcode, handler);
        self
    }

    /// Register a view template under `name`, replacing any previous source.
    pub fn register_template(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), source.into());
        self
    }

    /// Claims registered so far.
    #[must_use]
    pub fn claims(&self) -> &[ShortcodeClaim] {
        &self.claims
    }

    /// Finish boot, handing back everything registered.
    #[must_use]
    pub fn into_artifacts(self) -> BootArtifacts {
        BootArtifacts {
            bus: self.bus,
            claims: self.claims,
            templates: self.templates,
        }
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module)
            .field("bus", &self.bus)
            .field("claims", &self.claims)
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
