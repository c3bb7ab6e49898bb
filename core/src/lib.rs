//! # Pagekit Core
//!
//! Core traits and types for the Pagekit shortcode rendering pipeline.
//!
//! Stored content embeds shortcode tokens such as `[FAQ id="42"]`. At render
//! time each token is handed to the module that claimed its name, the module
//! assembles a view-model, and the rendered fragment replaces the token.
//! Modules plug into every step through a typed in-process event bus.
//!
//! ## Core Concepts
//!
//! - **Event**: a typed key ([`event_bus::Event`]) with sequential, ordered handlers
//! - **Shortcode**: an inline token naming a module and carrying attributes
//! - **Processing options**: per-shortcode state threaded through every stage
//! - **Module**: an independently loaded unit that claims shortcodes at boot
//! - **Services**: the Data Service and View Renderer the pipeline calls out to
//!
//! ## Architecture Principles
//!
//! - Modules never call each other, they only share events
//! - Registration completes before the first emit
//! - One broken module degrades one shortcode, never the page
//!
//! ## Example
//!
//! ```
//! use pagekit_core::shortcode;
//!
//! let found: Vec<_> = shortcode::parse(r#"Intro [ALERT id="1"] outro"#).collect();
//! assert_eq!(found[0].name, "ALERT");
//! assert_eq!(found[0].id(), Some("1"));
//! ```

pub mod content;
pub mod event_bus;
pub mod events;
pub mod module;
pub mod options;
pub mod services;
pub mod shortcode;

pub use content::{Block, Column, ContentDecodeError, ContentRecord, Page, PageAssets, PageData, RequestContext, Row, Section};
pub use event_bus::{EmitError, Event, EventBus, EventBusBuilder, EventHandler, HandlerError, HandlerFuture};
pub use events::{PageContext, ShortcodeStage};
pub use module::{BootArtifacts, DataLoader, Module, ModuleContext, ModuleDefinition, ModuleError, ShortcodeClaim};
pub use options::{ProcessedHtml, ProcessingOptions, RenderSignal, ViewModel};
pub use services::{DataService, DataServiceError, ViewError, ViewRenderer};
pub use shortcode::{Segment, Shortcode};
