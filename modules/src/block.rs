//! Reusable HTML blocks.
//!
//! `[BLOCK id="..."]` renders the `body` field of the referenced content
//! record inside a `<span>` carrying the record id.

use pagekit_core::module::ModuleFuture;
use pagekit_core::{Module, ModuleContext, ModuleDefinition};

/// System id of [`BlockModule`].
pub const SYSTEM_ID: &str = "block";

/// Shortcode claimed by [`BlockModule`].
pub const SHORTCODE: &str = "BLOCK";

const TEMPLATE_NAME: &str = "block-main.html";
const TEMPLATE: &str = r#"<span data-id="{{ id }}">{{ data.body | default(value="") | safe }}</span>"#;

/// Renders stored HTML blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockModule;

impl Module for BlockModule {
    fn definition(&self) -> ModuleDefinition {
        ModuleDefinition::new(SYSTEM_ID, "Block")
            .column_capable()
            .with_description("Reusable HTML block")
    }

    fn startup<'a>(&'a self, ctx: &'a mut ModuleContext) -> ModuleFuture<'a> {
        Box::pin(async move {
            ctx.claim_shortcode(SHORTCODE)
                .register_template(TEMPLATE_NAME, TEMPLATE);
            Ok(())
        })
    }
}
