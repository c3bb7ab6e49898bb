//! Google Analytics tag.
//!
//! Settings live in the top `google-analytics` content record. The tag is
//! added to `header_js` only when `googleAnalyticsUACode` holds a well-formed
//! measurement id.

use pagekit_core::events::GET_RENDERED_PAGE_POST_DATA_FETCH;
use pagekit_core::module::ModuleFuture;
use pagekit_core::{DataService, HandlerError, Module, ModuleContext, ModuleDefinition, PageContext};
use std::sync::Arc;

/// System id of [`AnalyticsModule`].
pub const SYSTEM_ID: &str = "google-analytics";

/// Content type holding the analytics settings.
pub const SETTINGS_CONTENT_TYPE: &str = "google-analytics";

const TRACKING_FIELD: &str = "googleAnalyticsUACode";

fn is_measurement_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 32 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// The gtag snippet for `tracking_id`.
#[must_use]
pub fn tracking_snippet(tracking_id: &str) -> String {
    format!(
        concat!(
            r#"<script async src="https://www.googletagmanager.com/gtag/js?id={id}"></script>"#,
            "<script>window.dataLayer = window.dataLayer || [];",
            "function gtag(){{dataLayer.push(arguments);}}",
            "gtag('js', new Date());gtag('config', '{id}');</script>"
        ),
        id = tracking_id
    )
}

/// Adds the Google Analytics tag to rendered pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticsModule;

impl Module for AnalyticsModule {
    fn definition(&self) -> ModuleDefinition {
        ModuleDefinition::new(SYSTEM_ID, "Analytics")
    }

    fn startup<'a>(&'a self, ctx: &'a mut ModuleContext) -> ModuleFuture<'a> {
        Box::pin(async move {
            let data: Arc<dyn DataService> = Arc::clone(ctx.data_service());
            ctx.on(GET_RENDERED_PAGE_POST_DATA_FETCH, move |page: &mut PageContext| {
                let data = Arc::clone(&data);
                Box::pin(async move {
                    let Some(settings) = data.get_content_top_one(SETTINGS_CONTENT_TYPE).await? else {
                        return Ok(());
                    };
                    match settings.str_field(TRACKING_FIELD).map(str::trim) {
                        Some(id) if is_measurement_id(id) => {
                            page.page.data.header_js.push_str(&tracking_snippet(id));
                        }
                        Some("") | None => {}
                        Some(id) => {
                            tracing::warn!(tracking_id = %id, "Ignoring malformed analytics tracking id");
                        }
                    }
                    Ok::<(), HandlerError>(())
                })
            });
            Ok(())
        })
    }
}
