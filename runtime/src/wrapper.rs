//! Module wrapper markup.
//!
//! When enabled, every rendered module is wrapped in a `<div class="module">`
//! carrying the shortcode identity, so front-end editing tools can find it.
//! A module's `settings` content may add classes (`wrapperCss`) and inline
//! styles (`wrapperStyles`).

use pagekit_core::{ProcessedHtml, ViewModel};
use serde_json::Value;
use tera::escape_html;

const BASE_CLASS: &str = "module";

fn setting<'a>(view_model: Option<&'a ViewModel>, key: &str) -> Option<&'a str> {
    view_model?
        .get("settings")?
        .get("data")?
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// Wrap `processed.body` in the module div.
#[must_use]
pub fn wrap_module(processed: &ProcessedHtml, view_model: Option<&ViewModel>) -> String {
    let mut class = BASE_CLASS.to_string();
    if let Some(extra) = setting(view_model, "wrapperCss") {
        class.push(' ');
        class.push_str(extra.trim());
    }

    let style = setting(view_model, "wrapperStyles")
        .map(|styles| format!(r#" style="{}""#, escape_html(styles)))
        .unwrap_or_default();

    format!(
        r#"<div class="{}" data-id="{}" data-module="{}" data-content-type="{}"{}>{}</div>"#,
        escape_html(&class),
        escape_html(&processed.id),
        escape_html(&processed.shortcode_name),
        escape_html(&processed.content_type),
        style,
        processed.body
    )
}
