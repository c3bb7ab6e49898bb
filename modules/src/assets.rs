//! Script and stylesheet links.
//!
//! Once the shortcode passes are done, the page's `js_links` and `css_links`
//! are rebuilt from the site-wide links this module was configured with,
//! followed by the links shortcodes contributed during the render.
//! Contributed head snippets are appended to `header_js`.

use pagekit_core::events::GET_RENDERED_PAGE_POST_DATA_FETCH;
use pagekit_core::module::ModuleFuture;
use pagekit_core::{Module, ModuleContext, ModuleDefinition, PageContext};
use std::sync::Arc;
use tera::escape_html;

/// System id of [`AssetLinksModule`].
pub const SYSTEM_ID: &str = "asset-links";

#[derive(Debug, Clone, Default)]
struct SiteAssets {
    scripts: Vec<String>,
    stylesheets: Vec<String>,
}

fn unique<'a>(paths: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut seen: Vec<&str> = Vec::new();
    for path in paths {
        if !path.is_empty() && !seen.contains(&path.as_str()) {
            seen.push(path);
        }
    }
    seen
}

fn script_tags<'a>(paths: impl Iterator<Item = &'a String>) -> String {
    unique(paths)
        .into_iter()
        .map(|path| format!(r#"<script src="{}"></script>"#, escape_html(path)))
        .collect()
}

fn stylesheet_tags<'a>(paths: impl Iterator<Item = &'a String>) -> String {
    unique(paths)
        .into_iter()
        .map(|path| format!(r#"<link href="{}" rel="stylesheet">"#, escape_html(path)))
        .collect()
}

/// Writes `<script>` and `<link>` tags into rendered pages.
#[derive(Debug, Clone, Default)]
pub struct AssetLinksModule {
    site: SiteAssets,
}

impl AssetLinksModule {
    /// A module without site-wide links.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script loaded on every page.
    #[must_use]
    pub fn with_script(mut self, path: impl Into<String>) -> Self {
        self.site.scripts.push(path.into());
        self
    }

    /// Add a stylesheet loaded on every page.
    #[must_use]
    pub fn with_stylesheet(mut self, path: impl Into<String>) -> Self {
        self.site.stylesheets.push(path.into());
        self
    }
}

impl Module for AssetLinksModule {
    fn definition(&self) -> ModuleDefinition {
        ModuleDefinition::new(SYSTEM_ID, "Asset Links")
    }

    fn startup<'a>(&'a self, ctx: &'a mut ModuleContext) -> ModuleFuture<'a> {
        let site = Arc::new(self.site.clone());
        Box::pin(async move {
            ctx.on(GET_RENDERED_PAGE_POST_DATA_FETCH, move |page: &mut PageContext| {
                let site = Arc::clone(&site);
                Box::pin(async move {
                    let data = &mut page.page.data;
                    let js = script_tags(site.scripts.iter().chain(&data.assets.scripts));
                    let css = stylesheet_tags(site.stylesheets.iter().chain(&data.assets.stylesheets));
                    data.js_links = js;
                    data.css_links = css;
                    for snippet in &data.assets.header_js {
                        data.header_js.push_str(snippet);
                    }
                    tracing::trace!(page = %page.page.id, "Asset links rendered");
                    Ok(())
                })
            });
            Ok(())
        })
    }
}
