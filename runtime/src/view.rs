//! Tera-backed view renderer.
//!
//! Templates see the view-model as their context: `{{ id }}`,
//! `{{ content_type }}` and every data field under `{{ data.* }}`. Templates
//! whose names end in `.html` are auto-escaped.

use pagekit_core::services::ViewFuture;
use pagekit_core::{ViewError, ViewModel, ViewRenderer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error as _;
use tera::{Context, Tera};

#[derive(Serialize)]
struct TemplateContext<'a> {
    id: &'a str,
    content_type: Option<&'a str>,
    data: &'a Map<String, Value>,
}

fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Renders module views with Tera.
#[derive(Debug, Default)]
pub struct TeraViewRenderer {
    tera: Tera,
}

impl TeraViewRenderer {
    /// A renderer without templates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured Tera instance (custom filters, loaded directories).
    #[must_use]
    pub const fn with_tera(tera: Tera) -> Self {
        Self { tera }
    }

    /// Load every template matching `glob` (e.g. `themes/default/**/*.html`).
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Render`] if a template fails to parse.
    pub fn from_glob(glob: &str) -> Result<Self, ViewError> {
        let tera = Tera::new(glob).map_err(|e| ViewError::Render {
            template: glob.to_string(),
            reason: describe(&e),
        })?;
        Ok(Self { tera })
    }

    /// Build a renderer from `(name, source)` pairs, such as the templates
    /// modules registered at boot.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Render`] for the first template that fails to parse.
    pub fn from_templates<'a, I>(templates: I) -> Result<Self, ViewError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut renderer = Self::new();
        for (name, source) in templates {
            renderer.add_template(name, source)?;
        }
        Ok(renderer)
    }

    /// Add or replace one template.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Render`] if the template fails to parse.
    pub fn add_template(&mut self, name: &str, source: &str) -> Result<(), ViewError> {
        self.tera
            .add_raw_template(name, source)
            .map_err(|e| ViewError::Render {
                template: name.to_string(),
                reason: describe(&e),
            })
    }

    /// Names of the loaded templates, sorted.
    #[must_use]
    pub fn template_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tera.get_template_names().collect();
        names.sort_unstable();
        names
    }

    fn render_sync(&self, template: &str, view_model: &ViewModel) -> Result<String, ViewError> {
        if !self.has_template(template) {
            return Err(ViewError::TemplateNotFound(template.to_string()));
        }
        let context = Context::from_serialize(TemplateContext {
            id: &view_model.id,
            content_type: view_model.content_type.as_deref(),
            data: &view_model.data,
        })
        .map_err(|e| ViewError::Render {
            template: template.to_string(),
            reason: describe(&e),
        })?;

        self.tera.render(template, &context).map_err(|e| ViewError::Render {
            template: template.to_string(),
            reason: describe(&e),
        })
    }
}

impl ViewRenderer for TeraViewRenderer {
    fn render<'a>(&'a self, template: &'a str, view_model: &'a ViewModel) -> ViewFuture<'a> {
        Box::pin(async move { self.render_sync(template, view_model) })
    }

    fn has_template(&self, template: &str) -> bool {
        self.tera.get_template_names().any(|name| name == template)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn view_model() -> ViewModel {
        let mut view_model = ViewModel::new("1");
        view_model.content_type = Some("alert".into());
        view_model.insert("title", "Hi");
        view_model.insert("body", "<b>bold</b>");
        view_model
    }

    #[tokio::test]
    async fn renders_view_model_fields() {
        let mut renderer = TeraViewRenderer::new();
        renderer
            .add_template("alert-main.html", r#"<div class="alert" data-id="{{ id }}">{{ data.title }}</div>"#)
            .unwrap();

        let html = renderer.render("alert-main.html", &view_model()).await.unwrap();

        assert_eq!(html, r#"<div class="alert" data-id="1">Hi</div>"#);
    }

    #[tokio::test]
    async fn html_templates_escape_unless_marked_safe() {
        let mut renderer = TeraViewRenderer::new();
        renderer.add_template("escaped.html", "{{ data.body }}").unwrap();
        renderer.add_template("raw.html", "{{ data.body | safe }}").unwrap();

        assert_eq!(
            renderer.render("escaped.html", &view_model()).await.unwrap(),
            "&lt;b&gt;bold&lt;&#x2F;b&gt;"
        );
        assert_eq!(renderer.render("raw.html", &view_model()).await.unwrap(), "<b>bold</b>");
    }

    #[tokio::test]
    async fn unknown_template_is_reported() {
        let renderer = TeraViewRenderer::new();

        let err = renderer.render("missing.html", &view_model()).await.unwrap_err();

        assert!(matches!(err, ViewError::TemplateNotFound(name) if name == "missing.html"));
    }

    #[test]
    fn registered_templates_are_loaded() {
        let mut templates = BTreeMap::new();
        templates.insert("b.html".to_string(), "b".to_string());
        templates.insert("a.html".to_string(), "a".to_string());

        let renderer = TeraViewRenderer::from_templates(&templates).unwrap();

        assert_eq!(renderer.template_names(), vec!["a.html", "b.html"]);
        assert!(renderer.has_template("a.html"));
    }

    #[test]
    fn broken_template_names_itself() {
        let mut renderer = TeraViewRenderer::new();

        let err = renderer.add_template("broken.html", "{{ unclosed").unwrap_err();

        assert!(matches!(err, ViewError::Render { template, .. } if template == "broken.html"));
    }
}
