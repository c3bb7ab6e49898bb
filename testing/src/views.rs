//! View renderer doubles.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use pagekit_core::services::ViewFuture;
use pagekit_core::{ViewError, ViewModel, ViewRenderer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

type RenderFn = dyn Fn(&str, &ViewModel) -> Result<String, ViewError> + Send + Sync;

/// A view renderer backed by a closure, recording every template it renders.
///
/// # Example
///
/// ```
/// use pagekit_core::{ViewModel, ViewRenderer};
/// use pagekit_testing::FnViewRenderer;
///
/// # tokio_test::block_on(async {
/// let views = FnViewRenderer::new(|template, vm| Ok(format!("{template}:{}", vm.id)));
///
/// let html = views.render("alert-main.html", &ViewModel::new("7")).await.unwrap();
/// assert_eq!(html, "alert-main.html:7");
/// assert_eq!(views.rendered(), vec!["alert-main.html".to_string()]);
/// # });
/// ```
#[derive(Clone)]
pub struct FnViewRenderer {
    render: Arc<RenderFn>,
    rendered: Arc<Mutex<Vec<String>>>,
}

impl FnViewRenderer {
    /// Render every template with `render`.
    pub fn new<F>(render: F) -> Self
    where
        F: Fn(&str, &ViewModel) -> Result<String, ViewError> + Send + Sync + 'static,
    {
        Self {
            render: Arc::new(render),
            rendered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Renders `<div data-template="{template}" data-id="{id}"></div>`.
    #[must_use]
    pub fn echo() -> Self {
        Self::new(|template, vm| Ok(format!(r#"<div data-template="{template}" data-id="{}"></div>"#, vm.id)))
    }

    /// Fixed output per template; unknown templates fail with
    /// [`ViewError::TemplateNotFound`].
    #[must_use]
    pub fn fixed<I, K, V>(outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let outputs: HashMap<String, String> = outputs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::new(move |template, _| {
            outputs
                .get(template)
                .cloned()
                .ok_or_else(|| ViewError::TemplateNotFound(template.to_string()))
        })
    }

    /// Templates rendered so far, in order.
    #[must_use]
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

impl ViewRenderer for FnViewRenderer {
    fn render<'a>(&'a self, template: &'a str, view_model: &'a ViewModel) -> ViewFuture<'a> {
        self.rendered.lock().unwrap().push(template.to_string());
        let result = (self.render)(template, view_model);
        Box::pin(async move { result })
    }

    fn has_template(&self, _template: &str) -> bool {
        true
    }
}

impl fmt::Debug for FnViewRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnViewRenderer")
            .field("rendered", &self.rendered)
            .finish_non_exhaustive()
    }
}
