//! External collaborators of the render pipeline.
//!
//! The pipeline never talks to storage or to a template engine directly. It
//! goes through the [`DataService`] and [`ViewRenderer`] traits, which are
//! implemented by the host application (and by in-memory doubles in tests).

use crate::content::ContentRecord;
use crate::options::ViewModel;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Future returned by [`DataService`] methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DataServiceError>> + Send + 'a>>;

/// Future returned by [`ViewRenderer::render`].
pub type ViewFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ViewError>> + Send + 'a>>;

/// Errors raised by a [`DataService`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataServiceError {
    /// No record with this key exists
    #[error("Content not found: {0}")]
    NotFound(String),

    /// The backing store could not be reached
    #[error("Data service unavailable: {0}")]
    Unavailable(String),

    /// The query itself failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Anything else
    #[error("Data service error: {0}")]
    Other(String),
}

/// Content access used by modules and the renderer.
///
/// Every method is asynchronous. `session_id` is forwarded untouched so that
/// implementations can apply per-session visibility rules.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the trait can be used as
/// `Arc<dyn DataService>`.
pub trait DataService: Send + Sync {
    /// Fetch one record by id.
    ///
    /// # Errors
    ///
    /// [`DataServiceError::NotFound`] when no record has this id.
    fn get_content_by_id<'a>(&'a self, id: &'a str, session_id: Option<&'a str>) -> ServiceFuture<'a, ContentRecord>;

    /// Fetch the routable record published at `url`.
    ///
    /// # Errors
    ///
    /// [`DataServiceError::NotFound`] when no record has this URL.
    fn get_content_by_url<'a>(&'a self, url: &'a str, session_id: Option<&'a str>) -> ServiceFuture<'a, ContentRecord>;

    /// All records of a content type.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_content_by_type<'a>(
        &'a self,
        content_type: &'a str,
        session_id: Option<&'a str>,
    ) -> ServiceFuture<'a, Vec<ContentRecord>>;

    /// Records of a content type whose `groupId` field equals `group_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_content_by_type_and_group<'a>(
        &'a self,
        content_type: &'a str,
        group_id: &'a str,
        session_id: Option<&'a str>,
    ) -> ServiceFuture<'a, Vec<ContentRecord>>;

    /// The first record of a content type, if any (used for settings records).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_content_top_one<'a>(&'a self, content_type: &'a str) -> ServiceFuture<'a, Option<ContentRecord>>;

    /// Create a record of `content_type` from `data`, returning it with its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    fn content_create<'a>(&'a self, content_type: &'a str, data: Map<String, Value>) -> ServiceFuture<'a, ContentRecord>;
}

/// Errors raised while rendering a module view.
#[derive(Error, Debug)]
pub enum ViewError {
    /// No template is registered under this name
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// The template engine failed
    #[error("Failed to render template '{template}': {reason}")]
    Render {
        /// Template name
        template: String,
        /// Engine message
        reason: String,
    },

    /// The view-model could not be turned into template context
    #[error("Failed to serialize view model: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Renders a module's template against a view-model.
pub trait ViewRenderer: Send + Sync {
    /// Render `template` with `view_model`.
    ///
    /// # Errors
    ///
    /// [`ViewError::TemplateNotFound`] for unknown templates, or any engine
    /// failure.
    fn render<'a>(&'a self, template: &'a str, view_model: &'a ViewModel) -> ViewFuture<'a>;

    /// Whether `template` can be rendered.
    fn has_template(&self, template: &str) -> bool;
}
