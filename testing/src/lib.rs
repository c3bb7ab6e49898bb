//! # Pagekit Testing
//!
//! Testing utilities and helpers for the Pagekit rendering pipeline.
//!
//! This crate provides:
//! - [`InMemoryDataService`]: content storage with injected failures and latency
//! - [`FnViewRenderer`]: closure-backed views that record what they rendered
//! - [`EventRecorder`]: bus handlers that log the order they ran in
//! - [`TestModule`]: a module assembled inline in a test
//! - Fixtures and proptest strategies for pages and shortcodes
//!
//! ## Example
//!
//! ```ignore
//! use pagekit_runtime::Runtime;
//! use pagekit_testing::{InMemoryDataService, TestModule, fixtures};
//!
//! #[tokio::test]
//! async fn renders_alert() {
//!     let data = InMemoryDataService::new().with_record(fixtures::record("1", "alert", json!({"title": "Hi"})));
//!     let runtime = Runtime::builder()
//!         .data_service(Arc::new(data))
//!         .module(TestModule::new("alert", "Alert").claiming("ALERT").with_template("alert-main.html", "{{ data.title }}"))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let page = runtime.render_content(r#"[ALERT id="1"]"#, fixtures::request("/")).await;
//!     assert_eq!(page.html, "Hi");
//! }
//! ```

pub mod data;
pub mod modules;
pub mod recorder;
pub mod views;

/// Content and request fixtures.
pub mod fixtures {
    use pagekit_core::{ContentRecord, RequestContext};
    use serde_json::{Value, json};
    use std::sync::Arc;

    /// A record of `content_type` whose data is `fields` (an object).
    #[must_use]
    pub fn record(id: &str, content_type: &str, fields: Value) -> ContentRecord {
        let mut record = ContentRecord::new(id, content_type);
        if let Value::Object(map) = fields {
            record.data = map;
        }
        record
    }

    /// A page record published at `url` whose body is `html`.
    #[must_use]
    pub fn page_record(id: &str, url: &str, html: &str) -> ContentRecord {
        record(id, "page", json!({ "title": id, "html": html })).with_url(url)
    }

    /// A page record published at `url` composed from `sections`.
    #[must_use]
    pub fn layout_page_record(id: &str, url: &str, sections: &[&str]) -> ContentRecord {
        record(id, "page", json!({ "title": id, "layout": sections })).with_url(url)
    }

    /// A section record with one row holding a column per entry of `columns`.
    #[must_use]
    pub fn section_record(id: &str, columns: &[&str]) -> ContentRecord {
        let columns: Vec<Value> = columns
            .iter()
            .enumerate()
            .map(|(i, content)| json!({ "id": format!("{id}-c{i}"), "class": "col", "content": content }))
            .collect();
        record(
            id,
            "section",
            json!({ "rows": [{ "class": "row", "columns": columns }] }),
        )
    }

    /// A request for `url`, shared the way the renderer expects it.
    #[must_use]
    pub fn request(url: &str) -> Arc<RequestContext> {
        Arc::new(RequestContext::new(url))
    }

    /// Route test logs through the test harness writer; safe to call twice.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Shortcode names as authors write them.
    pub fn shortcode_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Z0-9_-]{0,11}"
    }

    /// Attribute values without quotes or brackets.
    pub fn attribute_value() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 ._-]{0,16}"
    }

    /// A well-formed shortcode token with up to three attributes.
    pub fn shortcode_token() -> impl Strategy<Value = String> {
        (
            shortcode_name(),
            prop::collection::btree_map("[a-z][a-zA-Z]{0,7}", attribute_value(), 0..3),
        )
            .prop_map(|(name, attributes)| {
                let mut token = format!("[{name}");
                for (key, value) in attributes {
                    token.push_str(&format!(r#" {key}="{value}""#));
                }
                token.push(']');
                token
            })
    }

    /// Markup-ish text containing no square brackets.
    pub fn plain_text() -> impl Strategy<Value = String> {
        "[^\\[\\]]{0,40}"
    }

    /// Content mixing plain text and shortcode tokens.
    pub fn content_with_shortcodes() -> impl Strategy<Value = String> {
        prop::collection::vec((plain_text(), shortcode_token()), 0..5).prop_map(|parts| {
            parts
                .into_iter()
                .map(|(text, token)| format!("{text}{token}"))
                .collect()
        })
    }
}

pub use data::{InMemoryDataService, ServiceCall};
pub use modules::TestModule;
pub use recorder::EventRecorder;
pub use views::FnViewRenderer;
