//! In-memory Data Service
//!
//! Provides fast, deterministic content storage for pipeline tests:
//! - Records keyed by id, looked up by id, URL, type and group
//! - Injected failures and per-key latency
//! - A call log for asserting what the pipeline asked for

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use pagekit_core::services::ServiceFuture;
use pagekit_core::{ContentRecord, DataService, DataServiceError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// One recorded Data Service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    /// Method name, e.g. `get_content_by_id`
    pub method: &'static str,
    /// Id, URL or content type the call was made with
    pub key: String,
    /// Session id forwarded by the caller
    pub session_id: Option<String>,
}

/// In-memory Data Service for fast, deterministic tests.
///
/// Clones share the same storage, so a test can keep a handle while the
/// runtime owns another.
///
/// # Example
///
/// ```
/// use pagekit_core::{ContentRecord, DataService};
/// use pagekit_testing::InMemoryDataService;
///
/// # tokio_test::block_on(async {
/// let data = InMemoryDataService::new()
///     .with_record(ContentRecord::new("1", "alert").with_field("title", "Hi"));
///
/// let record = data.get_content_by_id("1", None).await.unwrap();
/// assert_eq!(record.str_field("title"), Some("Hi"));
/// assert_eq!(data.call_count("get_content_by_id"), 1);
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataService {
    records: Arc<RwLock<HashMap<String, ContentRecord>>>,
    failures: Arc<RwLock<HashMap<String, DataServiceError>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    calls: Arc<Mutex<Vec<ServiceCall>>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryDataService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_record(self, record: ContentRecord) -> Self {
        self.insert(record);
        self
    }

    /// Store or replace a record.
    pub fn insert(&self, record: ContentRecord) {
        self.records.write().unwrap().insert(record.id.clone(), record);
    }

    /// Remove a record.
    pub fn remove(&self, id: &str) -> Option<ContentRecord> {
        self.records.write().unwrap().remove(id)
    }

    /// A stored record, read without logging a call.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ContentRecord> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// Make every lookup of `key` (an id, URL or content type) fail with `error`.
    pub fn fail_on(&self, key: impl Into<String>, error: DataServiceError) {
        self.failures.write().unwrap().insert(key.into(), error);
    }

    /// Delay every lookup of `key` by `delay`.
    pub fn delay_on(&self, key: impl Into<String>, delay: Duration) {
        self.delays.write().unwrap().insert(key.into(), delay);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls to `method`.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| call.method == method).count()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    fn record_call(&self, method: &'static str, key: &str, session_id: Option<&str>) {
        self.calls.lock().unwrap().push(ServiceCall {
            method,
            key: key.to_string(),
            session_id: session_id.map(str::to_string),
        });
    }

    async fn pause(&self, key: &str) {
        let delay = self.delays.read().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn injected_failure(&self, key: &str) -> Result<(), DataServiceError> {
        let failure = self.failures.read().unwrap().get(key).cloned();
        failure.map_or(Ok(()), Err)
    }

    async fn enter(&self, method: &'static str, key: &str, session_id: Option<&str>) -> Result<(), DataServiceError> {
        self.record_call(method, key, session_id);
        self.pause(key).await;
        self.injected_failure(key)
    }

    fn of_type(&self, content_type: &str) -> Vec<ContentRecord> {
        let mut records: Vec<ContentRecord> = self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|record| record.content_type_id == content_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

impl DataService for InMemoryDataService {
    fn get_content_by_id<'a>(&'a self, id: &'a str, session_id: Option<&'a str>) -> ServiceFuture<'a, ContentRecord> {
        Box::pin(async move {
            self.enter("get_content_by_id", id, session_id).await?;
            self.get(id)
                .ok_or_else(|| DataServiceError::NotFound(id.to_string()))
        })
    }

    fn get_content_by_url<'a>(&'a self, url: &'a str, session_id: Option<&'a str>) -> ServiceFuture<'a, ContentRecord> {
        Box::pin(async move {
            self.enter("get_content_by_url", url, session_id).await?;
            let found = self
                .records
                .read()
                .unwrap()
                .values()
                .find(|record| record.url.as_deref() == Some(url))
                .cloned();
            found.ok_or_else(|| DataServiceError::NotFound(url.to_string()))
        })
    }

    fn get_content_by_type<'a>(
        &'a self,
        content_type: &'a str,
        session_id: Option<&'a str>,
    ) -> ServiceFuture<'a, Vec<ContentRecord>> {
        Box::pin(async move {
            self.enter("get_content_by_type", content_type, session_id).await?;
            Ok(self.of_type(content_type))
        })
    }

    fn get_content_by_type_and_group<'a>(
        &'a self,
        content_type: &'a str,
        group_id: &'a str,
        session_id: Option<&'a str>,
    ) -> ServiceFuture<'a, Vec<ContentRecord>> {
        Box::pin(async move {
            self.enter("get_content_by_type_and_group", content_type, session_id)
                .await?;
            Ok(self
                .of_type(content_type)
                .into_iter()
                .filter(|record| record.str_field("groupId") == Some(group_id))
                .collect())
        })
    }

    fn get_content_top_one<'a>(&'a self, content_type: &'a str) -> ServiceFuture<'a, Option<ContentRecord>> {
        Box::pin(async move {
            self.enter("get_content_top_one", content_type, None).await?;
            Ok(self.of_type(content_type).into_iter().next())
        })
    }

    fn content_create<'a>(&'a self, content_type: &'a str, data: Map<String, Value>) -> ServiceFuture<'a, ContentRecord> {
        Box::pin(async move {
            self.enter("content_create", content_type, None).await?;
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let mut record = ContentRecord::new(format!("{content_type}-{n}"), content_type);
            record.data = data;
            self.insert(record.clone());
            Ok(record)
        })
    }
}
