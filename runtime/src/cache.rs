//! Rendered-page cache keyed by URL.
//!
//! # Example
//!
//! ```
//! use pagekit_core::Page;
//! use pagekit_runtime::cache::RenderCache;
//! use pagekit_runtime::renderer::{RenderReport, RenderedPage};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = RenderCache::new(Duration::from_secs(60), 100);
//! let rendered = RenderedPage {
//!     page: Page::from_html("home", "<p>hi</p>"),
//!     html: "<p>hi</p>".to_string(),
//!     truncated: false,
//!     report: RenderReport::default(),
//! };
//!
//! cache.insert("/", Arc::new(rendered)).await;
//! assert_eq!(cache.get("/").await.map(|page| page.html.clone()).as_deref(), Some("<p>hi</p>"));
//! assert!(cache.get("/about").await.is_none());
//! # });
//! ```

use crate::renderer::RenderedPage;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    page: Arc<RenderedPage>,
    expires_at: DateTime<Utc>,
}

/// TTL cache of complete renders.
///
/// Truncated renders are never stored. When full, expired entries are
/// purged first, then the entry closest to expiry is evicted.
#[derive(Debug, Clone)]
pub struct RenderCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: ChronoDuration,
    max_entries: usize,
}

impl RenderCache {
    /// Cache holding up to `max_entries` pages for `ttl` each.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX),
            max_entries: max_entries.max(1),
        }
    }

    /// The cached render of `url`, if fresh.
    pub async fn get(&self, url: &str) -> Option<Arc<RenderedPage>> {
        let entries = self.entries.read().await;
        entries
            .get(url)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| Arc::clone(&entry.page))
    }

    /// Store the render of `url`; truncated renders are ignored.
    pub async fn insert(&self, url: &str, page: Arc<RenderedPage>) {
        if page.truncated {
            return;
        }
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_entries && !entries.contains_key(url) {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        if entries.len() >= self.max_entries && !entries.contains_key(url) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            url.to_string(),
            Entry {
                page,
                expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );
    }

    /// Drop the render of `url`.
    pub async fn invalidate(&self, url: &str) -> bool {
        self.entries.write().await.remove(url).is_some()
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::renderer::RenderReport;
    use pagekit_core::Page;

    fn rendered(html: &str, truncated: bool) -> Arc<RenderedPage> {
        Arc::new(RenderedPage {
            page: Page::from_html("p", html),
            html: html.to_string(),
            truncated,
            report: RenderReport::default(),
        })
    }

    #[tokio::test]
    async fn stores_and_returns_pages() {
        let cache = RenderCache::new(Duration::from_secs(60), 10);

        cache.insert("/a", rendered("a", false)).await;

        assert_eq!(cache.get("/a").await.unwrap().html, "a");
        assert!(cache.get("/b").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let cache = RenderCache::new(Duration::ZERO, 10);

        cache.insert("/a", rendered("a", false)).await;

        assert!(cache.get("/a").await.is_none());
    }

    #[tokio::test]
    async fn truncated_renders_are_not_cached() {
        let cache = RenderCache::new(Duration::from_secs(60), 10);

        cache.insert("/a", rendered("partial", true)).await;

        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn full_cache_evicts_one_entry() {
        let cache = RenderCache::new(Duration::from_secs(60), 2);

        cache.insert("/a", rendered("a", false)).await;
        cache.insert("/b", rendered("b", false)).await;
        cache.insert("/c", rendered("c", false)).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("/c").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = RenderCache::new(Duration::from_secs(60), 10);
        cache.insert("/a", rendered("a", false)).await;

        assert!(cache.invalidate("/a").await);
        assert!(!cache.invalidate("/a").await);
        cache.insert("/b", rendered("b", false)).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
