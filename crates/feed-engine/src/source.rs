//! Feed item sources: where the initial list and every further page come from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use feed_proto::protocol::FeedItem;
use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

use crate::error::FetchError;

pub type FetchFuture = BoxFuture<'static, Result<Vec<FeedItem>, FetchError>>;

/// Both calls hand back `'static` futures so the event loop can spawn them.
/// Each source keeps its own cursor: `list` starts from the top, `fetch_more`
/// continues where the previous call stopped.
pub trait FeedSource: Send + Sync {
    fn list(&self, count: usize) -> FetchFuture;
    fn fetch_more(&self, count: usize) -> FetchFuture;
}

// ── local catalog ─────────────────────────────────────────────────────────────

/// Pages through a catalog held in memory (loaded from TOML at startup).
pub struct CatalogSource {
    items: Arc<Vec<FeedItem>>,
    cursor: Arc<AtomicUsize>,
}

impl CatalogSource {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items: Arc::new(items),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let items = feed_proto::catalog::load_catalog(path)?;
        info!("catalog: {} item(s) from {}", items.len(), path.display());
        Ok(Self::new(items))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn page(&self, start: Option<usize>, count: usize) -> Result<Vec<FeedItem>, FetchError> {
        let total = self.items.len();
        let taken = match start {
            Some(start) => {
                let end = start.saturating_add(count).min(total);
                self.cursor.store(end, Ordering::SeqCst);
                start.min(end)..end
            }
            None => {
                let prev = self
                    .cursor
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                        Some(c.saturating_add(count).min(total))
                    })
                    .unwrap_or(total);
                prev..prev.saturating_add(count).min(total)
            }
        };
        if taken.is_empty() && count > 0 {
            return Err(FetchError::Exhausted);
        }
        debug!("catalog: serving {:?} of {}", taken, total);
        Ok(self.items[taken].to_vec())
    }
}

impl FeedSource for CatalogSource {
    fn list(&self, count: usize) -> FetchFuture {
        let result = self.page(Some(0), count);
        async move { result }.boxed()
    }

    fn fetch_more(&self, count: usize) -> FetchFuture {
        let result = self.page(None, count);
        async move { result }.boxed()
    }
}

// ── remote JSON endpoint ──────────────────────────────────────────────────────

/// Pages through `GET {base_url}?offset=N&limit=M`, which must answer with a
/// JSON array of feed items.
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    cursor: Arc<AtomicUsize>,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn request(&self, offset: Option<usize>, count: usize) -> FetchFuture {
        let client = self.client.clone();
        let url = self.base_url.clone();
        let cursor = Arc::clone(&self.cursor);

        async move {
            let offset = offset.unwrap_or_else(|| cursor.load(Ordering::SeqCst));
            debug!("http source: GET {} offset={} limit={}", url, offset, count);
            let resp = client
                .get(&url)
                .query(&[("offset", offset), ("limit", count)])
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(FetchError::Status(resp.status().as_u16()));
            }
            let body = resp.bytes().await?;
            let items: Vec<FeedItem> =
                serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))?;
            if items.is_empty() && count > 0 {
                return Err(FetchError::Exhausted);
            }
            cursor.store(offset + items.len(), Ordering::SeqCst);
            Ok(items)
        }
        .boxed()
    }
}

impl FeedSource for HttpSource {
    fn list(&self, count: usize) -> FetchFuture {
        self.request(Some(0), count)
    }

    fn fetch_more(&self, count: usize) -> FetchFuture {
        self.request(None, count)
    }
}
