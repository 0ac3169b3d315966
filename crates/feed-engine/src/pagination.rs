//! Single-flight pagination.
//!
//! When the active item gets within `low_watermark` items of the end of the
//! feed, one bounded fetch is requested.  While it is outstanding further
//! requests are refused.  The guard clears exactly once per completion,
//! success or failure, and nothing is retried automatically: the next scroll
//! past the watermark triggers again.

use feed_proto::protocol::FeedItem;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::feed::FeedState;

/// A fetch the event loop must run against the feed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub count: usize,
}

pub struct Paginator {
    low_watermark: usize,
    batch_size: usize,
    in_flight: bool,
    issued: u64,
}

impl Paginator {
    pub fn new(low_watermark: usize, batch_size: usize) -> Self {
        Self {
            low_watermark,
            batch_size,
            in_flight: false,
            issued: 0,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Total fetches issued so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn maybe_fetch_more(&mut self, active: usize, item_count: usize) -> Option<FetchRequest> {
        if item_count == 0 {
            return None;
        }
        let remaining = item_count.saturating_sub(active + 1);
        if remaining > self.low_watermark {
            return None;
        }
        if self.in_flight {
            debug!("pagination: fetch in flight, skipping (remaining={})", remaining);
            return None;
        }

        self.in_flight = true;
        self.issued += 1;
        info!(
            "pagination: {} item(s) left after index {}, fetching {}",
            remaining, active, self.batch_size
        );
        Some(FetchRequest {
            count: self.batch_size,
        })
    }

    /// Apply a finished fetch.  Returns the number of items appended.
    pub fn complete(
        &mut self,
        feed: &mut FeedState,
        result: Result<Vec<FeedItem>, FetchError>,
    ) -> usize {
        if !self.in_flight {
            warn!("pagination: completion without an outstanding fetch");
        }
        self.in_flight = false;
        match result {
            Ok(items) => {
                let received = items.len();
                let added = feed.append(items);
                info!(
                    "pagination: appended {}/{} item(s), feed now {}",
                    added,
                    received,
                    feed.len()
                );
                added
            }
            Err(e) => {
                warn!("pagination: fetch failed: {}", e);
                0
            }
        }
    }
}
