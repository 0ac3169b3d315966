//! Windowed preload and playback synchronisation for a scrolling feed of
//! streaming-media items.
//!
//! ```text
//!   scroll / viewability ──► tracker ──► (active, direction)
//!                                           │
//!                     window ◄──────────────┤
//!                        │                  │
//!                        ▼                  ▼
//!                      pool ◄──────────── sync        pagination ──► source
//! ```
//!
//! Everything is driven by `core::FeedCore`, a single-owner event loop.

pub mod core;
pub mod error;
pub mod feed;
pub mod http;
pub mod metrics;
pub mod pagination;
pub mod player;
pub mod pool;
pub mod source;
pub mod sync;
pub mod tracker;
pub mod window;

/// What FeedCore broadcasts to listeners after handling events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedBroadcast {
    /// A new snapshot is in the shared store.
    SnapshotUpdated { rev: u64 },
    /// Pagination appended `added` items; the feed now holds `total`.
    ItemsAppended { added: usize, total: usize },
}
