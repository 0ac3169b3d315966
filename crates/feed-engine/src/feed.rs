use std::collections::HashSet;

use feed_proto::protocol::{Direction, FeedItem};
use tracing::warn;

/// The ordered, append-only item sequence plus the active cursor.
///
/// Items are only appended (by pagination).  `active` and `direction` are only
/// moved by the scroll tracker; `active` is `None` until the feed has items and
/// is always in bounds after that.
#[derive(Debug, Default)]
pub struct FeedState {
    items: Vec<FeedItem>,
    ids: HashSet<String>,
    pub(crate) active: Option<usize>,
    pub(crate) direction: Direction,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FeedItem> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Append in receipt order, skipping ids already present.  Returns the
    /// number of items actually added.
    pub fn append(&mut self, items: Vec<FeedItem>) -> usize {
        let before = self.items.len();
        for item in items {
            if !self.ids.insert(item.id.clone()) {
                warn!("feed: duplicate item {:?} dropped", item.id);
                continue;
            }
            self.items.push(item);
        }
        self.items.len() - before
    }
}
