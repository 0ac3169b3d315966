//! Preload window: which feed indices around the active one deserve a warm player.

use std::collections::BTreeSet;

use feed_proto::protocol::Direction;

/// Indices near the active item, split by which side of it they are on
/// relative to the scroll direction.  The active index itself is in neither set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadWindow {
    pub ahead: BTreeSet<usize>,
    pub behind: BTreeSet<usize>,
}

impl PreloadWindow {
    pub fn contains(&self, index: usize) -> bool {
        self.ahead.contains(&index) || self.behind.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.ahead.len() + self.behind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ahead.is_empty() && self.behind.is_empty()
    }

    /// Indices ordered by how soon they are likely to be needed: the nearest
    /// ahead first, then the nearest behind.
    pub fn by_priority(&self, active: usize) -> Vec<usize> {
        let mut ahead: Vec<usize> = self.ahead.iter().copied().collect();
        ahead.sort_by_key(|i| i.abs_diff(active));
        let mut behind: Vec<usize> = self.behind.iter().copied().collect();
        behind.sort_by_key(|i| i.abs_diff(active));
        ahead.extend(behind);
        ahead
    }
}

/// Compute the preload window.
///
/// Index `i` is included iff `0 < |i - active| <= max_distance` and it is a
/// valid feed position.  It lands in `ahead` when `i - active` has the sign of
/// `direction`, otherwise in `behind`.
pub fn compute_window(
    active: usize,
    direction: Direction,
    item_count: usize,
    max_distance: usize,
) -> PreloadWindow {
    let mut window = PreloadWindow::default();
    if item_count == 0 {
        return window;
    }

    let lo = active.saturating_sub(max_distance);
    let hi = active.saturating_add(max_distance).min(item_count - 1);
    for i in lo..=hi {
        let distance = i as i64 - active as i64;
        if distance == 0 {
            continue;
        }
        if distance.signum() == direction.sign() {
            window.ahead.insert(i);
        } else {
            window.behind.insert(i);
        }
    }
    window
}
