//! Scroll / viewability tracker.
//!
//! Two independent signals move the active item: the offset reported when a
//! momentum scroll settles, and viewability callbacks from the list.  The last
//! one to arrive wins.  Both are clamped into the feed before being compared
//! with the current index; an unchanged index is a no-op and leaves the
//! direction where it was.

use feed_proto::protocol::Direction;
use tracing::debug;

use crate::feed::FeedState;

/// Which raw signal produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    MomentumScroll,
    Viewability,
    /// First activation when the feed becomes non-empty.
    Initial,
}

/// An accepted change of the active index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<usize>,
    pub to: usize,
    pub direction: Direction,
    pub signal: Signal,
}

pub struct ScrollTracker {
    item_extent: f64,
    viewability_threshold: u8,
}

impl ScrollTracker {
    pub fn new(item_extent: f64, viewability_threshold: u8) -> Self {
        Self {
            item_extent,
            viewability_threshold,
        }
    }

    /// Activate index 0 once the feed has items.  No-op if already active.
    pub fn prime(&self, feed: &mut FeedState) -> Option<Transition> {
        if feed.active.is_some() {
            return None;
        }
        self.accept(feed, 0, Signal::Initial)
    }

    /// A momentum scroll came to rest at `offset`.
    pub fn on_scroll_end(&self, feed: &mut FeedState, offset: f64) -> Option<Transition> {
        if !offset.is_finite() {
            debug!("tracker: ignoring non-finite offset {}", offset);
            return None;
        }
        let raw = (offset / self.item_extent).round() as i64;
        self.accept(feed, raw, Signal::MomentumScroll)
    }

    /// The list reported `index` as `percent_visible` percent on screen.
    pub fn on_viewable(
        &self,
        feed: &mut FeedState,
        index: i64,
        percent_visible: u8,
    ) -> Option<Transition> {
        if percent_visible < self.viewability_threshold {
            debug!(
                "tracker: index {} only {}% visible (< {}%), ignored",
                index, percent_visible, self.viewability_threshold
            );
            return None;
        }
        self.accept(feed, index, Signal::Viewability)
    }

    /// Clamp `raw` into the feed and move the cursor if it changed.
    pub fn accept(&self, feed: &mut FeedState, raw: i64, signal: Signal) -> Option<Transition> {
        if feed.is_empty() {
            return None;
        }
        let last = feed.len() as i64 - 1;
        let clamped = raw.clamp(0, last) as usize;

        let from = feed.active;
        match from {
            Some(current) if current == clamped => {
                debug!("tracker: {:?} index {} unchanged", signal, clamped);
                return None;
            }
            Some(current) => {
                feed.direction = if clamped > current {
                    Direction::Forward
                } else {
                    Direction::Backward
                };
            }
            None => {}
        }
        feed.active = Some(clamped);
        debug!(
            "tracker: {:?} {:?} → {} ({:?})",
            signal, from, clamped, feed.direction
        );

        Some(Transition {
            from,
            to: clamped,
            direction: feed.direction,
            signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_proto::protocol::FeedItem;

    fn feed_of(n: usize) -> FeedState {
        let mut feed = FeedState::new();
        feed.append(
            (0..n)
                .map(|i| FeedItem::new(format!("v{}", i), format!("https://cdn/{}.m3u8", i)))
                .collect(),
        );
        feed
    }

    fn tracker() -> ScrollTracker {
        ScrollTracker::new(100.0, 50)
    }

    #[test]
    fn test_empty_feed_never_transitions() {
        let mut feed = FeedState::new();
        assert!(tracker().prime(&mut feed).is_none());
        assert!(tracker().on_scroll_end(&mut feed, 300.0).is_none());
        assert_eq!(feed.active_index(), None);
    }

    #[test]
    fn test_prime_activates_first_item_once() {
        let mut feed = feed_of(3);
        let t = tracker().prime(&mut feed).unwrap();
        assert_eq!(t.from, None);
        assert_eq!(t.to, 0);
        assert_eq!(t.signal, Signal::Initial);
        assert!(tracker().prime(&mut feed).is_none());
    }

    #[test]
    fn test_offset_rounds_to_nearest_item() {
        let mut feed = feed_of(9);
        let tr = tracker();
        tr.prime(&mut feed);
        let t = tr.on_scroll_end(&mut feed, 260.0).unwrap();
        assert_eq!(t.to, 3);
        assert_eq!(t.direction, Direction::Forward);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let mut feed = feed_of(5);
        let tr = tracker();
        tr.prime(&mut feed);
        let t = tr.accept(&mut feed, 99, Signal::Viewability).unwrap();
        assert_eq!(t.to, 4);
        // Clamps to the current value: no transition, direction untouched.
        assert!(tr.accept(&mut feed, 1000, Signal::MomentumScroll).is_none());
        assert_eq!(feed.direction(), Direction::Forward);

        let t = tr.on_scroll_end(&mut feed, -250.0).unwrap();
        assert_eq!(t.to, 0);
        assert_eq!(t.direction, Direction::Backward);
        assert!(tr.accept(&mut feed, -7, Signal::Viewability).is_none());
    }

    #[test]
    fn test_direction_sticky_across_noops() {
        let mut feed = feed_of(9);
        let tr = tracker();
        tr.prime(&mut feed);
        tr.accept(&mut feed, 5, Signal::MomentumScroll);
        tr.accept(&mut feed, 2, Signal::MomentumScroll);
        assert_eq!(feed.direction(), Direction::Backward);
        assert!(tr.accept(&mut feed, 2, Signal::Viewability).is_none());
        assert_eq!(feed.direction(), Direction::Backward);
    }

    #[test]
    fn test_last_signal_wins() {
        let mut feed = feed_of(9);
        let tr = tracker();
        tr.prime(&mut feed);
        tr.on_scroll_end(&mut feed, 400.0);
        let t = tr.on_viewable(&mut feed, 3, 80).unwrap();
        assert_eq!(t.from, Some(4));
        assert_eq!(t.to, 3);
        assert_eq!(t.signal, Signal::Viewability);
    }

    #[test]
    fn test_viewability_below_threshold_ignored() {
        let mut feed = feed_of(9);
        let tr = tracker();
        tr.prime(&mut feed);
        assert!(tr.on_viewable(&mut feed, 2, 49).is_none());
        assert_eq!(feed.active_index(), Some(0));
    }

    #[test]
    fn test_nan_offset_ignored() {
        let mut feed = feed_of(3);
        let tr = tracker();
        tr.prime(&mut feed);
        assert!(tr.on_scroll_end(&mut feed, f64::NAN).is_none());
    }
}
