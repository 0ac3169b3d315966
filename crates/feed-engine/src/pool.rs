//! Player pool: owns every `PlayerHandle` and the index → handle mapping.
//!
//! Handles live in numbered slots.  A slot is assigned to at most one feed
//! index at a time; when the window moves and no free slot is left, the
//! assigned slot farthest from the active index is recycled by rebinding its
//! resource to the new locator.  The number of live handles never exceeds
//! `2 * max_distance + 2` (the window on both sides, the active item, and one
//! spare for recycling lag).
//!
//! Loads are tagged with the locator and a per-handle ticket.  A completion
//! whose tag no longer matches the handle is stale and discarded; this is
//! what makes overlapping binds safe without cancellation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use feed_proto::protocol::PlayerStatus;
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::feed::FeedState;
use crate::player::{LoadFuture, PlayerFactory, PlayerResource};
use crate::window::PreloadWindow;

pub type SlotId = usize;

/// The pool's wrapper around one playback resource.
pub struct PlayerHandle {
    slot: SlotId,
    index: Option<usize>,
    status: PlayerStatus,
    bound_locator: Option<String>,
    is_active: bool,
    is_playing: bool,
    is_muted: bool,
    /// Set by `warm`, cleared by rebind and teardown.
    preload_attempted: bool,
    load_ticket: u64,
    load_started: Option<Instant>,
    resource: Box<dyn PlayerResource>,
}

impl PlayerHandle {
    fn new(slot: SlotId, mut resource: Box<dyn PlayerResource>) -> Self {
        resource.set_muted(true);
        Self {
            slot,
            index: None,
            status: PlayerStatus::Idle,
            bound_locator: None,
            is_active: false,
            is_playing: false,
            is_muted: true,
            preload_attempted: false,
            load_ticket: 0,
            load_started: None,
            resource,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    pub fn bound_locator(&self) -> Option<&str> {
        self.bound_locator.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    /// Playing and unmuted.
    pub fn is_audible(&self) -> bool {
        self.is_playing && !self.is_muted
    }

    pub fn preload_attempted(&self) -> bool {
        self.preload_attempted
    }

    pub fn position(&self) -> Duration {
        self.resource.position()
    }

    pub(crate) fn play(&mut self) {
        if !self.is_playing {
            self.resource.play();
            self.is_playing = true;
        }
    }

    pub(crate) fn pause(&mut self) {
        if self.is_playing {
            self.resource.pause();
            self.is_playing = false;
        }
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        if self.is_muted != muted {
            self.resource.set_muted(muted);
            self.is_muted = muted;
        }
    }

    pub(crate) fn seek_to_start(&mut self) {
        self.resource.seek_to_start();
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    /// Pause, mute and drop the active flag.  Buffered position is kept.
    pub(crate) fn silence(&mut self) {
        self.pause();
        self.set_muted(true);
        self.is_active = false;
    }
}

impl fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("slot", &self.slot)
            .field("index", &self.index)
            .field("status", &self.status)
            .field("bound_locator", &self.bound_locator)
            .field("is_active", &self.is_active)
            .field("is_playing", &self.is_playing)
            .field("is_muted", &self.is_muted)
            .finish()
    }
}

/// A load the event loop must spawn.  Its result goes back through
/// `PlayerPool::complete_load` with the same slot, locator and ticket.
pub struct PendingLoad {
    pub slot: SlotId,
    pub locator: String,
    pub ticket: u64,
    pub future: LoadFuture,
}

impl fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLoad")
            .field("slot", &self.slot)
            .field("locator", &self.locator)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

/// A load completion that was applied to a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub slot: SlotId,
    pub index: Option<usize>,
    pub status: PlayerStatus,
    pub latency: Option<Duration>,
}

pub struct PlayerPool {
    factory: Box<dyn PlayerFactory>,
    handles: BTreeMap<SlotId, PlayerHandle>,
    by_index: HashMap<usize, SlotId>,
    next_slot: SlotId,
    capacity: usize,
}

impl PlayerPool {
    pub fn new(factory: Box<dyn PlayerFactory>, max_distance: usize) -> Self {
        Self {
            factory,
            handles: BTreeMap::new(),
            by_index: HashMap::new(),
            next_slot: 0,
            capacity: 2 * max_distance + 2,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.handles.len()
    }

    pub fn handles(&self) -> impl Iterator<Item = &PlayerHandle> {
        self.handles.values()
    }

    pub(crate) fn handles_mut(&mut self) -> impl Iterator<Item = &mut PlayerHandle> {
        self.handles.values_mut()
    }

    pub fn handle(&self, slot: SlotId) -> Option<&PlayerHandle> {
        self.handles.get(&slot)
    }

    pub fn handle_for_index(&self, index: usize) -> Option<&PlayerHandle> {
        self.by_index.get(&index).and_then(|slot| self.handles.get(slot))
    }

    pub(crate) fn handle_for_index_mut(&mut self, index: usize) -> Option<&mut PlayerHandle> {
        let slot = *self.by_index.get(&index)?;
        self.handles.get_mut(&slot)
    }

    pub fn audible_count(&self) -> usize {
        self.handles.values().filter(|h| h.is_audible()).count()
    }

    /// Materialise and warm handles for `active` and every index in `window`,
    /// most urgent first.  Returns the loads that were started.
    pub fn sync_window(
        &mut self,
        feed: &FeedState,
        active: usize,
        window: &PreloadWindow,
    ) -> Vec<PendingLoad> {
        let mut wanted = vec![active];
        wanted.extend(window.by_priority(active));
        let keep: HashSet<usize> = wanted.iter().copied().collect();

        let mut loads = Vec::new();
        for &index in &wanted {
            let Some(item) = feed.get(index) else {
                continue;
            };
            if let Some(load) = self.ensure_handle(index, &item.url, active, &keep) {
                loads.push(load);
            }
        }
        for &index in &wanted {
            if let Some(load) = self.warm(index) {
                loads.push(load);
            }
        }
        loads
    }

    /// Make sure `index` has a handle bound to `locator`.
    ///
    /// An existing handle already bound to `locator` is left untouched.  One
    /// bound elsewhere is rebound (status `Loading`, load started).  A new
    /// assignment takes a free slot, grows the pool, or recycles the slot
    /// farthest from `active` that is not in `keep`.
    pub fn ensure_handle(
        &mut self,
        index: usize,
        locator: &str,
        active: usize,
        keep: &HashSet<usize>,
    ) -> Option<PendingLoad> {
        if let Some(&slot) = self.by_index.get(&index) {
            let handle = self.handles.get_mut(&slot)?;
            if handle.bound_locator.as_deref() == Some(locator) {
                return None;
            }
            return Some(rebind(self.factory.as_mut(), handle, locator));
        }

        let Some(slot) = self.acquire_slot(active, keep) else {
            warn!(
                "pool: no slot available for index {} ({} live, capacity {})",
                index,
                self.handles.len(),
                self.capacity
            );
            return None;
        };
        let handle = self.handles.get_mut(&slot)?;
        handle.index = Some(index);
        self.by_index.insert(index, slot);

        let current = handle.bound_locator.clone();
        match current.as_deref() {
            None => {
                debug!("pool: slot {} attached to index {} ({})", slot, index, locator);
                handle.bound_locator = Some(locator.to_string());
                handle.status = PlayerStatus::Idle;
                handle.preload_attempted = false;
                None
            }
            Some(bound) if bound == locator => None,
            Some(_) => Some(rebind(self.factory.as_mut(), handle, locator)),
        }
    }

    /// Ask the handle at `index` to start buffering.  Only an idle handle with
    /// a bound locator is warmed, and only once per binding.
    pub fn warm(&mut self, index: usize) -> Option<PendingLoad> {
        let slot = *self.by_index.get(&index)?;
        let handle = self.handles.get_mut(&slot)?;
        if handle.status != PlayerStatus::Idle || handle.preload_attempted {
            return None;
        }
        let locator = handle.bound_locator.clone()?;
        handle.preload_attempted = true;
        debug!("pool: warming slot {} (index {})", slot, index);
        Some(start_load(self.factory.as_mut(), handle, locator))
    }

    /// Apply a finished load.  Returns `None` when the completion is stale
    /// (slot destroyed, rebound, or superseded by a newer load).
    pub fn complete_load(
        &mut self,
        slot: SlotId,
        locator: &str,
        ticket: u64,
        result: Result<(), LoadError>,
    ) -> Option<LoadOutcome> {
        let Some(handle) = self.handles.get_mut(&slot) else {
            debug!("pool: load for destroyed slot {} discarded", slot);
            return None;
        };
        if handle.bound_locator.as_deref() != Some(locator)
            || handle.load_ticket != ticket
            || handle.status != PlayerStatus::Loading
        {
            debug!(
                "pool: stale load completion slot={} locator={} ticket={} discarded",
                slot, locator, ticket
            );
            return None;
        }

        let latency = handle.load_started.take().map(|t| t.elapsed());
        handle.status = match result {
            Ok(()) => PlayerStatus::Ready,
            Err(e) => {
                warn!("pool: slot {} load failed: {}", slot, e);
                PlayerStatus::Error
            }
        };
        debug!(
            "pool: slot {} (index {:?}) → {:?}",
            slot, handle.index, handle.status
        );

        Some(LoadOutcome {
            slot,
            index: handle.index,
            status: handle.status,
            latency,
        })
    }

    /// Destroy every handle whose index is not in `keep`.  Returns how many
    /// were released.
    pub fn shrink_to(&mut self, keep: &HashSet<usize>) -> usize {
        let doomed: Vec<SlotId> = self
            .handles
            .values()
            .filter(|h| h.index.map_or(true, |i| !keep.contains(&i)))
            .map(|h| h.slot)
            .collect();
        for &slot in &doomed {
            self.destroy(slot);
        }
        if !doomed.is_empty() {
            info!(
                "pool: shrunk by {} to {} live handles",
                doomed.len(),
                self.handles.len()
            );
        }
        doomed.len()
    }

    pub fn destroy(&mut self, slot: SlotId) {
        let Some(mut handle) = self.handles.remove(&slot) else {
            return;
        };
        if let Some(index) = handle.index.take() {
            self.by_index.remove(&index);
        }
        handle.silence();
        handle.preload_attempted = false;
        handle.bound_locator = None;
        debug!("pool: slot {} destroyed", slot);
        self.factory.destroy(handle.resource);
    }

    /// Release everything.
    pub fn shutdown(&mut self) {
        let slots: Vec<SlotId> = self.handles.keys().copied().collect();
        for slot in slots {
            self.destroy(slot);
        }
        info!("pool: all handles released");
    }

    /// Pick a slot for a new assignment: free slot, then a new handle while
    /// under capacity, then the farthest recyclable one.
    fn acquire_slot(&mut self, active: usize, keep: &HashSet<usize>) -> Option<SlotId> {
        if let Some(slot) = self.handles.values().find(|h| h.index.is_none()).map(|h| h.slot) {
            return Some(slot);
        }

        if self.handles.len() < self.capacity {
            let slot = self.next_slot;
            self.next_slot += 1;
            let resource = self.factory.create();
            self.handles.insert(slot, PlayerHandle::new(slot, resource));
            debug!("pool: created slot {} ({} live)", slot, self.handles.len());
            return Some(slot);
        }

        let (old_index, slot) = self
            .handles
            .values()
            .filter_map(|h| h.index.map(|i| (i, h.slot)))
            .filter(|(i, _)| !keep.contains(i))
            .max_by_key(|(i, _)| i.abs_diff(active))?;
        self.by_index.remove(&old_index);
        if let Some(handle) = self.handles.get_mut(&slot) {
            handle.index = None;
            handle.silence();
        }
        debug!("pool: recycling slot {} from index {}", slot, old_index);
        Some(slot)
    }
}

fn rebind(
    factory: &mut dyn PlayerFactory,
    handle: &mut PlayerHandle,
    locator: &str,
) -> PendingLoad {
    info!(
        "pool: slot {} rebind {:?} → {}",
        handle.slot, handle.bound_locator, locator
    );
    handle.silence();
    handle.bound_locator = Some(locator.to_string());
    handle.preload_attempted = false;
    start_load(factory, handle, locator.to_string())
}

fn start_load(
    factory: &mut dyn PlayerFactory,
    handle: &mut PlayerHandle,
    locator: String,
) -> PendingLoad {
    handle.status = PlayerStatus::Loading;
    handle.load_ticket += 1;
    handle.load_started = Some(Instant::now());
    let future = factory.bind(handle.resource.as_mut(), &locator);
    PendingLoad {
        slot: handle.slot,
        locator,
        ticket: handle.load_ticket,
        future,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::compute_window;
    use feed_proto::protocol::{Direction, FeedItem};
    use futures_util::future::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Counters {
        created: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
        binds: Arc<Mutex<Vec<String>>>,
    }

    impl Counters {
        fn binds_of(&self, locator: &str) -> usize {
            self.binds
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.as_str() == locator)
                .count()
        }
    }

    struct NullResource;

    impl PlayerResource for NullResource {
        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn set_muted(&mut self, _muted: bool) {}
        fn seek_to_start(&mut self) {}
        fn position(&self) -> Duration {
            Duration::ZERO
        }
        fn release(&mut self) {}
    }

    struct CountingFactory(Counters);

    impl PlayerFactory for CountingFactory {
        fn create(&mut self) -> Box<dyn PlayerResource> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            Box::new(NullResource)
        }

        fn bind(&mut self, _resource: &mut dyn PlayerResource, locator: &str) -> LoadFuture {
            self.0.binds.lock().unwrap().push(locator.to_string());
            futures_util::future::pending().boxed()
        }

        fn destroy(&mut self, mut resource: Box<dyn PlayerResource>) {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
            resource.release();
        }
    }

    fn url(i: usize) -> String {
        format!("https://cdn/{}.m3u8", i)
    }

    fn feed_of(n: usize) -> FeedState {
        let mut feed = FeedState::new();
        feed.append(
            (0..n)
                .map(|i| FeedItem::new(format!("v{}", i), url(i)))
                .collect(),
        );
        feed
    }

    fn pool(max_distance: usize) -> (PlayerPool, Counters) {
        let counters = Counters::default();
        let pool = PlayerPool::new(Box::new(CountingFactory(counters.clone())), max_distance);
        (pool, counters)
    }

    fn sync(
        pool: &mut PlayerPool,
        feed: &FeedState,
        active: usize,
        dir: Direction,
        d: usize,
    ) -> Vec<PendingLoad> {
        let window = compute_window(active, dir, feed.len(), d);
        pool.sync_window(feed, active, &window)
    }

    #[test]
    fn test_sync_materialises_and_warms_window() {
        let feed = feed_of(9);
        let (mut pool, counters) = pool(5);
        let loads = sync(&mut pool, &feed, 0, Direction::Forward, 5);

        assert_eq!(pool.capacity(), 12);
        assert_eq!(pool.live_count(), 6);
        assert_eq!(loads.len(), 6);
        // Active item is loaded first.
        assert_eq!(loads[0].locator, url(0));
        for i in 0..=5 {
            let h = pool.handle_for_index(i).unwrap();
            assert_eq!(h.status(), PlayerStatus::Loading);
            assert_eq!(h.bound_locator(), Some(url(i).as_str()));
            assert!(h.preload_attempted());
        }
        assert!(pool.handle_for_index(6).is_none());
        assert_eq!(counters.created.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_ensure_same_locator_leaves_status_alone() {
        let feed = feed_of(3);
        let (mut pool, _) = pool(1);
        let loads = sync(&mut pool, &feed, 0, Direction::Forward, 1);
        let first = &loads[0];
        let outcome = pool
            .complete_load(first.slot, &first.locator, first.ticket, Ok(()))
            .unwrap();
        assert_eq!(outcome.status, PlayerStatus::Ready);
        assert_eq!(outcome.index, Some(0));

        let keep: HashSet<usize> = [0].into_iter().collect();
        assert!(pool.ensure_handle(0, &url(0), 0, &keep).is_none());
        assert_eq!(pool.handle_for_index(0).unwrap().status(), PlayerStatus::Ready);
    }

    #[test]
    fn test_warm_runs_once_per_binding() {
        let feed = feed_of(3);
        let (mut pool, counters) = pool(1);
        // Nothing bound at index 2 yet.
        assert!(pool.warm(2).is_none());

        let keep: HashSet<usize> = [2].into_iter().collect();
        assert!(pool.ensure_handle(2, &feed.get(2).unwrap().url, 2, &keep).is_none());
        assert_eq!(pool.handle_for_index(2).unwrap().status(), PlayerStatus::Idle);

        assert!(pool.warm(2).is_some());
        assert!(pool.warm(2).is_none());
        assert_eq!(counters.binds_of(&url(2)), 1);
    }

    #[test]
    fn test_rebind_replaces_locator_and_resets_preload_marker() {
        let feed = feed_of(3);
        let (mut pool, counters) = pool(1);
        let loads = sync(&mut pool, &feed, 0, Direction::Forward, 1);
        let slot = pool.handle_for_index(0).unwrap().slot();
        pool.complete_load(slot, &loads[0].locator, loads[0].ticket, Ok(()));

        let keep: HashSet<usize> = [0].into_iter().collect();
        let load = pool.ensure_handle(0, "https://cdn/other.m3u8", 0, &keep).unwrap();
        assert_eq!(load.slot, slot);
        let h = pool.handle_for_index(0).unwrap();
        assert_eq!(h.status(), PlayerStatus::Loading);
        assert_eq!(h.bound_locator(), Some("https://cdn/other.m3u8"));
        assert!(!h.preload_attempted());
        assert_eq!(counters.binds_of("https://cdn/other.m3u8"), 1);
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let feed = feed_of(3);
        let (mut pool, _) = pool(1);
        let loads = sync(&mut pool, &feed, 0, Direction::Forward, 1);
        let old = &loads[0];

        let keep: HashSet<usize> = [0].into_iter().collect();
        let newer = pool.ensure_handle(0, "https://cdn/other.m3u8", 0, &keep).unwrap();

        // The superseded load finishes first: ignored.
        assert!(pool
            .complete_load(old.slot, &old.locator, old.ticket, Ok(()))
            .is_none());
        assert_eq!(pool.handle_for_index(0).unwrap().status(), PlayerStatus::Loading);

        let outcome = pool
            .complete_load(newer.slot, &newer.locator, newer.ticket, Ok(()))
            .unwrap();
        assert_eq!(outcome.status, PlayerStatus::Ready);
        assert!(outcome.latency.is_some());

        // A duplicate delivery of the same completion is stale too.
        assert!(pool
            .complete_load(newer.slot, &newer.locator, newer.ticket, Ok(()))
            .is_none());
    }

    #[test]
    fn test_failed_load_sets_error_until_rebind() {
        let feed = feed_of(3);
        let (mut pool, _) = pool(1);
        let loads = sync(&mut pool, &feed, 0, Direction::Forward, 1);
        let first = &loads[0];
        let outcome = pool
            .complete_load(
                first.slot,
                &first.locator,
                first.ticket,
                Err(LoadError::Unsupported(first.locator.clone())),
            )
            .unwrap();
        assert_eq!(outcome.status, PlayerStatus::Error);
        // No retry on re-sync.
        assert!(sync(&mut pool, &feed, 0, Direction::Forward, 1).is_empty());
        assert_eq!(pool.handle_for_index(0).unwrap().status(), PlayerStatus::Error);

        let keep: HashSet<usize> = [0].into_iter().collect();
        let retry = pool.ensure_handle(0, "https://cdn/fixed.m3u8", 0, &keep).unwrap();
        assert_eq!(pool.handle_for_index(0).unwrap().status(), PlayerStatus::Loading);
        pool.complete_load(retry.slot, &retry.locator, retry.ticket, Ok(()));
        assert_eq!(pool.handle_for_index(0).unwrap().status(), PlayerStatus::Ready);
    }

    #[test]
    fn test_far_jump_recycles_instead_of_creating() {
        let feed = feed_of(10);
        let (mut pool, counters) = pool(1);
        assert_eq!(pool.capacity(), 4);

        sync(&mut pool, &feed, 0, Direction::Forward, 1);
        let slot_of_zero = pool.handle_for_index(0).unwrap().slot();
        assert_eq!(pool.live_count(), 2);

        let loads = sync(&mut pool, &feed, 5, Direction::Forward, 1);
        assert_eq!(pool.live_count(), 4);
        assert_eq!(counters.created.load(Ordering::SeqCst), 4);
        assert!(pool.handle_for_index(0).is_none());
        // Index 1 is still retained; index 0 (farthest) was recycled for 4.
        assert!(pool.handle_for_index(1).is_some());
        let recycled = pool.handle_for_index(4).unwrap();
        assert_eq!(recycled.slot(), slot_of_zero);
        assert_eq!(recycled.bound_locator(), Some(url(4).as_str()));
        assert_eq!(recycled.status(), PlayerStatus::Loading);
        assert!(loads.iter().any(|l| l.slot == slot_of_zero && l.locator == url(4)));
    }

    #[test]
    fn test_live_handles_stay_bounded_under_scrolling() {
        let feed = feed_of(40);
        let (mut pool, counters) = pool(2);
        let walk = [0usize, 3, 7, 6, 12, 30, 29, 2, 39, 0, 20];
        let mut prev = 0;
        for &active in &walk {
            let dir = if active >= prev { Direction::Forward } else { Direction::Backward };
            sync(&mut pool, &feed, active, dir, 2);
            assert!(pool.live_count() <= pool.capacity());
            assert!(pool.handle_for_index(active).is_some());
            prev = active;
        }
        assert!(counters.created.load(Ordering::SeqCst) <= pool.capacity());
    }

    #[test]
    fn test_shrink_and_shutdown_release_resources() {
        let feed = feed_of(10);
        let (mut pool, counters) = pool(1);
        sync(&mut pool, &feed, 0, Direction::Forward, 1);
        sync(&mut pool, &feed, 5, Direction::Forward, 1);
        assert_eq!(pool.live_count(), 4);

        let keep: HashSet<usize> = [4, 5, 6].into_iter().collect();
        assert_eq!(pool.shrink_to(&keep), 1);
        assert!(pool.handle_for_index(1).is_none());
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);

        pool.shutdown();
        assert_eq!(pool.live_count(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 4);
    }
}
