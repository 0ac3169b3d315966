/// FeedCore: single-owner event loop for all engine state.
///
/// Scroll signals, load completions, fetch completions and lifecycle changes
/// all arrive as `FeedEvent`s on one mpsc channel and are handled strictly in
/// arrival order.  FeedCore owns `FeedState`, the `PlayerPool`, the playback
/// arbiter and the paginator exclusively; nothing else mutates them.
///
/// Handlers never await.  Work that has to happen off the loop (player binds,
/// page fetches) is queued as a `Job`; `run` spawns queued jobs after every
/// event and each spawned task posts its result back as another event.
///
/// After every event FeedCore refreshes the shared `FeedSnapshot` and
/// broadcasts `FeedBroadcast::SnapshotUpdated`.
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use feed_proto::config::Config;
use feed_proto::protocol::{FeedItem, FeedSnapshot, HandleView, PlayerStatus};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, FetchError, LoadError, Result};
use crate::feed::FeedState;
use crate::metrics::{
    MetricsSink, PreloadStats, FETCH_APPENDED, LOAD_LATENCY_MS, PRELOAD_HIT, PRELOAD_HIT_RATE,
};
use crate::pagination::Paginator;
use crate::player::PlayerFactory;
use crate::pool::{PendingLoad, PlayerPool, SlotId};
use crate::source::{FeedSource, FetchFuture};
use crate::sync::PlaybackSync;
use crate::tracker::{ScrollTracker, Transition};
use crate::window::compute_window;
use crate::FeedBroadcast;

/// Latest published snapshot, shared with the HTTP surface.
/// std lock: writers are the sync handlers and no guard is held across an await.
pub type SnapshotStore = Arc<RwLock<FeedSnapshot>>;

// ── EngineSettings ────────────────────────────────────────────────────────────

/// Validated engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_preload_distance: usize,
    pub low_watermark: usize,
    pub fetch_batch_size: usize,
    pub viewability_threshold: u8,
    pub item_extent: f64,
    pub initial_count: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_preload_distance: 5,
            low_watermark: 2,
            fetch_batch_size: 3,
            viewability_threshold: 50,
            item_extent: 800.0,
            initial_count: 10,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = &config.engine;
        if engine.max_preload_distance == 0 {
            return Err(EngineError::Config(
                "engine.max_preload_distance must be at least 1".into(),
            ));
        }
        if engine.fetch_batch_size == 0 {
            return Err(EngineError::Config(
                "engine.fetch_batch_size must be at least 1".into(),
            ));
        }
        if engine.viewability_threshold > 100 {
            return Err(EngineError::Config(format!(
                "engine.viewability_threshold is a percentage, got {}",
                engine.viewability_threshold
            )));
        }
        if !(engine.item_extent.is_finite() && engine.item_extent > 0.0) {
            return Err(EngineError::Config(format!(
                "engine.item_extent must be positive, got {}",
                engine.item_extent
            )));
        }
        Ok(Self {
            max_preload_distance: engine.max_preload_distance,
            low_watermark: engine.low_watermark,
            fetch_batch_size: engine.fetch_batch_size,
            viewability_threshold: engine.viewability_threshold,
            item_extent: engine.item_extent,
            initial_count: config.source.initial_count.max(1),
        })
    }
}

// ── FeedEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the FeedCore loop.
#[derive(Debug)]
pub enum FeedEvent {
    /// A momentum scroll settled at `offset` (scroll units).
    ScrollEnded { offset: f64 },
    /// The list reports `index` as `percent_visible` percent on screen.
    Viewable { index: i64, percent_visible: u8 },
    /// A player bind finished.  Carries the tag it was issued with.
    LoadFinished {
        slot: SlotId,
        locator: String,
        ticket: u64,
        result: std::result::Result<(), LoadError>,
    },
    FetchFinished(std::result::Result<Vec<FeedItem>, FetchError>),
    /// Process moved to the foreground (`true`) or background.
    Foreground(bool),
    /// Manual play/pause on the active item.
    TogglePause,
    /// Release every handle outside the current window.
    MemoryPressure,
    Shutdown,
}

/// Off-loop work queued by a handler.
pub enum Job {
    Load(PendingLoad),
    Fetch(FetchFuture),
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Load(load) => f.debug_tuple("Load").field(load).finish(),
            Job::Fetch(_) => f.write_str("Fetch"),
        }
    }
}

// ── FeedCore ──────────────────────────────────────────────────────────────────

pub struct FeedCore {
    settings: EngineSettings,
    feed: FeedState,
    tracker: ScrollTracker,
    pool: PlayerPool,
    sync: PlaybackSync,
    paginator: Paginator,
    source: Arc<dyn FeedSource>,
    metrics: Arc<dyn MetricsSink>,
    preload_stats: PreloadStats,
    /// Weak so the loop ends once every outside sender and in-flight task is gone.
    event_tx: mpsc::WeakSender<FeedEvent>,
    broadcast_tx: broadcast::Sender<FeedBroadcast>,
    snapshot: SnapshotStore,
    jobs: Vec<Job>,
    rev: u64,
    shut_down: bool,
}

impl FeedCore {
    pub fn new(
        settings: EngineSettings,
        factory: Box<dyn PlayerFactory>,
        source: Arc<dyn FeedSource>,
        metrics: Arc<dyn MetricsSink>,
        event_tx: &mpsc::Sender<FeedEvent>,
        broadcast_tx: broadcast::Sender<FeedBroadcast>,
    ) -> Self {
        let pool = PlayerPool::new(factory, settings.max_preload_distance);
        info!(
            "FeedCore: max_distance={} pool capacity={} watermark={} batch={}",
            settings.max_preload_distance,
            pool.capacity(),
            settings.low_watermark,
            settings.fetch_batch_size
        );
        Self {
            tracker: ScrollTracker::new(settings.item_extent, settings.viewability_threshold),
            paginator: Paginator::new(settings.low_watermark, settings.fetch_batch_size),
            settings,
            feed: FeedState::new(),
            pool,
            sync: PlaybackSync::new(),
            source,
            metrics,
            preload_stats: PreloadStats::new(),
            event_tx: event_tx.downgrade(),
            broadcast_tx,
            snapshot: Arc::new(RwLock::new(FeedSnapshot::default())),
            jobs: Vec::new(),
            rev: 0,
            shut_down: false,
        }
    }

    /// Shared handle to the latest snapshot (for the HTTP server).
    pub fn snapshot_store(&self) -> SnapshotStore {
        Arc::clone(&self.snapshot)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn feed(&self) -> &FeedState {
        &self.feed
    }

    pub fn pool(&self) -> &PlayerPool {
        &self.pool
    }

    pub fn playback(&self) -> &PlaybackSync {
        &self.sync
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn preload_stats(&self) -> &PreloadStats {
        &self.preload_stats
    }

    /// Load the first page and activate index 0.
    pub async fn bootstrap(&mut self) -> Result<usize> {
        let items = self.source.list(self.settings.initial_count).await?;
        let added = self.feed.append(items);
        info!("FeedCore: bootstrapped with {} item(s)", added);
        if let Some(t) = self.tracker.prime(&mut self.feed) {
            self.on_transition(t);
        }
        self.publish();
        Ok(added)
    }

    /// Run the event loop.  Returns after `Shutdown` or once the channel closes.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<FeedEvent>) {
        info!("FeedCore: starting event loop");
        self.spawn_jobs();

        loop {
            match event_rx.recv().await {
                None => {
                    info!("FeedCore: event channel closed, shutting down");
                    break;
                }
                Some(evt) => {
                    if !self.handle_event(evt) {
                        break;
                    }
                    self.spawn_jobs();
                }
            }
        }

        self.shutdown();
    }

    /// Apply one event.  Returns `false` once the core has shut down.
    pub fn handle_event(&mut self, evt: FeedEvent) -> bool {
        if self.shut_down {
            debug!("FeedCore: {:?} after shutdown ignored", evt);
            return false;
        }

        match evt {
            FeedEvent::ScrollEnded { offset } => {
                if let Some(t) = self.tracker.on_scroll_end(&mut self.feed, offset) {
                    self.on_transition(t);
                }
            }
            FeedEvent::Viewable {
                index,
                percent_visible,
            } => {
                if let Some(t) = self
                    .tracker
                    .on_viewable(&mut self.feed, index, percent_visible)
                {
                    self.on_transition(t);
                }
            }
            FeedEvent::LoadFinished {
                slot,
                locator,
                ticket,
                result,
            } => self.on_load_finished(slot, &locator, ticket, result),
            FeedEvent::FetchFinished(result) => self.on_fetch_finished(result),
            FeedEvent::Foreground(foreground) => {
                self.sync.on_foreground(&mut self.pool, foreground)
            }
            FeedEvent::TogglePause => {
                self.sync.toggle_pause(&mut self.pool);
            }
            FeedEvent::MemoryPressure => self.on_memory_pressure(),
            FeedEvent::Shutdown => {
                info!("FeedCore: shutdown requested");
                self.shutdown();
                return false;
            }
        }

        self.publish();
        true
    }

    /// Take the jobs queued since the last call without spawning them.
    pub fn drain_jobs(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.jobs)
    }

    /// Spawn queued jobs on the current runtime; each posts its result back.
    pub fn spawn_jobs(&mut self) {
        let jobs = self.drain_jobs();
        if jobs.is_empty() {
            return;
        }
        let Some(tx) = self.event_tx.upgrade() else {
            debug!("FeedCore: event channel gone, dropping {} job(s)", jobs.len());
            return;
        };
        for job in jobs {
            let tx = tx.clone();
            match job {
                Job::Load(load) => {
                    tokio::spawn(async move {
                        let PendingLoad {
                            slot,
                            locator,
                            ticket,
                            future,
                        } = load;
                        let result = future.await;
                        let evt = FeedEvent::LoadFinished {
                            slot,
                            locator,
                            ticket,
                            result,
                        };
                        if tx.send(evt).await.is_err() {
                            debug!("FeedCore: load for slot {} finished after shutdown", slot);
                        }
                    });
                }
                Job::Fetch(future) => {
                    tokio::spawn(async move {
                        let result = future.await;
                        if tx.send(FeedEvent::FetchFinished(result)).await.is_err() {
                            debug!("FeedCore: fetch finished after shutdown");
                        }
                    });
                }
            }
        }
    }

    /// Build the collaborator view of the current state.
    pub fn snapshot(&self) -> FeedSnapshot {
        let mut handles: Vec<HandleView> = self
            .pool
            .handles()
            .filter_map(|h| {
                let index = h.index()?;
                let item = self.feed.get(index)?;
                Some(HandleView {
                    index,
                    item_id: item.id.clone(),
                    slot: h.slot(),
                    status: h.status(),
                    bound_locator: h.bound_locator().map(str::to_string),
                    is_active: h.is_active(),
                    is_playing: h.is_playing(),
                    is_muted: h.is_muted(),
                    position_ms: h.position().as_millis() as u64,
                })
            })
            .collect();
        handles.sort_by_key(|h| h.index);

        FeedSnapshot {
            rev: self.rev,
            active_index: self.feed.active_index(),
            direction: self.feed.direction(),
            item_count: self.feed.len(),
            fetch_in_flight: self.paginator.in_flight(),
            user_paused: self.sync.is_user_paused(),
            foreground: self.sync.is_foreground(),
            handles,
            updated_at: Utc::now(),
        }
    }

    // ── transitions ───────────────────────────────────────────────────────────

    fn on_transition(&mut self, t: Transition) {
        info!(
            "FeedCore: index {:?} → {} ({:?}, {:?})",
            t.from, t.to, t.direction, t.signal
        );

        let hit = self
            .pool
            .handle_for_index(t.to)
            .is_some_and(|h| h.status() == PlayerStatus::Ready);

        self.sync_window(t.to);
        self.sync.on_active_changed(&mut self.pool, t.to);

        if t.from.is_some() {
            self.preload_stats.record(hit);
            self.metrics.record(PRELOAD_HIT, if hit { 1.0 } else { 0.0 });
            if let Some(rate) = self.preload_stats.hit_rate() {
                self.metrics.record(PRELOAD_HIT_RATE, rate);
            }
        }

        self.check_pagination(t.to);
    }

    fn sync_window(&mut self, active: usize) {
        let window = compute_window(
            active,
            self.feed.direction(),
            self.feed.len(),
            self.settings.max_preload_distance,
        );
        debug!(
            "FeedCore: window ahead={:?} behind={:?}",
            window.ahead, window.behind
        );
        let loads = self.pool.sync_window(&self.feed, active, &window);
        self.jobs.extend(loads.into_iter().map(Job::Load));
    }

    fn check_pagination(&mut self, active: usize) {
        if let Some(req) = self.paginator.maybe_fetch_more(active, self.feed.len()) {
            self.jobs.push(Job::Fetch(self.source.fetch_more(req.count)));
        }
    }

    fn on_load_finished(
        &mut self,
        slot: SlotId,
        locator: &str,
        ticket: u64,
        result: std::result::Result<(), LoadError>,
    ) {
        let Some(outcome) = self.pool.complete_load(slot, locator, ticket, result) else {
            return;
        };
        if let Some(latency) = outcome.latency {
            self.metrics
                .record(LOAD_LATENCY_MS, latency.as_secs_f64() * 1000.0);
        }
        if let Some(index) = outcome.index {
            self.sync
                .on_status_changed(&mut self.pool, index, outcome.status);
        }
    }

    fn on_fetch_finished(&mut self, result: std::result::Result<Vec<FeedItem>, FetchError>) {
        let added = self.paginator.complete(&mut self.feed, result);
        self.metrics.record(FETCH_APPENDED, added as f64);
        if added == 0 {
            return;
        }
        let _ = self.broadcast_tx.send(FeedBroadcast::ItemsAppended {
            added,
            total: self.feed.len(),
        });

        match self.feed.active_index() {
            Some(active) => {
                // New items may fall inside the current window.
                self.sync_window(active);
                self.check_pagination(active);
            }
            None => {
                if let Some(t) = self.tracker.prime(&mut self.feed) {
                    self.on_transition(t);
                }
            }
        }
    }

    fn on_memory_pressure(&mut self) {
        let mut keep = HashSet::new();
        if let Some(active) = self.feed.active_index() {
            let window = compute_window(
                active,
                self.feed.direction(),
                self.feed.len(),
                self.settings.max_preload_distance,
            );
            keep.insert(active);
            keep.extend(window.ahead);
            keep.extend(window.behind);
        }
        let released = self.pool.shrink_to(&keep);
        warn!(
            "FeedCore: memory pressure, released {} handle(s), {} live",
            released,
            self.pool.live_count()
        );
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.jobs.clear();
        self.pool.shutdown();
        self.publish();
    }

    fn publish(&mut self) {
        self.rev += 1;
        let snapshot = self.snapshot();
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(e) => warn!("FeedCore: snapshot lock poisoned: {}", e),
        }
        let _ = self
            .broadcast_tx
            .send(FeedBroadcast::SnapshotUpdated { rev: self.rev });
    }
}
