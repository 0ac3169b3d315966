//! Scripted collaborators for driving `FeedCore` by hand.
//!
//! Loads never finish on their own: the harness keeps every `PendingLoad` and
//! the test decides when (and in which order) each one completes.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use feed_engine::core::{EngineSettings, FeedCore, FeedEvent, Job};
use feed_engine::error::{FetchError, LoadError};
use feed_engine::metrics::MetricsSink;
use feed_engine::player::{LoadFuture, PlayerFactory, PlayerResource};
use feed_engine::pool::PendingLoad;
use feed_engine::source::{FeedSource, FetchFuture};
use feed_engine::FeedBroadcast;
use feed_proto::protocol::{FeedItem, FeedSnapshot};
use futures_util::future::FutureExt;
use tokio::sync::{broadcast, mpsc};

pub fn url(i: usize) -> String {
    format!("https://cdn.test/{}/master.m3u8", i)
}

pub fn item(i: usize) -> FeedItem {
    FeedItem::new(format!("clip-{}", i), url(i))
}

// ── factory ───────────────────────────────────────────────────────────────────

/// Every command any resource received, in order.
#[derive(Debug, Default)]
pub struct PlayerLog {
    pub created: usize,
    pub destroyed: usize,
    pub binds: Vec<String>,
    pub plays: usize,
    pub pauses: usize,
    pub seeks: usize,
}

pub type SharedLog = Arc<Mutex<PlayerLog>>;

struct ScriptedResource(SharedLog);

impl PlayerResource for ScriptedResource {
    fn play(&mut self) {
        self.0.lock().unwrap().plays += 1;
    }
    fn pause(&mut self) {
        self.0.lock().unwrap().pauses += 1;
    }
    fn set_muted(&mut self, _muted: bool) {}
    fn seek_to_start(&mut self) {
        self.0.lock().unwrap().seeks += 1;
    }
    fn position(&self) -> Duration {
        Duration::ZERO
    }
    fn release(&mut self) {}
}

pub struct ScriptedFactory(pub SharedLog);

impl PlayerFactory for ScriptedFactory {
    fn create(&mut self) -> Box<dyn PlayerResource> {
        self.0.lock().unwrap().created += 1;
        Box::new(ScriptedResource(self.0.clone()))
    }

    fn bind(&mut self, _resource: &mut dyn PlayerResource, locator: &str) -> LoadFuture {
        self.0.lock().unwrap().binds.push(locator.to_string());
        futures_util::future::pending().boxed()
    }

    fn destroy(&mut self, mut resource: Box<dyn PlayerResource>) {
        self.0.lock().unwrap().destroyed += 1;
        resource.release();
    }
}

// ── source ────────────────────────────────────────────────────────────────────

/// Serves `clip-0..clip-{total}` in pages.  Queued failures are handed out
/// by the next `fetch_more` calls before any page.
pub struct ScriptedSource {
    total: usize,
    cursor: Mutex<usize>,
    failures: Mutex<VecDeque<FetchError>>,
    fetch_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            cursor: Mutex::new(0),
            failures: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, err: FetchError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn page(&self, start: Option<usize>, count: usize) -> Vec<FeedItem> {
        let mut cursor = self.cursor.lock().unwrap();
        let from = start.unwrap_or(*cursor);
        let to = (from + count).min(self.total);
        *cursor = to;
        (from..to).map(item).collect()
    }
}

impl FeedSource for ScriptedSource {
    fn list(&self, count: usize) -> FetchFuture {
        let items = self.page(Some(0), count);
        async move { Ok(items) }.boxed()
    }

    fn fetch_more(&self, count: usize) -> FetchFuture {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let result = match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => {
                let items = self.page(None, count);
                if items.is_empty() {
                    Err(FetchError::Exhausted)
                } else {
                    Ok(items)
                }
            }
        };
        async move { result }.boxed()
    }
}

// ── metrics ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingMetrics(pub Mutex<Vec<(&'static str, f64)>>);

impl RecordingMetrics {
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record(&self, name: &'static str, value: f64) {
        self.0.lock().unwrap().push((name, value));
    }
}

// ── harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub core: FeedCore,
    pub log: SharedLog,
    pub source: Arc<ScriptedSource>,
    pub metrics: Arc<RecordingMetrics>,
    pub loads: Vec<PendingLoad>,
    pub fetches: Vec<FetchFuture>,
    pub broadcast_rx: broadcast::Receiver<FeedBroadcast>,
    // Keeps the channel open; the harness delivers events itself.
    _event_tx: mpsc::Sender<FeedEvent>,
    _event_rx: mpsc::Receiver<FeedEvent>,
}

impl Harness {
    /// `initial` items up front, `total` available through pagination.
    pub async fn new(initial: usize, total: usize, max_distance: usize) -> Self {
        let settings = EngineSettings {
            max_preload_distance: max_distance,
            initial_count: initial,
            ..EngineSettings::default()
        };
        let log = SharedLog::default();
        let source = Arc::new(ScriptedSource::new(total));
        let metrics = Arc::new(RecordingMetrics::default());
        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(1024);

        let mut core = FeedCore::new(
            settings,
            Box::new(ScriptedFactory(log.clone())),
            source.clone(),
            metrics.clone(),
            &event_tx,
            broadcast_tx,
        );
        core.bootstrap().await.unwrap();

        let mut harness = Self {
            core,
            log,
            source,
            metrics,
            loads: Vec::new(),
            fetches: Vec::new(),
            broadcast_rx,
            _event_tx: event_tx,
            _event_rx: event_rx,
        };
        harness.collect();
        harness
    }

    pub fn send(&mut self, evt: FeedEvent) -> bool {
        let alive = self.core.handle_event(evt);
        self.collect();
        alive
    }

    pub fn view(&mut self, index: i64) {
        self.send(FeedEvent::Viewable {
            index,
            percent_visible: 100,
        });
    }

    pub fn scroll_to(&mut self, index: usize) {
        let offset = index as f64 * self.core.settings().item_extent;
        self.send(FeedEvent::ScrollEnded { offset });
    }

    fn collect(&mut self) {
        for job in self.core.drain_jobs() {
            match job {
                Job::Load(load) => self.loads.push(load),
                Job::Fetch(fetch) => self.fetches.push(fetch),
            }
        }
    }

    /// Remove the outstanding loads for `locator`, oldest first.
    pub fn take_loads(&mut self, locator: &str) -> Vec<PendingLoad> {
        let (taken, rest): (Vec<_>, Vec<_>) =
            self.loads.drain(..).partition(|l| l.locator == locator);
        self.loads = rest;
        taken
    }

    pub fn deliver(&mut self, load: PendingLoad, result: Result<(), LoadError>) {
        self.send(FeedEvent::LoadFinished {
            slot: load.slot,
            locator: load.locator,
            ticket: load.ticket,
            result,
        });
    }

    /// Complete every outstanding load of item `i` successfully.
    pub fn ready(&mut self, i: usize) {
        for load in self.take_loads(&url(i)) {
            self.deliver(load, Ok(()));
        }
    }

    /// Await the oldest outstanding fetch and deliver its result.
    pub async fn finish_fetch(&mut self) {
        assert!(!self.fetches.is_empty(), "no fetch outstanding");
        let fetch = self.fetches.remove(0);
        let result = fetch.await;
        self.send(FeedEvent::FetchFinished(result));
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.core.snapshot()
    }

    pub fn audible(&self) -> Vec<usize> {
        self.snapshot()
            .handles
            .iter()
            .filter(|h| h.is_playing && !h.is_muted)
            .map(|h| h.index)
            .collect()
    }
}
