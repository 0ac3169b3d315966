//! Player resources and the factory that builds them.
//!
//! A `PlayerResource` is one decoder/playback instance.  Construction is
//! expensive, so the pool keeps resources alive and rebinds them to new
//! locators instead of building fresh ones.  Loading is asynchronous: `bind`
//! hands back a `'static` future that the event loop spawns; its outcome comes
//! back to the loop as an ordinary event.
//!
//! ```text
//!   PlayerFactory::create()  ──► Box<dyn PlayerResource>
//!   PlayerFactory::bind(res, locator) ──► LoadFuture  (spawned by FeedCore)
//!                                              └─► FeedEvent::LoadFinished
//!   PlayerFactory::destroy(res)
//! ```

use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt};
use rand::Rng;
use tracing::debug;

use crate::error::LoadError;

pub type LoadFuture = BoxFuture<'static, Result<(), LoadError>>;

/// Commands the engine issues to one playback instance.  All calls are
/// fire-and-forget; none of them may block the control loop.
pub trait PlayerResource: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn set_muted(&mut self, muted: bool);
    fn seek_to_start(&mut self);
    fn position(&self) -> Duration;
    /// Free the underlying decoder.  Called once, right before the resource is dropped.
    fn release(&mut self);
}

pub trait PlayerFactory: Send {
    fn create(&mut self) -> Box<dyn PlayerResource>;

    /// Start loading `locator` into `resource`.  The returned future resolves
    /// once the resource is ready to play or has failed.
    fn bind(&mut self, resource: &mut dyn PlayerResource, locator: &str) -> LoadFuture;

    fn destroy(&mut self, mut resource: Box<dyn PlayerResource>) {
        resource.release();
    }
}

// ── simulated backend ─────────────────────────────────────────────────────────

/// In-process stand-in for a real decoder.  Tracks play/pause to report a
/// plausible position.
#[derive(Debug, Default)]
pub struct SimulatedPlayer {
    playing_since: Option<Instant>,
    accumulated: Duration,
    muted: bool,
}

impl SimulatedPlayer {
    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

impl PlayerResource for SimulatedPlayer {
    fn play(&mut self) {
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.playing_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn seek_to_start(&mut self) {
        self.accumulated = Duration::ZERO;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn position(&self) -> Duration {
        self.accumulated + self.playing_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    fn release(&mut self) {
        self.playing_since = None;
        self.accumulated = Duration::ZERO;
    }
}

/// Factory whose loads take `load_delay` plus up to `jitter` of random extra
/// time, so completions routinely arrive out of issue order.
pub struct SimulatedFactory {
    load_delay: Duration,
    jitter: Duration,
    fail_schemes: Vec<String>,
    created: usize,
}

impl SimulatedFactory {
    pub fn new(load_delay: Duration, jitter: Duration, fail_schemes: Vec<String>) -> Self {
        Self {
            load_delay,
            jitter,
            fail_schemes,
            created: 0,
        }
    }

    pub fn created(&self) -> usize {
        self.created
    }

    fn check_locator(&self, locator: &str) -> Result<(), LoadError> {
        let Some((scheme, rest)) = locator.split_once("://") else {
            return Err(LoadError::Unsupported(locator.to_string()));
        };
        if rest.is_empty() {
            return Err(LoadError::Unsupported(locator.to_string()));
        }
        if self.fail_schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
            return Err(LoadError::Failed {
                locator: locator.to_string(),
                reason: format!("scheme {} refused", scheme),
            });
        }
        Ok(())
    }
}

impl PlayerFactory for SimulatedFactory {
    fn create(&mut self) -> Box<dyn PlayerResource> {
        self.created += 1;
        debug!("player: created simulated resource #{}", self.created);
        Box::new(SimulatedPlayer {
            muted: true,
            ..SimulatedPlayer::default()
        })
    }

    fn bind(&mut self, resource: &mut dyn PlayerResource, locator: &str) -> LoadFuture {
        resource.pause();
        resource.seek_to_start();

        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        let delay = self.load_delay + Duration::from_millis(extra);
        let outcome = self.check_locator(locator);

        async move {
            tokio::time::sleep(delay).await;
            outcome
        }
        .boxed()
    }
}
