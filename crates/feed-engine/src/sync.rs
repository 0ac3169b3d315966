//! Playback arbitration: at most one handle is playing with sound, and it is
//! the one at the active index once that handle is `Ready`.
//!
//! Per-handle state is `status × {playing, paused}`; this module only moves
//! the second half.  Inputs:
//!
//! ```text
//!   on_active_changed   previous handle paused+muted, new one started if Ready
//!   on_status_changed   late Ready for the still-active handle starts it
//!   on_foreground       loss pauses+mutes everything; regain re-applies
//!   toggle_pause        user override, sticky until the index changes
//! ```

use feed_proto::protocol::PlayerStatus;
use tracing::{debug, info, warn};

use crate::pool::PlayerPool;

pub struct PlaybackSync {
    active: Option<usize>,
    foreground: bool,
    user_paused: bool,
    /// Set on a genuine index change; consumed when playback actually starts.
    restart_pending: bool,
}

impl Default for PlaybackSync {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSync {
    pub fn new() -> Self {
        Self {
            active: None,
            foreground: true,
            user_paused: false,
            restart_pending: false,
        }
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn is_user_paused(&self) -> bool {
        self.user_paused
    }

    /// The active index moved to (or was re-confirmed as) `index`.
    /// Returns `true` if the new handle started playing.
    pub fn on_active_changed(&mut self, pool: &mut PlayerPool, index: usize) -> bool {
        let previous = self.active.replace(index);
        if previous != Some(index) {
            if let Some(prev) = previous {
                if let Some(handle) = pool.handle_for_index_mut(prev) {
                    debug!("sync: silencing previous index {}", prev);
                    handle.silence();
                }
            }
            // A fresh index cancels any manual pause and restarts from zero.
            self.user_paused = false;
            self.restart_pending = true;
        }

        for handle in pool.handles_mut() {
            if handle.index() == Some(index) {
                handle.set_active(true);
            } else if handle.is_active() || handle.is_audible() {
                handle.silence();
            }
        }

        self.apply(pool)
    }

    /// A handle's load status changed.  Returns `true` if playback started.
    pub fn on_status_changed(
        &mut self,
        pool: &mut PlayerPool,
        index: usize,
        status: PlayerStatus,
    ) -> bool {
        if self.active != Some(index) {
            return false;
        }
        match status {
            PlayerStatus::Ready => self.apply(pool),
            PlayerStatus::Error => {
                warn!("sync: active index {} failed to load", index);
                false
            }
            _ => false,
        }
    }

    pub fn on_foreground(&mut self, pool: &mut PlayerPool, foreground: bool) {
        if self.foreground == foreground {
            return;
        }
        self.foreground = foreground;
        if foreground {
            info!("sync: foreground regained");
            self.apply(pool);
        } else {
            info!("sync: foreground lost, pausing all");
            for handle in pool.handles_mut() {
                handle.pause();
                handle.set_muted(true);
            }
        }
    }

    /// Manual play/pause on the active item.  Returns the new paused state.
    pub fn toggle_pause(&mut self, pool: &mut PlayerPool) -> bool {
        let Some(active) = self.active else {
            return self.user_paused;
        };
        if self.user_paused {
            self.user_paused = false;
            info!("sync: user resumed index {}", active);
            self.apply(pool);
        } else {
            self.user_paused = true;
            info!("sync: user paused index {}", active);
            if let Some(handle) = pool.handle_for_index_mut(active) {
                handle.pause();
            }
        }
        self.user_paused
    }

    /// Start the active handle if everything allows it.
    fn apply(&mut self, pool: &mut PlayerPool) -> bool {
        let Some(active) = self.active else {
            return false;
        };
        if !self.foreground || self.user_paused {
            return false;
        }
        let Some(handle) = pool.handle_for_index_mut(active) else {
            return false;
        };
        if handle.status() != PlayerStatus::Ready {
            debug!(
                "sync: index {} not ready ({:?}), deferring playback",
                active,
                handle.status()
            );
            return false;
        }

        handle.set_active(true);
        if self.restart_pending {
            handle.seek_to_start();
            self.restart_pending = false;
        }
        handle.set_muted(false);
        handle.play();
        debug!("sync: index {} playing (slot {})", active, handle.slot());
        true
    }
}
