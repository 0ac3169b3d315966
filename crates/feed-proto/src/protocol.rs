use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the feed.  Immutable once handed out by a feed source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeedItem {
    /// Opaque unique key.
    pub id: String,
    /// Media locator the player loads (URI).
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl FeedItem {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: String::new(),
        }
    }
}

/// Load status of a player handle.
///
/// Transitions:
///   Idle -> Loading -> Ready | Error
///   Ready | Error -> Loading   (rebind to another locator)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlayerStatus {
    /// Created or attached to a locator, nothing requested yet.
    #[default]
    Idle,
    /// Load requested, waiting for the resource to report back.
    Loading,
    Ready,
    /// Last load failed; only a rebind recovers.
    Error,
}

impl PlayerStatus {
    /// Short label for badges (≤5 chars).
    pub fn badge_label(&self) -> &'static str {
        match self {
            PlayerStatus::Idle => "IDLE",
            PlayerStatus::Loading => "LOAD",
            PlayerStatus::Ready => "READY",
            PlayerStatus::Error => "ERR",
        }
    }
}

/// Scroll direction of the last accepted active-index change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// What the rendering side sees for one materialised feed item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandleView {
    pub index: usize,
    pub item_id: String,
    pub slot: usize,
    pub status: PlayerStatus,
    pub bound_locator: Option<String>,
    pub is_active: bool,
    pub is_playing: bool,
    pub is_muted: bool,
    pub position_ms: u64,
}

/// Full engine state as exposed to collaborators.  `rev` increases on every
/// published change so readers can tell whether they missed an update.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub active_index: Option<usize>,
    pub direction: Direction,
    pub item_count: usize,
    pub fetch_in_flight: bool,
    pub user_paused: bool,
    pub foreground: bool,
    /// Sorted by feed index.
    pub handles: Vec<HandleView>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn handle_at(&self, index: usize) -> Option<&HandleView> {
        self.handles.iter().find(|h| h.index == index)
    }

    /// Number of handles currently producing sound.
    pub fn audible_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|h| h.is_playing && !h.is_muted)
            .count()
    }
}
