use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::playlist::{Playlist, SpiritRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Running,
}

/// Cursor bookkeeping for the spirit rotation.
///
/// This type is pure state: it does not own a timer. The hub arms a
/// `tokio::time::Interval` whenever `start` reports a transition and drops it
/// when `stop` does, so ticks only reach `tick` while Running.
pub struct Rotation {
    playlist: Playlist,
    state: SchedulerState,
    // When the current item became current. Drives the late-join offset.
    last_advance: Instant,
}

impl Rotation {
    pub fn new(playlist: Playlist, now: Instant) -> Self {
        Self {
            playlist,
            state: SchedulerState::Idle,
            last_advance: now,
        }
    }

    /// Idle -> Running. Returns `false` (and changes nothing) when already
    /// Running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state == SchedulerState::Running {
            return false;
        }
        self.state = SchedulerState::Running;
        // Nobody was watching while Idle, so the current item starts its
        // lifetime with the first viewer.
        self.last_advance = now;
        info!(cursor = self.playlist.cursor(), "spirit rotation started");
        true
    }

    /// Running -> Idle. Pre-advances once so the next viewer gets a fresh
    /// item. Returns `false` when already Idle.
    pub fn stop(&mut self, now: Instant) -> bool {
        if self.state == SchedulerState::Idle {
            return false;
        }
        self.state = SchedulerState::Idle;
        self.advance(now);
        info!(cursor = self.playlist.cursor(), "spirit rotation stopped");
        true
    }

    /// One timer firing: advance, restart the lifetime clock, and hand back
    /// the new current item for broadcast.
    pub fn tick(&mut self, now: Instant) -> Arc<SpiritRecord> {
        self.advance(now);
        debug!(cursor = self.playlist.cursor(), "spirit rotation tick");
        self.playlist.current()
    }

    fn advance(&mut self, now: Instant) {
        if self.playlist.advance() {
            debug!(len = self.playlist.len(), "playlist wrapped, reshuffled");
        }
        self.last_advance = now;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_advance)
    }

    pub fn current(&self) -> Arc<SpiritRecord> {
        self.playlist.current()
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }
}
