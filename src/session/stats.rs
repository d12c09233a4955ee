use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::SessionState;
use crate::channel::Speaker;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: Uuid,

    pub state: SessionState,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// When the session closed or failed
    pub closed_at: Option<DateTime<Utc>>,

    /// Total duration in seconds (until now if still running)
    pub duration_secs: f64,

    /// Frames handed to the channel
    pub frames_sent: u64,

    /// Frames dropped because the session was busy or not open
    pub frames_dropped: u64,

    /// Inbound channel messages
    pub messages_received: u64,

    /// Inbound messages dropped as malformed
    pub messages_dropped: u64,

    /// Reply buffers scheduled for playback
    pub buffers_scheduled: u64,

    /// Reply buffers dropped by the scheduler
    pub buffers_dropped: u64,

    /// Reply audio queued beyond the output clock, in seconds
    pub playback_backlog_secs: f64,
}

/// A single transcript segment from the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Speaker,

    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,
}

/// Counters shared between the session actor and observers
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub frames_sent: AtomicU64,
    /// Shared with the capture streamer
    pub frames_dropped: Arc<AtomicU64>,
    pub messages_received: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub buffers_scheduled: AtomicU64,
    pub buffers_dropped: AtomicU64,
    /// Backlog in microseconds
    pub backlog_us: AtomicU64,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_backlog(&self, secs: f64) {
        self.backlog_us
            .store((secs.max(0.0) * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    pub fn backlog_secs(&self) -> f64 {
        self.backlog_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
