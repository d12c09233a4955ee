use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::stats::TranscriptSegment;
use crate::error::SessionError;
use crate::sales::SaleSignal;

/// Lifecycle of a voice session
///
/// `Idle → Connecting → Open → Closing → Closed`, with `Error` reachable
/// from `Connecting`, `Open` and `Closing`. `Closed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Error)
                | (Open, Closing)
                | (Open, Error)
                | (Closing, Closed)
                | (Closing, Error)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Notification emitted by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// State changed; `error` is set only on the transition into `Error`
    State {
        state: SessionState,
        error: Option<SessionError>,
    },
    Transcript(TranscriptSegment),
    SaleCompleted(SaleSignal),
}

/// Guards state transitions and publishes them
pub(crate) struct StateMachine {
    state: watch::Sender<SessionState>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl StateMachine {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (state, _) = watch::channel(SessionState::Idle);
        let (updates, updates_rx) = mpsc::unbounded_channel();
        (Self { state, updates }, updates_rx)
    }

    pub(crate) fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Apply a legal transition; illegal ones are ignored
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        self.apply(next, None)
    }

    /// Move to `Error`, reporting the cause once
    pub(crate) fn fail(&self, error: SessionError) -> bool {
        self.apply(SessionState::Error, Some(error))
    }

    pub(crate) fn notify(&self, update: SessionUpdate) {
        // Nobody listening is fine
        let _ = self.updates.send(update);
    }

    fn apply(&self, next: SessionState, error: Option<SessionError>) -> bool {
        let mut previous = next;
        let changed = self.state.send_if_modified(|state| {
            previous = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if changed {
            info!("Session state {} -> {}", previous, next);
            self.notify(SessionUpdate::State { state: next, error });
        } else {
            debug!("Ignoring illegal transition {} -> {}", previous, next);
        }

        changed
    }
}
