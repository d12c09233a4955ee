//! Voice session management
//!
//! A `VoiceSession` owns one conversation with the engine:
//! - Microphone capture, framing and encoding
//! - The bidirectional engine channel
//! - Gapless scheduling of reply audio
//! - Lifecycle state and its change notifications

mod config;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use session::{SessionDevices, SessionMonitor, VoiceSession};
pub use state::{SessionState, SessionUpdate};
pub use stats::{SessionStats, TranscriptSegment};
