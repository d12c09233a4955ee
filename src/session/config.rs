use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::DEFAULT_FRAME_SIZE;
use crate::channel::{ChannelConfig, FunctionDeclaration};

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Engine model id
    pub model: String,

    /// Behavioral instructions for the engine (snapshot taken at start)
    pub instructions: String,

    /// Prebuilt engine voice
    pub voice: String,

    /// Tools the engine may call
    #[serde(skip)]
    pub tools: Vec<FunctionDeclaration>,

    /// Microphone sample rate sent to the engine
    pub input_sample_rate: u32,

    /// Sample rate of engine replies
    pub output_sample_rate: u32,

    /// Samples per captured frame
    pub frame_size: usize,

    /// Upper bound on the channel handshake
    pub connect_timeout: Duration,

    /// Drop reply audio once this much is already queued (None = unbounded)
    pub max_backlog: Option<Duration>,

    /// Capacity of the capture frame queue
    pub frame_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            instructions: String::new(),
            voice: "Zephyr".to_string(),
            tools: Vec::new(),
            input_sample_rate: 16000,           // Engine expects 16kHz input
            output_sample_rate: 24000,          // Engine replies at 24kHz
            frame_size: DEFAULT_FRAME_SIZE,     // 256ms at 16kHz
            connect_timeout: Duration::from_secs(10),
            max_backlog: None,
            frame_queue_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            tools: self.tools.clone(),
        }
    }
}
