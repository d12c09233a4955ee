//! Gapless playback scheduling
//!
//! Buffers are laid end to end on the output clock in arrival order. If the
//! clock has already passed the end of the previous buffer, the next one
//! starts "now" instead of in the past.

use std::time::Duration;

use tracing::{debug, warn};

use super::backend::AudioOutput;
use super::codec;
use crate::error::CodecError;

/// Decoded audio ready to be scheduled
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a base64 PCM payload
    pub fn from_base64(data: &str, sample_rate: u32) -> Result<Self, CodecError> {
        Ok(Self::new(codec::decode_packet(data)?, sample_rate))
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Schedules playback buffers on an output clock
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_start_time: f64,
    max_backlog: Option<f64>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, max_backlog: Option<Duration>) -> Self {
        let next_start_time = output.now();
        Self {
            output,
            next_start_time,
            max_backlog: max_backlog.map(|d| d.as_secs_f64()),
        }
    }

    /// Move the clock to the output's current time
    pub fn reset(&mut self) {
        self.next_start_time = self.output.now();
        debug!("Playback clock reset to {:.3}s", self.next_start_time);
    }

    /// Schedule a buffer; returns its start time, or `None` if dropped
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Option<f64> {
        if buffer.is_empty() {
            return None;
        }

        let now = self.output.now();
        if let Some(limit) = self.max_backlog {
            let backlog = self.next_start_time - now;
            if backlog > limit {
                warn!(
                    "Playback backlog {:.2}s exceeds {:.2}s, dropping {:.2}s buffer",
                    backlog,
                    limit,
                    buffer.duration()
                );
                return None;
            }
        }

        let start = self.next_start_time.max(now);
        let duration = buffer.duration();

        if let Err(e) = self.output.submit(start, buffer.into_samples()) {
            warn!("Failed to submit playback buffer to {}: {}", self.output.name(), e);
            return None;
        }

        self.next_start_time = start + duration;
        debug!(
            "Scheduled {:.3}s buffer at {:.3}s (next {:.3}s)",
            duration, start, self.next_start_time
        );

        Some(start)
    }

    /// Earliest time the next buffer may start
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Audio queued beyond the current output time, in seconds
    pub fn backlog(&self) -> f64 {
        (self.next_start_time - self.output.now()).max(0.0)
    }

    /// Release the output once everything already scheduled has played
    pub fn release(self) {
        let remaining = self.backlog();
        let output = self.output;

        if remaining <= 0.0 {
            drop(output);
            return;
        }

        debug!("Releasing output after {:.2}s of scheduled audio", remaining);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
                    drop(output);
                });
            }
            Err(_) => drop(output),
        }
    }
}
