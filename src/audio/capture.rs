//! Microphone capture streamer
//!
//! Re-frames the input's sample chunks into fixed-size frames, encodes each
//! frame and hands it to the session without ever waiting on the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, InputEvent};
use super::codec::EncodedPacket;

/// Default frame size in samples (256ms at 16kHz)
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Event produced by the capture streamer
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// One encoded frame, in capture order
    Frame { sequence: u64, packet: EncodedPacket },
    /// The input device failed or ended unexpectedly
    Failed(String),
}

/// Accumulates arbitrary chunks into fixed-size frames
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append a chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            let needed = self.frame_size - self.pending.len();
            let take = needed.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }

        frames
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Pumps captured frames into the session queue
pub struct CaptureStreamer {
    task: Option<JoinHandle<()>>,
    frames_dropped: Arc<AtomicU64>,
}

impl CaptureStreamer {
    /// Start pumping frames from `input` into `events`
    ///
    /// Chunks already queued by the input (captured before the session
    /// opened) are discarded. Frames that do not fit in `events` are
    /// counted in `frames_dropped`.
    pub fn start(
        mut input: mpsc::Receiver<InputEvent>,
        events: mpsc::Sender<CaptureEvent>,
        frame_size: usize,
        sample_rate: u32,
        frames_dropped: Arc<AtomicU64>,
    ) -> Self {
        let dropped = Arc::clone(&frames_dropped);

        let mut stale = 0usize;
        let mut early_failure = None;
        while let Ok(event) = input.try_recv() {
            match event {
                InputEvent::Samples(_) => stale += 1,
                InputEvent::Failed(reason) => {
                    early_failure = Some(reason);
                    break;
                }
            }
        }
        if stale > 0 {
            debug!("Discarded {} chunks captured before session opened", stale);
        }

        let task = tokio::spawn(async move {
            if let Some(reason) = early_failure {
                warn!("Capture device failed before session opened: {}", reason);
                let _ = events.send(CaptureEvent::Failed(reason)).await;
                return;
            }

            info!("Capture streamer started ({} samples/frame)", frame_size);

            let mut framer = Framer::new(frame_size);
            let mut sequence = 0u64;

            while let Some(event) = input.recv().await {
                match event {
                    InputEvent::Samples(chunk) => {
                        for samples in framer.push(&chunk) {
                            let frame = AudioFrame {
                                samples,
                                sample_rate,
                                sequence,
                            };
                            sequence += 1;

                            match events.try_send(CaptureEvent::Frame {
                                sequence: frame.sequence,
                                packet: frame.encode(),
                            }) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    dropped.fetch_add(1, Ordering::Relaxed);
                                    debug!("Session queue full, dropped frame {}", frame.sequence);
                                }
                                Err(TrySendError::Closed(_)) => {
                                    debug!("Session queue closed, capture streamer exiting");
                                    return;
                                }
                            }
                        }
                    }
                    InputEvent::Failed(reason) => {
                        warn!("Capture device failed: {}", reason);
                        let _ = events.send(CaptureEvent::Failed(reason)).await;
                        return;
                    }
                }
            }

            let _ = events
                .send(CaptureEvent::Failed("audio input ended".to_string()))
                .await;
        });

        Self {
            task: Some(task),
            frames_dropped,
        }
    }

    /// Stop the pump; no frames are produced afterwards
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancellation is the expected outcome here
            let _ = task.await;
            info!("Capture streamer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Frames dropped because the session queue was full
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureStreamer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
