//! cpal microphone and speaker devices
//!
//! cpal streams are not `Send` on every platform, so each stream lives on
//! its own OS thread for as long as the device is held. Callbacks only
//! `try_send` into tokio channels or touch a short mutex.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioDeviceConfig, AudioInput, AudioOutput, InputEvent};
use crate::error::AudioError;

fn supports_rate(range: &SupportedStreamConfigRange, rate: u32) -> bool {
    range.sample_format() == SampleFormat::F32
        && range.min_sample_rate() <= SampleRate(rate)
        && range.max_sample_rate() >= SampleRate(rate)
}

/// Prefer mono, fall back to any channel count at the requested rate
fn pick_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    rate: u32,
) -> Option<StreamConfig> {
    let candidates: Vec<_> = configs.filter(|c| supports_rate(c, rate)).collect();
    candidates
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| candidates.first())
        .map(|c| c.clone().with_sample_rate(SampleRate(rate)).config())
}

/// Default microphone
pub struct CpalInput {
    config: AudioDeviceConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInput {
    pub fn new(config: AudioDeviceConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }
}

fn run_input(
    rate: u32,
    tx: mpsc::Sender<InputEvent>,
    ready: oneshot::Sender<Result<(), AudioError>>,
    stop: std_mpsc::Receiver<()>,
) {
    let stream = (|| -> Result<cpal::Stream, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::Unavailable("no input device available".to_string()))?;

        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioError::Unavailable(e.to_string()))?;
        let config = pick_config(configs, rate).ok_or_else(|| {
            AudioError::Unavailable(format!("no f32 input config at {}Hz", rate))
        })?;
        let channels = config.channels.max(1) as usize;

        info!(
            "Microphone: {} ({}Hz, {} channels)",
            device.name().unwrap_or_default(),
            rate,
            channels
        );

        let data_tx = tx.clone();
        let err_tx = tx.clone();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                        .collect();
                    // Full queue: drop the chunk rather than block the device
                    let _ = data_tx.try_send(InputEvent::Samples(mono));
                },
                move |err| {
                    error!("Microphone stream error: {}", err);
                    let _ = err_tx.try_send(InputEvent::Failed(err.to_string()));
                },
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;
        Ok(stream)
    })();

    match stream {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            // Blocks until stop() is called or the input is dropped
            let _ = stop.recv();
            drop(stream);
            debug!("Microphone stream closed");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

#[async_trait::async_trait]
impl AudioInput for CpalInput {
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, AudioError> {
        if self.thread.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let rate = self.config.input_sample_rate;

        let thread = std::thread::Builder::new()
            .name("voice-pos-capture".into())
            .spawn(move || run_input(rate, tx, ready_tx, stop_rx))
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Stream("capture thread exited".to_string())),
        }
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| AudioError::Stream(e.to_string()))?
                .map_err(|_| AudioError::Stream("capture thread panicked".to_string()))?;
            info!("Microphone released");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.config.input_sample_rate
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

struct Scheduled {
    start: u64,
    samples: Vec<f32>,
}

/// Shared between the output callback and the scheduler
struct Timeline {
    /// Frames rendered so far; the output clock
    position: u64,
    queue: VecDeque<Scheduled>,
}

impl Timeline {
    fn next_sample(&mut self) -> f32 {
        let position = self.position;
        self.position += 1;

        while let Some(front) = self.queue.front() {
            if position >= front.start + front.samples.len() as u64 {
                self.queue.pop_front();
                continue;
            }
            if position >= front.start {
                return front.samples[(position - front.start) as usize];
            }
            break;
        }

        0.0
    }
}

/// Default speaker with a sample-accurate playback clock
pub struct CpalOutput {
    sample_rate: u32,
    timeline: Arc<Mutex<Timeline>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl CpalOutput {
    pub async fn open(sample_rate: u32) -> Result<Self, AudioError> {
        let timeline = Arc::new(Mutex::new(Timeline {
            position: 0,
            queue: VecDeque::new(),
        }));

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let shared = Arc::clone(&timeline);

        std::thread::Builder::new()
            .name("voice-pos-playback".into())
            .spawn(move || run_output(sample_rate, shared, ready_tx, stop_rx))
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                sample_rate,
                timeline,
                stop_tx: Some(stop_tx),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Stream("playback thread exited".to_string())),
        }
    }
}

fn run_output(
    rate: u32,
    timeline: Arc<Mutex<Timeline>>,
    ready: oneshot::Sender<Result<(), AudioError>>,
    stop: std_mpsc::Receiver<()>,
) {
    let stream = (|| -> Result<cpal::Stream, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Unavailable("no output device available".to_string()))?;

        let configs = device
            .supported_output_configs()
            .map_err(|e| AudioError::Unavailable(e.to_string()))?;
        let config = pick_config(configs, rate).ok_or_else(|| {
            AudioError::Unavailable(format!("no f32 output config at {}Hz", rate))
        })?;
        let channels = config.channels.max(1) as usize;

        info!(
            "Speaker: {} ({}Hz, {} channels)",
            device.name().unwrap_or_default(),
            rate,
            channels
        );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut timeline) = timeline.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        frame.fill(timeline.next_sample());
                    }
                },
                |err| {
                    error!("Speaker stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;
        Ok(stream)
    })();

    match stream {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            let _ = stop.recv();
            drop(stream);
            debug!("Speaker stream closed");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        match self.timeline.lock() {
            Ok(timeline) => timeline.position as f64 / self.sample_rate as f64,
            Err(_) => 0.0,
        }
    }

    fn submit(&mut self, start_at: f64, samples: Vec<f32>) -> Result<(), AudioError> {
        let start = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| AudioError::Stream("playback timeline poisoned".to_string()))?;

        if start < timeline.position {
            warn!(
                "Buffer scheduled {} samples in the past",
                timeline.position - start
            );
        }
        timeline.queue.push_back(Scheduled { start, samples });
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}
