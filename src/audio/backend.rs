use std::path::PathBuf;

use tokio::sync::mpsc;

use super::codec::{self, EncodedPacket};
use crate::error::AudioError;

/// Captured mono audio frame
///
/// Fixed-size chunk of float samples produced by the capture streamer.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Float samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Capture order within the session
    pub sequence: u64,
}

impl AudioFrame {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode as 16-bit PCM for the channel
    pub fn encode(&self) -> EncodedPacket {
        codec::encode_packet(&self.samples, self.sample_rate)
    }
}

/// Event delivered by a running audio input
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Mono samples of arbitrary length
    Samples(Vec<f32>),
    /// The device failed; no more samples will follow
    Failed(String),
}

/// Configuration for audio devices
#[derive(Debug, Clone)]
pub struct AudioDeviceConfig {
    /// Microphone sample rate sent to the engine
    pub input_sample_rate: u32,
    /// Playback sample rate of engine replies
    pub output_sample_rate: u32,
    /// Chunk length delivered by file inputs, in milliseconds
    pub chunk_duration_ms: u64,
    /// Capacity of the input event queue (chunks beyond it are dropped)
    pub queue_capacity: usize,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            chunk_duration_ms: 100,
            queue_capacity: 64,
        }
    }
}

/// Audio capture trait
///
/// Implementations:
/// - `CpalInput`: default microphone (feature `device-audio`)
/// - `WavFileInput`: streams a WAV file in real time (headless/testing)
#[async_trait::async_trait]
pub trait AudioInput: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns a channel receiver that will receive sample chunks
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, AudioError>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<(), AudioError>;

    fn is_capturing(&self) -> bool;

    fn sample_rate(&self) -> u32;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Scheduled audio output
///
/// The output owns a clock in seconds. Buffers are submitted with an
/// absolute start time on that clock.
pub trait AudioOutput: Send + Sync {
    /// Current output clock in seconds
    fn now(&self) -> f64;

    /// Queue samples to start playing at `start_at`
    fn submit(&mut self, start_at: f64, samples: Vec<f32>) -> Result<(), AudioError>;

    fn sample_rate(&self) -> u32;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Supplies fresh device handles for each session
#[async_trait::async_trait]
pub trait DeviceProvider: Send + Sync {
    async fn input(&self) -> Result<Box<dyn AudioInput>, AudioError>;

    async fn output(&self) -> Result<Box<dyn AudioOutput>, AudioError>;
}

/// Where captured audio comes from
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default microphone (feature `device-audio`)
    Microphone,
    /// WAV file streamed in real time
    File(PathBuf),
}

/// Where engine replies are played
#[derive(Debug, Clone)]
pub enum AudioSink {
    /// Default speaker (feature `device-audio`)
    Speaker,
    /// WAV file rendering of the playback timeline
    File(PathBuf),
}

/// Device provider built from a source/sink selection
pub struct AudioDeviceFactory {
    source: AudioSource,
    sink: AudioSink,
    config: AudioDeviceConfig,
}

impl AudioDeviceFactory {
    pub fn new(source: AudioSource, sink: AudioSink, config: AudioDeviceConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }
}

#[async_trait::async_trait]
impl DeviceProvider for AudioDeviceFactory {
    async fn input(&self) -> Result<Box<dyn AudioInput>, AudioError> {
        match &self.source {
            AudioSource::Microphone => {
                #[cfg(feature = "device-audio")]
                {
                    use super::device::CpalInput;
                    Ok(Box::new(CpalInput::new(self.config.clone())))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    Err(AudioError::Unavailable(
                        "microphone capture requires the `device-audio` feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                let input = super::file::WavFileInput::open(path, self.config.clone())?;
                Ok(Box::new(input))
            }
        }
    }

    async fn output(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        match &self.sink {
            AudioSink::Speaker => {
                #[cfg(feature = "device-audio")]
                {
                    use super::device::CpalOutput;
                    let output = CpalOutput::open(self.config.output_sample_rate).await?;
                    Ok(Box::new(output))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    Err(AudioError::Unavailable(
                        "speaker playback requires the `device-audio` feature".to_string(),
                    ))
                }
            }

            AudioSink::File(path) => {
                let output = super::file::WavFileOutput::create(path, self.config.output_sample_rate)?;
                Ok(Box::new(output))
            }
        }
    }
}
