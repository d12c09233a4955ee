use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioDeviceConfig, AudioInput, AudioOutput, InputEvent};
use super::codec;
use crate::error::AudioError;

/// WAV file loaded as mono float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    /// Channel count of the file (samples are already downmixed)
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioError> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int if spec.bits_per_sample == 16 => reader
                .into_samples::<i16>()
                .map(|s| s.map(|s| f32::from(s) / codec::PCM_SCALE))
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let samples: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Streams a WAV file as if it were a live microphone
pub struct WavFileInput {
    path: String,
    samples: Arc<Vec<f32>>,
    config: AudioDeviceConfig,
    paced: bool,
    task: Option<JoinHandle<()>>,
}

impl WavFileInput {
    /// Open a WAV file recorded at the configured input rate
    pub fn open(path: impl AsRef<Path>, config: AudioDeviceConfig) -> Result<Self, AudioError> {
        let audio = AudioFile::open(path)?;

        if audio.sample_rate != config.input_sample_rate {
            return Err(AudioError::Unavailable(format!(
                "{} is {}Hz, expected {}Hz",
                audio.path, audio.sample_rate, config.input_sample_rate
            )));
        }

        Ok(Self {
            path: audio.path,
            samples: Arc::new(audio.samples),
            config,
            paced: true,
            task: None,
        })
    }

    /// Deliver chunks as fast as the session accepts them instead of in real time
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait::async_trait]
impl AudioInput for WavFileInput {
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, AudioError> {
        if self.task.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let samples = Arc::clone(&self.samples);
        let chunk_ms = self.config.chunk_duration_ms.max(1);
        let chunk_len = (self.config.input_sample_rate as u64 * chunk_ms / 1000).max(1) as usize;
        let paced = self.paced;

        info!("Streaming {} ({} samples/chunk)", self.path, chunk_len);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(chunk_ms));

            for chunk in samples.chunks(chunk_len) {
                if paced {
                    ticker.tick().await;
                    // Live devices drop chunks nobody is reading
                    if let Err(mpsc::error::TrySendError::Closed(_)) =
                        tx.try_send(InputEvent::Samples(chunk.to_vec()))
                    {
                        return;
                    }
                } else if tx.send(InputEvent::Samples(chunk.to_vec())).await.is_err() {
                    return;
                }
            }

            debug!("Audio file exhausted, holding input open");
            tx.closed().await;
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("Stopped streaming {}", self.path);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.config.input_sample_rate
    }

    fn name(&self) -> &str {
        "WAV file input"
    }
}

/// Renders the playback timeline into a 16-bit mono WAV file
///
/// The clock is wall time since creation. Gaps between scheduled buffers
/// are written as silence.
pub struct WavFileOutput {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    written: u64,
    created: Instant,
}

impl WavFileOutput {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, AudioError> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)?;
        info!("Writing playback to {} ({}Hz)", path.display(), sample_rate);

        Ok(Self {
            path,
            writer: Some(writer),
            sample_rate,
            written: 0,
            created: Instant::now(),
        })
    }

    /// Samples written so far, silence included
    pub fn samples_written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file
    pub fn finalize(mut self) -> Result<u64, AudioError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(self.written)
    }
}

impl AudioOutput for WavFileOutput {
    fn now(&self) -> f64 {
        self.created.elapsed().as_secs_f64()
    }

    fn submit(&mut self, start_at: f64, samples: Vec<f32>) -> Result<(), AudioError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AudioError::Stream("output already finalized".to_string()))?;

        let start = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        if start > self.written {
            for _ in self.written..start {
                writer.write_sample(0i16)?;
            }
            self.written = start;
        } else if start < self.written {
            debug!(
                "Buffer starts {} samples before end of timeline, appending",
                self.written - start
            );
        }

        for &sample in &samples {
            writer.write_sample(codec::to_i16(sample))?;
        }
        self.written += samples.len() as u64;

        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "WAV file output"
    }
}

impl Drop for WavFileOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize {} on drop: {}", self.path.display(), e);
            }
        }
    }
}
