pub mod backend;
pub mod capture;
pub mod codec;
pub mod file;
pub mod playback;

#[cfg(feature = "device-audio")]
pub mod device;

pub use backend::{
    AudioDeviceConfig, AudioDeviceFactory, AudioFrame, AudioInput, AudioOutput, AudioSink,
    AudioSource, DeviceProvider, InputEvent,
};
pub use capture::{CaptureEvent, CaptureStreamer, Framer, DEFAULT_FRAME_SIZE};
pub use codec::EncodedPacket;
pub use file::{AudioFile, WavFileInput, WavFileOutput};
pub use playback::{PlaybackBuffer, PlaybackScheduler};
