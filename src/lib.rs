pub mod audio;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod sales;
pub mod session;

pub use audio::{
    AudioDeviceConfig, AudioDeviceFactory, AudioFile, AudioFrame, AudioInput, AudioOutput,
    AudioSink, AudioSource, CaptureStreamer, DeviceProvider, EncodedPacket, PlaybackBuffer,
    PlaybackScheduler, WavFileInput, WavFileOutput,
};
pub use channel::{ChannelConnector, LiveConnector, VoiceChannel};
pub use config::Config;
pub use controller::{ControllerEvent, SessionController, SessionHandle};
pub use error::{AudioError, ChannelError, CodecError, SessionError};
pub use http::{create_router, AppState};
pub use sales::{AssistantProfile, CatalogProvider, Order, OrderSink, SaleSignal, StaticCatalog};
pub use session::{SessionConfig, SessionState, SessionStats, TranscriptSegment, VoiceSession};
