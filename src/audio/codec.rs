//! PCM sample codec
//!
//! Converts between float samples in [-1.0, 1.0] and 16-bit little-endian
//! PCM, and wraps the raw bytes in base64 for the text channel.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Scale between float samples and i16 PCM
pub const PCM_SCALE: f32 = 32768.0;

/// Default rate assumed when an inbound mime type carries none
pub const DEFAULT_OUTPUT_RATE: u32 = 24000;

/// Base64 PCM payload with its media type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedPacket {
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64-encoded PCM bytes
    pub data: String,
}

/// Encode float samples as 16-bit little-endian PCM
///
/// Out-of-range samples are clamped to the i16 range instead of wrapping.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| to_i16(s).to_le_bytes())
        .collect()
}

/// Decode 16-bit little-endian PCM into float samples
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / PCM_SCALE)
        .collect())
}

/// Base64 text transport (lossless)
pub fn to_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_text(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

/// Encode samples into a packet ready for the channel
pub fn encode_packet(samples: &[f32], sample_rate: u32) -> EncodedPacket {
    EncodedPacket {
        mime_type: pcm_mime_type(sample_rate),
        data: to_text(&encode(samples)),
    }
}

/// Decode a base64 PCM payload into float samples
pub fn decode_packet(data: &str) -> Result<Vec<f32>, CodecError> {
    decode(&from_text(data)?)
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Read the `rate=` parameter of a PCM mime type
pub fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Scale and clamp one float sample to i16
pub fn to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
