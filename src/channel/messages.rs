//! Live engine wire messages
//!
//! Outbound messages serialize as `{"setup": ...}`, `{"realtimeInput": ...}`
//! and `{"toolResponse": ...}`. Inbound JSON is decoded into the tagged
//! [`ServerMessage`] so an absent audio payload is an ordinary variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::codec::{self, EncodedPacket};
use crate::audio::PlaybackBuffer;
use crate::error::CodecError;

/// Message sent to the engine
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Session setup, the first message on a new channel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    pub input_audio_transcription: Value,
    pub output_audio_transcription: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Function the engine may call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedPacket>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Reply to one tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

impl ClientMessage {
    /// Audio frame for the engine
    pub fn audio(packet: EncodedPacket) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![packet],
        })
    }

    pub fn tool_response(response: FunctionResponse) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![response],
        })
    }
}

/// Who produced a piece of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextPart {
    pub speaker: Speaker,
    pub text: String,
}

/// Base64 PCM reply audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPart {
    pub mime_type: String,
    pub data: String,
}

impl AudioPart {
    pub fn sample_rate(&self) -> u32 {
        codec::parse_rate(&self.mime_type).unwrap_or(codec::DEFAULT_OUTPUT_RATE)
    }

    pub fn decode(&self) -> Result<PlaybackBuffer, CodecError> {
        PlaybackBuffer::from_base64(&self.data, self.sample_rate())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerPart {
    Text(TextPart),
    Audio(AudioPart),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    pub parts: Vec<ServerPart>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

impl ServerContent {
    pub fn audio(&self) -> impl Iterator<Item = &AudioPart> {
        self.parts.iter().filter_map(|part| match part {
            ServerPart::Audio(audio) => Some(audio),
            ServerPart::Text(_) => None,
        })
    }

    pub fn text(&self) -> impl Iterator<Item = &TextPart> {
        self.parts.iter().filter_map(|part| match part {
            ServerPart::Text(text) => Some(text),
            ServerPart::Audio(_) => None,
        })
    }
}

/// Function call requested by the engine
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SetupComplete,
    Content(ServerContent),
    ToolCall(Vec<FunctionCall>),
    /// Engine announced it will disconnect soon
    GoAway,
    /// Anything this client does not act on
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<RawServerContent>,
    tool_call: Option<RawToolCall>,
    go_away: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<RawTranscription>,
    output_transcription: Option<RawTranscription>,
}

#[derive(Debug, Deserialize)]
struct RawTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    text: Option<String>,
    inline_data: Option<EncodedPacket>,
}

#[derive(Debug, Deserialize)]
struct RawTranscription {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

/// Parse one inbound text frame
pub fn parse_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    let raw: RawServerMessage = serde_json::from_str(text)?;

    if raw.setup_complete.is_some() {
        return Ok(ServerMessage::SetupComplete);
    }

    if let Some(call) = raw.tool_call {
        return Ok(ServerMessage::ToolCall(call.function_calls));
    }

    if let Some(content) = raw.server_content {
        let mut parts = Vec::new();

        if let Some(transcription) = content.input_transcription.and_then(|t| t.text) {
            parts.push(ServerPart::Text(TextPart {
                speaker: Speaker::User,
                text: transcription,
            }));
        }

        for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                parts.push(ServerPart::Audio(AudioPart {
                    mime_type: inline.mime_type,
                    data: inline.data,
                }));
            }
            if let Some(text) = part.text {
                parts.push(ServerPart::Text(TextPart {
                    speaker: Speaker::Assistant,
                    text,
                }));
            }
        }

        if let Some(transcription) = content.output_transcription.and_then(|t| t.text) {
            parts.push(ServerPart::Text(TextPart {
                speaker: Speaker::Assistant,
                text: transcription,
            }));
        }

        return Ok(ServerMessage::Content(ServerContent {
            parts,
            turn_complete: content.turn_complete,
            interrupted: content.interrupted,
        }));
    }

    if raw.go_away.is_some() {
        return Ok(ServerMessage::GoAway);
    }

    Ok(ServerMessage::Other)
}
