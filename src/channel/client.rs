use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::messages::{
    parse_server_message, ClientMessage, Content, FunctionDeclaration, FunctionResponse,
    GenerationConfig, PrebuiltVoiceConfig, ServerMessage, Setup, SpeechConfig, TextContent, Tool,
    VoiceConfig,
};
use crate::audio::EncodedPacket;
use crate::error::{ChannelError, SessionError};

/// How long `close()` waits for the close frame to be written
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Event delivered by an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One inbound text payload
    Message(String),
    /// Transport or framing failure; no further events follow
    Error(String),
    /// Remote closed the channel
    Closed(Option<String>),
}

/// Behavioral configuration sent during the handshake
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    pub instructions: String,
    pub voice: String,
    pub tools: Vec<FunctionDeclaration>,
}

impl ChannelConfig {
    pub fn setup(&self, model: &str) -> Setup {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        let tools = if self.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: self.tools.clone(),
            }]
        };

        Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextContent {
                    text: self.instructions.clone(),
                }],
            },
            tools,
            input_audio_transcription: json!({}),
            output_audio_transcription: json!({}),
        }
    }
}

/// Open bidirectional channel to the engine
#[async_trait::async_trait]
pub trait VoiceChannel: Send {
    /// Fire-and-forget audio frame
    fn send(&mut self, packet: EncodedPacket) -> Result<(), ChannelError>;

    /// Answer a tool call
    fn send_tool_response(&mut self, response: FunctionResponse) -> Result<(), ChannelError>;

    /// Close the channel; calling it again is a no-op
    async fn close(&mut self);
}

/// An open channel and its inbound event stream
pub struct Connection {
    pub channel: Box<dyn VoiceChannel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Opens channels to the engine
#[async_trait::async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Connect and complete the handshake
    async fn connect(&self, model: &str, config: &ChannelConfig) -> Result<Connection, SessionError>;
}

enum Outbound {
    Message(ClientMessage),
    Close,
}

/// WebSocket connector for the live engine
pub struct LiveConnector {
    url: String,
    api_key: Option<String>,
    queue_capacity: usize,
}

impl LiveConnector {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
            queue_capacity: 64,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    fn endpoint(&self) -> String {
        match &self.api_key {
            Some(key) if self.url.contains('?') => format!("{}&key={}", self.url, key),
            Some(key) => format!("{}?key={}", self.url, key),
            None => self.url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ChannelConnector for LiveConnector {
    async fn connect(&self, model: &str, config: &ChannelConfig) -> Result<Connection, SessionError> {
        info!("Connecting to live engine at {} (model {})", self.url, model);

        let (ws, _) = tokio_tungstenite::connect_async(self.endpoint())
            .await
            .map_err(|e| SessionError::ChannelOpen(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(config.setup(model)))
            .map_err(|e| SessionError::ChannelOpen(e.to_string()))?;
        sink.send(Message::Text(setup))
            .await
            .map_err(|e| SessionError::ChannelOpen(e.to_string()))?;

        // Handshake completes on setupComplete
        loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                    return Err(SessionError::ChannelOpen(format!(
                        "closed during handshake: {}",
                        reason
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SessionError::ChannelOpen(e.to_string())),
                None => {
                    return Err(SessionError::ChannelOpen(
                        "connection ended during handshake".to_string(),
                    ))
                }
            };

            match parse_server_message(&text) {
                Ok(ServerMessage::SetupComplete) => break,
                Ok(other) => debug!("Ignoring message before setup completed: {:?}", other),
                Err(e) => warn!("Unparseable handshake message: {}", e),
            }
        }

        info!("Live engine handshake complete");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(self.queue_capacity);
        let (events_tx, events_rx) = mpsc::channel(self.queue_capacity);

        let writer_events = events_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let message = match outbound {
                    Outbound::Message(message) => message,
                    Outbound::Close => {
                        if let Err(e) = sink.close().await {
                            debug!("Error closing websocket: {}", e);
                        }
                        return;
                    }
                };

                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize outbound message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!("Failed to write to live engine: {}", e);
                    let _ = writer_events.send(ChannelEvent::Error(e.to_string())).await;
                    return;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => ChannelEvent::Message(text),
                    Ok(Message::Binary(bytes)) => {
                        ChannelEvent::Message(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.into_owned());
                        let _ = events_tx.send(ChannelEvent::Closed(reason)).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events_tx.send(ChannelEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                if events_tx.send(event).await.is_err() {
                    return;
                }
            }

            let _ = events_tx.send(ChannelEvent::Closed(None)).await;
        });

        Ok(Connection {
            channel: Box::new(LiveChannel {
                outbound: outbound_tx,
                writer: Some(writer),
                reader: Some(reader),
            }),
            events: events_rx,
        })
    }
}

/// WebSocket channel handle
pub struct LiveChannel {
    outbound: mpsc::Sender<Outbound>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl LiveChannel {
    fn enqueue(&self, message: ClientMessage) -> Result<(), ChannelError> {
        self.outbound
            .try_send(Outbound::Message(message))
            .map_err(|e| match e {
                TrySendError::Full(_) => ChannelError::Full,
                TrySendError::Closed(_) => ChannelError::Closed,
            })
    }
}

#[async_trait::async_trait]
impl VoiceChannel for LiveChannel {
    fn send(&mut self, packet: EncodedPacket) -> Result<(), ChannelError> {
        self.enqueue(ClientMessage::audio(packet))
    }

    fn send_tool_response(&mut self, response: FunctionResponse) -> Result<(), ChannelError> {
        self.enqueue(ClientMessage::tool_response(response))
    }

    async fn close(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };

        let _ = self.outbound.send(Outbound::Close).await;
        if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
            warn!("Timed out closing live engine channel");
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        info!("Live engine channel closed");
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
