use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::state::{SessionState, SessionUpdate, StateMachine};
use super::stats::{SessionCounters, SessionStats, TranscriptSegment};
use crate::audio::{
    AudioInput, AudioOutput, CaptureEvent, CaptureStreamer, EncodedPacket, PlaybackBuffer,
    PlaybackScheduler,
};
use crate::channel::{
    parse_server_message, ChannelConnector, ChannelEvent, Connection, FunctionCall,
    FunctionResponse, ServerContent, ServerMessage, VoiceChannel,
};
use crate::error::{ChannelError, CodecError, SessionError};
use crate::sales::{SaleSignal, REGISTER_SALE};

/// Device handles lent to one session
pub struct SessionDevices {
    pub input: Box<dyn AudioInput>,
    pub output: Box<dyn AudioOutput>,
}

enum Command {
    Stop(oneshot::Sender<()>),
}

/// Read-only view of a session, cheap to clone
#[derive(Clone)]
pub struct SessionMonitor {
    id: Uuid,
    created_at: DateTime<Utc>,
    state: watch::Receiver<SessionState>,
    closed_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    counters: Arc<SessionCounters>,
}

impl SessionMonitor {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at.lock().ok().and_then(|closed| *closed)
    }

    /// State-change stream for this session
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> SessionStats {
        let closed_at = self.closed_at();
        let end = closed_at.unwrap_or_else(Utc::now);
        let duration = end.signed_duration_since(self.created_at);
        let counters = &self.counters;

        SessionStats {
            session_id: self.id,
            state: self.state(),
            started_at: self.created_at,
            closed_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: SessionCounters::load(&counters.frames_sent),
            frames_dropped: SessionCounters::load(&counters.frames_dropped),
            messages_received: SessionCounters::load(&counters.messages_received),
            messages_dropped: SessionCounters::load(&counters.messages_dropped),
            buffers_scheduled: SessionCounters::load(&counters.buffers_scheduled),
            buffers_dropped: SessionCounters::load(&counters.buffers_dropped),
            playback_backlog_secs: counters.backlog_secs(),
        }
    }
}

/// One realtime voice conversation with the engine
///
/// Owns the capture subscription, the channel and the playback scheduler.
/// After `start()` succeeds, all of them live inside a single actor task;
/// capture frames, channel events and stop commands are processed there in
/// arrival order.
pub struct VoiceSession {
    config: SessionConfig,
    connector: Arc<dyn ChannelConnector>,
    devices: Option<SessionDevices>,
    machine: Arc<StateMachine>,
    monitor: SessionMonitor,
    commands: Option<mpsc::Sender<Command>>,
    actor: Option<JoinHandle<()>>,
}

impl VoiceSession {
    /// Create an idle session
    ///
    /// Returns the session and the receiver of its updates (state changes,
    /// transcript segments, completed sales).
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn ChannelConnector>,
        devices: SessionDevices,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (machine, updates) = StateMachine::new();
        let monitor = SessionMonitor {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state: machine.subscribe(),
            closed_at: Arc::new(Mutex::new(None)),
            counters: Arc::new(SessionCounters::default()),
        };

        info!("Creating voice session: {}", monitor.id);

        let session = Self {
            config,
            connector,
            devices: Some(devices),
            machine: Arc::new(machine),
            monitor,
            commands: None,
            actor: None,
        };

        (session, updates)
    }

    pub fn id(&self) -> Uuid {
        self.monitor.id
    }

    pub fn state(&self) -> SessionState {
        self.machine.current()
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.monitor.stats()
    }

    /// Acquire the microphone, open the channel and start streaming
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let current = self.machine.current();
        if current != SessionState::Idle {
            return Err(SessionError::AlreadyStarted(current.to_string()));
        }
        let Some(SessionDevices { mut input, output }) = self.devices.take() else {
            return Err(SessionError::AlreadyStarted(current.to_string()));
        };

        self.machine.transition(SessionState::Connecting);
        info!(
            "Starting voice session {} (model {}, input {})",
            self.monitor.id,
            self.config.model,
            input.name()
        );

        let channel_config = self.config.channel_config();
        let connector = Arc::clone(&self.connector);
        let model = self.config.model.clone();
        let timeout = self.config.connect_timeout;
        let connect = async move {
            match tokio::time::timeout(timeout, connector.connect(&model, &channel_config)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::ConnectTimeout(timeout)),
            }
        };

        // Microphone permission and handshake proceed concurrently
        let (mic, connection) = tokio::join!(input.start(), connect);

        let (input_rx, connection) = match (mic, connection) {
            (Ok(input_rx), Ok(connection)) => (input_rx, connection),
            (Err(e), connection) => {
                if let Ok(mut connection) = connection {
                    connection.channel.close().await;
                }
                return Err(self.abort_start(SessionError::PermissionDenied(e.to_string())));
            }
            (Ok(_), Err(e)) => {
                if let Err(stop) = input.stop().await {
                    warn!("Failed to release microphone: {}", stop);
                }
                return Err(self.abort_start(e));
            }
        };

        let Connection { channel, events } = connection;

        let mut scheduler = PlaybackScheduler::new(output, self.config.max_backlog);
        scheduler.reset();

        let (capture_tx, capture_rx) = mpsc::channel(self.config.frame_queue_capacity.max(1));
        let capture = CaptureStreamer::start(
            input_rx,
            capture_tx,
            self.config.frame_size,
            self.config.input_sample_rate,
            Arc::clone(&self.monitor.counters.frames_dropped),
        );

        let (commands_tx, commands_rx) = mpsc::channel(4);

        self.machine.transition(SessionState::Open);

        let actor = SessionActor {
            id: self.monitor.id,
            machine: Arc::clone(&self.machine),
            counters: Arc::clone(&self.monitor.counters),
            closed_at: Arc::clone(&self.monitor.closed_at),
            commands: commands_rx,
            capture,
            capture_events: capture_rx,
            input,
            channel,
            channel_events: events,
            scheduler,
        };

        self.commands = Some(commands_tx);
        self.actor = Some(tokio::spawn(actor.run()));

        info!("Voice session {} open", self.monitor.id);
        Ok(())
    }

    /// Stop the session
    ///
    /// Returns once capture is stopped, the channel closed and the
    /// microphone released. Already scheduled audio keeps playing. A no-op
    /// on sessions that are idle, closed or failed.
    pub async fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let (done_tx, done_rx) = oneshot::channel();
            if commands.send(Command::Stop(done_tx)).await.is_ok() {
                let _ = done_rx.await;
            }
        } else {
            debug!(
                "Stop ignored for session {} in state {}",
                self.monitor.id,
                self.machine.current()
            );
        }

        if let Some(actor) = self.actor.take() {
            if let Err(e) = actor.await {
                error!("Session actor panicked: {}", e);
            }
        }
    }

    fn abort_start(&self, cause: SessionError) -> SessionError {
        error!("Voice session {} failed to start: {}", self.monitor.id, cause);
        mark_closed(&self.monitor.closed_at);
        self.machine.fail(cause.clone());
        cause
    }
}

fn mark_closed(closed_at: &Mutex<Option<DateTime<Utc>>>) {
    if let Ok(mut closed) = closed_at.lock() {
        closed.get_or_insert_with(Utc::now);
    }
}

enum Exit {
    Stop(Option<oneshot::Sender<()>>),
    Fail(SessionError),
}

/// Single owner of the channel, capture and playback clock
struct SessionActor {
    id: Uuid,
    machine: Arc<StateMachine>,
    counters: Arc<SessionCounters>,
    closed_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    commands: mpsc::Receiver<Command>,
    capture: CaptureStreamer,
    capture_events: mpsc::Receiver<CaptureEvent>,
    input: Box<dyn AudioInput>,
    channel: Box<dyn VoiceChannel>,
    channel_events: mpsc::Receiver<ChannelEvent>,
    scheduler: PlaybackScheduler,
}

impl SessionActor {
    async fn run(mut self) {
        let exit = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Stop(done)) => break Exit::Stop(Some(done)),
                    // Session handle dropped
                    None => break Exit::Stop(None),
                },

                event = self.capture_events.recv() => match event {
                    Some(CaptureEvent::Frame { sequence, packet }) => {
                        if let Err(e) = self.forward_frame(sequence, packet) {
                            break Exit::Fail(e);
                        }
                    }
                    Some(CaptureEvent::Failed(reason)) => {
                        break Exit::Fail(SessionError::CaptureDevice(reason));
                    }
                    None => {
                        break Exit::Fail(SessionError::CaptureDevice(
                            "capture stream ended".to_string(),
                        ));
                    }
                },

                event = self.channel_events.recv() => match event {
                    Some(ChannelEvent::Message(text)) => self.handle_message(&text),
                    Some(ChannelEvent::Error(reason)) => {
                        break Exit::Fail(SessionError::ChannelRuntime(reason));
                    }
                    Some(ChannelEvent::Closed(reason)) => {
                        break Exit::Fail(SessionError::ChannelRuntime(format!(
                            "closed by engine: {}",
                            reason.unwrap_or_else(|| "no reason given".to_string())
                        )));
                    }
                    None => {
                        break Exit::Fail(SessionError::ChannelRuntime(
                            "channel event stream ended".to_string(),
                        ));
                    }
                },
            }
        };

        let id = self.id;
        let machine = Arc::clone(&self.machine);
        let closed_at = Arc::clone(&self.closed_at);

        match exit {
            Exit::Stop(done) => {
                info!("Stopping voice session {}", id);
                machine.transition(SessionState::Closing);
                self.teardown().await;
                mark_closed(&closed_at);
                machine.transition(SessionState::Closed);
                if let Some(done) = done {
                    let _ = done.send(());
                }
                info!("Voice session {} closed", id);
            }
            Exit::Fail(cause) => {
                error!("Voice session {} failed: {}", id, cause);
                self.teardown().await;
                mark_closed(&closed_at);
                machine.fail(cause);
            }
        }
    }

    /// Capture stop, channel close, microphone release, in that order
    async fn teardown(mut self) {
        self.capture.stop().await;
        self.channel.close().await;
        if let Err(e) = self.input.stop().await {
            warn!("Failed to release microphone: {}", e);
        }
        self.counters.set_backlog(self.scheduler.backlog());
        self.scheduler.release();
    }

    fn forward_frame(&mut self, sequence: u64, packet: EncodedPacket) -> Result<(), SessionError> {
        if self.machine.current() != SessionState::Open {
            SessionCounters::bump(&self.counters.frames_dropped);
            return Ok(());
        }

        match self.channel.send(packet) {
            Ok(()) => {
                SessionCounters::bump(&self.counters.frames_sent);
                Ok(())
            }
            Err(ChannelError::Full) => {
                SessionCounters::bump(&self.counters.frames_dropped);
                debug!("Channel busy, dropped frame {}", sequence);
                Ok(())
            }
            Err(ChannelError::Closed) => Err(SessionError::ChannelRuntime(
                "outbound channel closed".to_string(),
            )),
        }
    }

    fn handle_message(&mut self, text: &str) {
        SessionCounters::bump(&self.counters.messages_received);

        let message = match parse_server_message(text) {
            Ok(message) => message,
            Err(e) => {
                self.drop_message(&e);
                return;
            }
        };

        match message {
            ServerMessage::Content(content) => self.handle_content(content),
            ServerMessage::ToolCall(calls) => {
                for call in calls {
                    self.handle_tool_call(call);
                }
            }
            ServerMessage::GoAway => {
                warn!("Engine announced disconnect for session {}", self.id);
            }
            ServerMessage::SetupComplete | ServerMessage::Other => {
                debug!("Ignoring control message");
            }
        }
    }

    fn handle_content(&mut self, content: ServerContent) {
        // A bad audio part drops the whole message
        let buffers: Result<Vec<PlaybackBuffer>, CodecError> =
            content.audio().map(|audio| audio.decode()).collect();
        let buffers = match buffers {
            Ok(buffers) => buffers,
            Err(e) => {
                self.drop_message(&e);
                return;
            }
        };

        for buffer in buffers {
            match self.scheduler.schedule(buffer) {
                Some(_) => SessionCounters::bump(&self.counters.buffers_scheduled),
                None => SessionCounters::bump(&self.counters.buffers_dropped),
            }
        }
        self.counters.set_backlog(self.scheduler.backlog());

        for part in content.text() {
            self.machine.notify(SessionUpdate::Transcript(TranscriptSegment {
                speaker: part.speaker,
                text: part.text.clone(),
                timestamp: Utc::now(),
            }));
        }

        if content.interrupted {
            debug!("Engine turn interrupted");
        }
    }

    fn handle_tool_call(&mut self, call: FunctionCall) {
        let response = if call.name == REGISTER_SALE {
            match SaleSignal::from_call(&call).and_then(|sale| sale.validate().map(|()| sale)) {
                Ok(sale) => {
                    info!(
                        "Engine closed a sale for {} ({} items)",
                        sale.client_name,
                        sale.items.len()
                    );
                    self.machine.notify(SessionUpdate::SaleCompleted(sale));
                    json!({ "result": "ok" })
                }
                Err(e) => {
                    warn!("Rejected {} call: {}", REGISTER_SALE, e);
                    json!({ "error": e.to_string() })
                }
            }
        } else {
            warn!("Engine called unknown tool {}", call.name);
            json!({ "error": format!("unknown tool {}", call.name) })
        };

        let reply = FunctionResponse {
            id: call.id,
            name: call.name,
            response,
        };
        if let Err(e) = self.channel.send_tool_response(reply) {
            warn!("Failed to answer tool call: {}", e);
        }
    }

    fn drop_message(&self, cause: &CodecError) {
        SessionCounters::bump(&self.counters.messages_dropped);
        warn!("Dropping inbound message on session {}: {}", self.id, cause);
    }
}
