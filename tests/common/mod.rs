// In-memory stand-ins for the devices and the engine channel
//
// Every fake appends to one shared log so tests can assert on the order in
// which the session touches its collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use voice_pos::audio::{
    codec, AudioInput, AudioOutput, DeviceProvider, EncodedPacket, InputEvent,
};
use voice_pos::channel::{
    ChannelConfig, ChannelConnector, ChannelEvent, Connection, FunctionResponse, VoiceChannel,
};
use voice_pos::error::{AudioError, ChannelError, SessionError};
use voice_pos::sales::{Order, OrderSink, PaymentMethod, Product, StaticCatalog};
use voice_pos::session::{SessionConfig, SessionDevices};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ============================================================================
// Audio input
// ============================================================================

/// Microphone fed by the test through `FakeInputControl`
pub struct FakeInput {
    log: Log,
    sender: Arc<Mutex<Option<mpsc::Sender<InputEvent>>>>,
    deny: bool,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioInput for FakeInput {
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, AudioError> {
        self.log.lock().unwrap().push("input.start".to_string());
        if self.deny {
            return Err(AudioError::Unavailable("permission denied".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        self.log.lock().unwrap().push("input.stop".to_string());
        self.sender.lock().unwrap().take();
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

#[derive(Clone)]
pub struct FakeInputControl {
    sender: Arc<Mutex<Option<mpsc::Sender<InputEvent>>>>,
}

impl FakeInputControl {
    fn sender(&self) -> mpsc::Sender<InputEvent> {
        self.sender
            .lock()
            .unwrap()
            .clone()
            .expect("input not started")
    }

    pub async fn push(&self, samples: Vec<f32>) {
        self.sender()
            .send(InputEvent::Samples(samples))
            .await
            .expect("capture pump gone");
    }

    pub async fn fail(&self, reason: &str) {
        let _ = self.sender().send(InputEvent::Failed(reason.to_string())).await;
    }

    /// True once nothing reads the input any more
    pub fn is_released(&self) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

// ============================================================================
// Audio output
// ============================================================================

/// Output whose clock only moves when the test says so
pub struct ManualOutput {
    clock: Arc<Mutex<f64>>,
    submitted: Arc<Mutex<Vec<(f64, usize)>>>,
}

#[derive(Clone)]
pub struct ManualOutputControl {
    clock: Arc<Mutex<f64>>,
    submitted: Arc<Mutex<Vec<(f64, usize)>>>,
}

impl ManualOutputControl {
    pub fn set_time(&self, secs: f64) {
        *self.clock.lock().unwrap() = secs;
    }

    /// `(start time, sample count)` of every submitted buffer
    pub fn submitted(&self) -> Vec<(f64, usize)> {
        self.submitted.lock().unwrap().clone()
    }
}

pub fn manual_output() -> (ManualOutput, ManualOutputControl) {
    let clock = Arc::new(Mutex::new(0.0));
    let submitted = Arc::new(Mutex::new(Vec::new()));
    (
        ManualOutput {
            clock: Arc::clone(&clock),
            submitted: Arc::clone(&submitted),
        },
        ManualOutputControl { clock, submitted },
    )
}

impl AudioOutput for ManualOutput {
    fn now(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    fn submit(&mut self, start_at: f64, samples: Vec<f32>) -> Result<(), AudioError> {
        self.submitted.lock().unwrap().push((start_at, samples.len()));
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        24000
    }

    fn name(&self) -> &str {
        "manual output"
    }
}

// ============================================================================
// Engine channel
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
pub enum ConnectBehavior {
    Accept,
    Refuse,
    Hang,
}

pub struct FakeChannel {
    log: Log,
    sent: Arc<Mutex<Vec<EncodedPacket>>>,
    responses: Arc<Mutex<Vec<FunctionResponse>>>,
    input: FakeInputControl,
    closed: bool,
}

#[async_trait::async_trait]
impl VoiceChannel for FakeChannel {
    fn send(&mut self, packet: EncodedPacket) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }

    fn send_tool_response(&mut self, response: FunctionResponse) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.responses.lock().unwrap().push(response);
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.log.lock().unwrap().push(format!(
            "channel.close(capture_stopped={})",
            self.input.is_released()
        ));
    }
}

pub struct FakeConnector {
    behavior: ConnectBehavior,
    log: Log,
    sent: Arc<Mutex<Vec<EncodedPacket>>>,
    responses: Arc<Mutex<Vec<FunctionResponse>>>,
    events: Arc<Mutex<Option<mpsc::Sender<ChannelEvent>>>>,
    configs: Arc<Mutex<Vec<ChannelConfig>>>,
    input: FakeInputControl,
}

#[async_trait::async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(&self, model: &str, config: &ChannelConfig) -> Result<Connection, SessionError> {
        self.log.lock().unwrap().push(format!("connect({})", model));
        self.configs.lock().unwrap().push(config.clone());

        match self.behavior {
            ConnectBehavior::Refuse => {
                return Err(SessionError::ChannelOpen("connection refused".to_string()))
            }
            ConnectBehavior::Hang => std::future::pending::<()>().await,
            ConnectBehavior::Accept => {}
        }

        let (tx, rx) = mpsc::channel(64);
        *self.events.lock().unwrap() = Some(tx);

        Ok(Connection {
            channel: Box::new(FakeChannel {
                log: Arc::clone(&self.log),
                sent: Arc::clone(&self.sent),
                responses: Arc::clone(&self.responses),
                input: self.input.clone(),
                closed: false,
            }),
            events: rx,
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

/// One session's worth of fakes plus the handles to drive them
pub struct Harness {
    pub log: Log,
    pub input: FakeInputControl,
    pub output: ManualOutputControl,
    sent: Arc<Mutex<Vec<EncodedPacket>>>,
    responses: Arc<Mutex<Vec<FunctionResponse>>>,
    events: Arc<Mutex<Option<mpsc::Sender<ChannelEvent>>>>,
    configs: Arc<Mutex<Vec<ChannelConfig>>>,
    connector: Arc<FakeConnector>,
    devices: Option<SessionDevices>,
}

impl Harness {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self::with_microphone(behavior, false)
    }

    pub fn with_microphone(behavior: ConnectBehavior, deny: bool) -> Self {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sender = Arc::new(Mutex::new(None));
        let input = FakeInputControl {
            sender: Arc::clone(&sender),
        };
        let (output, output_control) = manual_output();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(Mutex::new(None));
        let configs = Arc::new(Mutex::new(Vec::new()));

        let connector = FakeConnector {
            behavior,
            log: Arc::clone(&log),
            sent: Arc::clone(&sent),
            responses: Arc::clone(&responses),
            events: Arc::clone(&events),
            configs: Arc::clone(&configs),
            input: input.clone(),
        };

        let devices = SessionDevices {
            input: Box::new(FakeInput {
                log: Arc::clone(&log),
                sender,
                deny,
                capturing: false,
            }),
            output: Box::new(output),
        };

        Self {
            log,
            input,
            output: output_control,
            sent,
            responses,
            events,
            configs,
            connector: Arc::new(connector),
            devices: Some(devices),
        }
    }

    pub fn connector(&self) -> Arc<dyn ChannelConnector> {
        Arc::clone(&self.connector) as Arc<dyn ChannelConnector>
    }

    pub fn take_devices(&mut self) -> SessionDevices {
        self.devices.take().expect("devices already taken")
    }

    pub fn sent(&self) -> Vec<EncodedPacket> {
        self.sent.lock().unwrap().clone()
    }

    pub fn responses(&self) -> Vec<FunctionResponse> {
        self.responses.lock().unwrap().clone()
    }

    pub fn configs(&self) -> Vec<ChannelConfig> {
        self.configs.lock().unwrap().clone()
    }

    /// Deliver one engine event to the session
    pub async fn engine(&self, event: ChannelEvent) {
        let tx = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("channel not open");
        tx.send(event).await.expect("session stopped reading");
    }

    pub async fn engine_says(&self, message: Value) {
        self.engine(ChannelEvent::Message(message.to_string())).await;
    }
}

/// Session config with short limits for tests
pub fn test_config() -> SessionConfig {
    SessionConfig {
        frame_size: 160,
        connect_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

/// `serverContent` message carrying one reply audio part
pub fn audio_message(samples: &[f32]) -> Value {
    let packet = codec::encode_packet(samples, 24000);
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{ "inlineData": { "mimeType": packet.mime_type, "data": packet.data } }]
            }
        }
    })
}

pub fn silence(secs: f64, rate: u32) -> Vec<f32> {
    vec![0.0; (secs * rate as f64).round() as usize]
}

// ============================================================================
// Controller collaborators
// ============================================================================

/// Hands out one set of devices; later requests find nothing
pub struct FakeDevices {
    input: Mutex<Option<Box<dyn AudioInput>>>,
    output: Mutex<Option<Box<dyn AudioOutput>>>,
}

impl FakeDevices {
    pub fn new(devices: SessionDevices) -> Self {
        Self {
            input: Mutex::new(Some(devices.input)),
            output: Mutex::new(Some(devices.output)),
        }
    }

    pub fn without_output(devices: SessionDevices) -> Self {
        Self {
            input: Mutex::new(Some(devices.input)),
            output: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl DeviceProvider for FakeDevices {
    async fn input(&self) -> Result<Box<dyn AudioInput>, AudioError> {
        self.input
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AudioError::Unavailable("no microphone".to_string()))
    }

    async fn output(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        self.output
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AudioError::Unavailable("no speaker".to_string()))
    }
}

/// Order sink that keeps every order it is given
#[derive(Default)]
pub struct RecordingSink {
    pub orders: Mutex<Vec<Order>>,
    pub fail: bool,
}

#[async_trait::async_trait]
impl OrderSink for RecordingSink {
    async fn on_order_created(&self, order: Order) -> anyhow::Result<()> {
        self.orders.lock().unwrap().push(order);
        if self.fail {
            anyhow::bail!("order store offline");
        }
        Ok(())
    }
}

pub fn bakery_catalog() -> StaticCatalog {
    StaticCatalog {
        products: vec![Product {
            name: "Chocolate cake".to_string(),
            price: 25.0,
        }],
        payment_methods: vec![PaymentMethod {
            name: "Cash".to_string(),
            details: "Pay on delivery".to_string(),
        }],
    }
}

pub fn sale_call(id: &str, client: &str, quantity: u32) -> Value {
    json!({
        "toolCall": {
            "functionCalls": [{
                "id": id,
                "name": "register_sale",
                "args": {
                    "client_name": client,
                    "items": [{ "name": "Chocolate cake", "quantity": quantity, "price": 25.0 }],
                    "payment_method": "Cash"
                }
            }]
        }
    })
}
