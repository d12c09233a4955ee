//! Session controller
//!
//! Public entry point for voice sessions. Builds each session from the
//! current catalog snapshot, keeps the registry of running sessions and
//! routes their updates: state changes and transcripts are re-broadcast,
//! completed sales become orders for the order sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audio::DeviceProvider;
use crate::channel::ChannelConnector;
use crate::error::SessionError;
use crate::sales::{
    build_instructions, register_sale_declaration, AssistantProfile, CatalogProvider, Order,
    OrderSink, SaleSignal,
};
use crate::session::{
    SessionConfig, SessionDevices, SessionMonitor, SessionState, SessionStats, SessionUpdate,
    TranscriptSegment, VoiceSession,
};

/// First order number handed out when none is configured
pub const DEFAULT_ORDER_NUMBER_BASE: u64 = 101;

const EVENT_CAPACITY: usize = 256;

/// Notification published to controller subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    StateChanged {
        session_id: Uuid,
        state: SessionState,
        /// Set once, on the transition into `Error`
        error: Option<String>,
    },
    Transcript {
        session_id: Uuid,
        segment: TranscriptSegment,
    },
    OrderCreated {
        session_id: Uuid,
        order: Order,
    },
}

/// Caller's view of a started session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

struct ActiveSession {
    session: VoiceSession,
    monitor: SessionMonitor,
    transcript: Arc<RwLock<Vec<TranscriptSegment>>>,
    router: JoinHandle<()>,
}

/// Everything the update router needs, cloned per session
#[derive(Clone)]
struct Router {
    events: broadcast::Sender<ControllerEvent>,
    orders: Arc<dyn OrderSink>,
    next_order: Arc<AtomicU64>,
}

pub struct SessionController {
    template: SessionConfig,
    profile: AssistantProfile,
    connector: Arc<dyn ChannelConnector>,
    devices: Arc<dyn DeviceProvider>,
    catalog: Arc<dyn CatalogProvider>,
    router: Router,
    sessions: RwLock<HashMap<Uuid, ActiveSession>>,
}

impl SessionController {
    /// `template` supplies model, rates and limits for every session;
    /// instructions, voice and tools are filled in per session.
    pub fn new(
        template: SessionConfig,
        profile: AssistantProfile,
        connector: Arc<dyn ChannelConnector>,
        devices: Arc<dyn DeviceProvider>,
        catalog: Arc<dyn CatalogProvider>,
        orders: Arc<dyn OrderSink>,
        order_number_base: u64,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            template,
            profile,
            connector,
            devices,
            catalog,
            router: Router {
                events,
                orders,
                next_order: Arc::new(AtomicU64::new(order_number_base)),
            },
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Profile used when `start_session` gets none
    pub fn default_profile(&self) -> &AssistantProfile {
        &self.profile
    }

    /// Subscribe to state changes, transcripts and created orders
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.router.events.subscribe()
    }

    /// Start a new session
    ///
    /// `profile` overrides the default assistant profile for this session
    /// only. The catalog is read once here; a running session never sees
    /// later catalog changes.
    pub async fn start_session(
        &self,
        profile: Option<AssistantProfile>,
    ) -> Result<SessionHandle, SessionError> {
        let profile = profile.unwrap_or_else(|| self.profile.clone());
        let products = self.catalog.products();
        let payment_methods = self.catalog.payment_methods();

        let mut config = self.template.clone();
        config.instructions = build_instructions(&profile, &products, &payment_methods);
        config.voice = profile.voice.to_string();
        config.tools = vec![register_sale_declaration()];

        info!(
            "Starting session for {} ({} products, {} payment methods)",
            profile.company_name,
            products.len(),
            payment_methods.len()
        );

        let input = self
            .devices
            .input()
            .await
            .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;
        let output = self
            .devices
            .output()
            .await
            .map_err(|e| SessionError::OutputDevice(e.to_string()))?;

        let (mut session, updates) = VoiceSession::new(
            config,
            Arc::clone(&self.connector),
            SessionDevices { input, output },
        );
        let id = session.id();
        let monitor = session.monitor();
        let transcript = Arc::new(RwLock::new(Vec::new()));

        // Spawned before start so connect-time state changes are routed too
        let router = tokio::spawn(
            self.router
                .clone()
                .run(id, updates, Arc::clone(&transcript)),
        );

        session.start().await?;

        let handle = SessionHandle {
            id,
            state: monitor.watch_state(),
        };

        self.sessions.write().await.insert(
            id,
            ActiveSession {
                session,
                monitor,
                transcript,
                router,
            },
        );

        Ok(handle)
    }

    /// Stop and unregister a session; `None` for unknown ids
    pub async fn stop_session(&self, id: Uuid) -> Option<SessionStats> {
        let ActiveSession {
            mut session,
            monitor,
            router,
            ..
        } = self.sessions.write().await.remove(&id)?;

        session.stop().await;
        drop(session);

        // Router drains the remaining updates once the session is gone
        if let Err(e) = router.await {
            error!("Update router for session {} panicked: {}", id, e);
        }

        let stats = monitor.stats();
        info!(
            "Session {} stopped: {} frames sent, {} buffers scheduled",
            id, stats.frames_sent, stats.buffers_scheduled
        );
        Some(stats)
    }

    /// Stop every registered session
    pub async fn stop_all(&self) -> Vec<SessionStats> {
        let ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();

        let mut stopped = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(stats) = self.stop_session(id).await {
                stopped.push(stats);
            }
        }
        stopped
    }

    pub async fn session_stats(&self, id: Uuid) -> Option<SessionStats> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|active| active.monitor.stats())
    }

    /// Transcript accumulated so far
    pub async fn transcript(&self, id: Uuid) -> Option<Vec<TranscriptSegment>> {
        let transcript = {
            let sessions = self.sessions.read().await;
            Arc::clone(&sessions.get(&id)?.transcript)
        };
        let segments = transcript.read().await.clone();
        Some(segments)
    }

    /// Stats for every registered session, including failed ones
    pub async fn active_sessions(&self) -> Vec<SessionStats> {
        self.sessions
            .read()
            .await
            .values()
            .map(|active| active.monitor.stats())
            .collect()
    }
}

impl Router {
    async fn run(
        self,
        session_id: Uuid,
        mut updates: mpsc::UnboundedReceiver<SessionUpdate>,
        transcript: Arc<RwLock<Vec<TranscriptSegment>>>,
    ) {
        while let Some(update) = updates.recv().await {
            match update {
                SessionUpdate::State { state, error } => {
                    self.publish(ControllerEvent::StateChanged {
                        session_id,
                        state,
                        error: error.map(|e| e.to_string()),
                    });
                }
                SessionUpdate::Transcript(segment) => {
                    transcript.write().await.push(segment.clone());
                    self.publish(ControllerEvent::Transcript {
                        session_id,
                        segment,
                    });
                }
                SessionUpdate::SaleCompleted(sale) => {
                    self.create_order(session_id, sale).await;
                }
            }
        }
    }

    async fn create_order(&self, session_id: Uuid, sale: SaleSignal) {
        // Numbers are only consumed by structurally complete sales
        if let Err(e) = sale.validate() {
            warn!("Discarding incomplete sale from session {}: {}", session_id, e);
            return;
        }

        let number = self.next_order.fetch_add(1, Ordering::SeqCst);
        let order = match Order::from_sale(&sale, number, Utc::now()) {
            Ok(order) => order,
            Err(e) => {
                warn!("Discarding sale from session {}: {}", session_id, e);
                return;
            }
        };

        info!("Created order #{} for {}", order.order_number, order.client_name);

        if let Err(e) = self.orders.on_order_created(order.clone()).await {
            error!("Order sink rejected order #{}: {:#}", order.order_number, e);
        }

        self.publish(ControllerEvent::OrderCreated { session_id, order });
    }

    fn publish(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
