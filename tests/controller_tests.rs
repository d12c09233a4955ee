// Integration tests for the session controller
//
// Sessions run against the in-memory engine and devices from `common`;
// these tests cover registration, event routing and order creation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::sync::broadcast;

use common::{
    bakery_catalog, eventually, sale_call, test_config, ConnectBehavior, FakeDevices, Harness,
    RecordingSink,
};
use voice_pos::controller::{ControllerEvent, SessionController};
use voice_pos::error::SessionError;
use voice_pos::sales::{AssistantProfile, AssistantTone, LoggingOrderSink, VoiceName};
use voice_pos::session::SessionState;

fn controller(harness: &mut Harness, sink: Arc<RecordingSink>) -> SessionController {
    SessionController::new(
        test_config(),
        AssistantProfile {
            company_name: "Dulce Hogar".to_string(),
            voice: VoiceName::Zephyr,
            tone: AssistantTone::Friendly,
        },
        harness.connector(),
        Arc::new(FakeDevices::new(harness.take_devices())),
        Arc::new(bakery_catalog()),
        sink,
        101,
    )
}

async fn next_event(events: &mut broadcast::Receiver<ControllerEvent>) -> ControllerEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no controller event within 2s")
        .expect("controller event stream closed")
}

async fn next_order(events: &mut broadcast::Receiver<ControllerEvent>) -> voice_pos::sales::Order {
    loop {
        if let ControllerEvent::OrderCreated { order, .. } = next_event(events).await {
            return order;
        }
    }
}

#[tokio::test]
async fn test_session_is_configured_from_catalog_and_profile() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let controller = controller(&mut harness, Arc::new(RecordingSink::default()));

    let profile = AssistantProfile {
        company_name: "Panaderia Sol".to_string(),
        voice: VoiceName::Charon,
        tone: AssistantTone::Professional,
    };
    let handle = controller.start_session(Some(profile)).await?;
    assert_eq!(handle.state(), SessionState::Open);

    let configs = harness.configs();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].voice, "Charon");
    assert!(configs[0].instructions.contains("Panaderia Sol"));
    assert!(configs[0].instructions.contains("Chocolate cake ($25.00)"));
    assert!(configs[0].instructions.contains("Cash: Pay on delivery"));
    assert_eq!(configs[0].tools.len(), 1);
    assert_eq!(configs[0].tools[0].name, "register_sale");

    controller.stop_session(handle.id()).await;
    Ok(())
}

#[tokio::test]
async fn test_default_profile_is_used_without_override() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let controller = controller(&mut harness, Arc::new(RecordingSink::default()));

    let handle = controller.start_session(None).await?;

    assert!(harness.configs()[0].instructions.contains("Dulce Hogar"));
    assert_eq!(harness.configs()[0].voice, "Zephyr");

    controller.stop_session(handle.id()).await;
    Ok(())
}

#[tokio::test]
async fn test_state_changes_are_broadcast() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let controller = controller(&mut harness, Arc::new(RecordingSink::default()));
    let mut events = controller.subscribe();

    let handle = controller.start_session(None).await?;
    let stats = controller.stop_session(handle.id()).await.expect("registered");
    assert_eq!(stats.state, SessionState::Closed);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::StateChanged {
            session_id,
            state,
            error,
        } = event
        {
            assert_eq!(session_id, handle.id());
            assert!(error.is_none());
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_stop_unknown_session_is_a_no_op() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let controller = controller(&mut harness, Arc::new(RecordingSink::default()));

    let handle = controller.start_session(None).await?;
    assert!(controller.stop_session(handle.id()).await.is_some());
    assert!(controller.stop_session(handle.id()).await.is_none());
    assert!(controller.stop_session(uuid::Uuid::new_v4()).await.is_none());
    assert!(controller.active_sessions().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_start_is_reported_and_not_registered() {
    let mut harness = Harness::new(ConnectBehavior::Refuse);
    let controller = controller(&mut harness, Arc::new(RecordingSink::default()));
    let mut events = controller.subscribe();

    let result = controller.start_session(None).await;
    assert!(matches!(result, Err(SessionError::ChannelOpen(_))));
    assert!(controller.active_sessions().await.is_empty());

    let error = loop {
        if let ControllerEvent::StateChanged {
            state: SessionState::Error,
            error,
            ..
        } = next_event(&mut events).await
        {
            break error;
        }
    };
    assert!(error.is_some_and(|message| message.contains("connection refused")));
}

#[tokio::test]
async fn test_missing_devices_fail_start() {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let devices = harness.take_devices();
    let controller = SessionController::new(
        test_config(),
        AssistantProfile::default(),
        harness.connector(),
        Arc::new(FakeDevices::without_output(devices)),
        Arc::new(bakery_catalog()),
        Arc::new(LoggingOrderSink),
        101,
    );

    let result = controller.start_session(None).await;
    assert!(matches!(result, Err(SessionError::OutputDevice(_))));

    // The microphone was handed out already; the next start finds none
    let result = controller.start_session(None).await;
    assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_completed_sales_become_sequential_orders() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let controller = controller(&mut harness, Arc::clone(&sink));
    let mut events = controller.subscribe();

    let handle = controller.start_session(None).await?;

    harness.engine_says(sale_call("c1", "Ana", 2)).await;
    let first = next_order(&mut events).await;

    // Incomplete: rejected before it reaches the router
    harness
        .engine_says(json!({
            "toolCall": {
                "functionCalls": [{
                    "id": "c2",
                    "name": "register_sale",
                    "args": { "client_name": "Luis", "items": [], "payment_method": "Cash" }
                }]
            }
        }))
        .await;

    harness.engine_says(sale_call("c3", "Marta", 1)).await;
    let second = next_order(&mut events).await;

    assert_eq!(first.order_number, "101");
    assert_eq!(first.client_name, "Ana");
    assert_eq!(first.total, 50.0);
    assert_eq!(second.order_number, "102");
    assert_eq!(second.client_name, "Marta");

    let stored: Vec<String> = sink
        .orders
        .lock()
        .unwrap()
        .iter()
        .map(|order| order.order_number.clone())
        .collect();
    assert_eq!(stored, vec!["101".to_string(), "102".to_string()]);

    eventually("three tool responses", || harness.responses().len() == 3).await;
    let answered: Vec<_> = harness
        .responses()
        .into_iter()
        .map(|response| response.response.get("result").is_some())
        .collect();
    assert_eq!(answered, vec![true, false, true]);

    controller.stop_session(handle.id()).await;
    Ok(())
}

#[tokio::test]
async fn test_sink_failure_does_not_stop_the_session() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..RecordingSink::default()
    });
    let controller = controller(&mut harness, Arc::clone(&sink));
    let mut events = controller.subscribe();

    let handle = controller.start_session(None).await?;
    harness.engine_says(sale_call("c1", "Ana", 1)).await;
    next_order(&mut events).await;

    assert_eq!(sink.orders.lock().unwrap().len(), 1);
    assert_eq!(
        controller
            .session_stats(handle.id())
            .await
            .map(|stats| stats.state),
        Some(SessionState::Open)
    );

    controller.stop_session(handle.id()).await;
    Ok(())
}

#[tokio::test]
async fn test_transcript_accumulates_per_session() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let controller = controller(&mut harness, Arc::new(RecordingSink::default()));

    let handle = controller.start_session(None).await?;
    harness
        .engine_says(json!({ "serverContent": { "inputTranscription": { "text": "hello" } } }))
        .await;
    harness
        .engine_says(json!({ "serverContent": { "outputTranscription": { "text": "hi boss" } } }))
        .await;

    let id = handle.id();
    let mut transcript = Vec::new();
    for _ in 0..400 {
        transcript = controller.transcript(id).await.unwrap_or_default();
        if transcript.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let texts: Vec<&str> = transcript.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "hi boss"]);

    controller.stop_session(id).await;
    assert!(controller.transcript(id).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_stats_track_frames_for_registered_session() -> Result<()> {
    let mut harness = Harness::new(ConnectBehavior::Accept);
    let controller = controller(&mut harness, Arc::new(RecordingSink::default()));

    let handle = controller.start_session(None).await?;
    harness.input.push(vec![0.1; 320]).await;
    eventually("two frames sent", || harness.sent().len() == 2).await;

    let stats = controller
        .session_stats(handle.id())
        .await
        .expect("registered");
    assert_eq!(stats.session_id, handle.id());
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(controller.active_sessions().await.len(), 1);

    let stopped = controller.stop_all().await;
    assert_eq!(stopped.len(), 1);
    assert!(controller.active_sessions().await.is_empty());
    Ok(())
}
