// Integration tests for the capture streamer
//
// These tests drive the streamer directly with an input event queue and
// inspect the frames it hands to the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use voice_pos::audio::{codec, CaptureEvent, CaptureStreamer, InputEvent};

async fn next_event(events: &mut mpsc::Receiver<CaptureEvent>) -> CaptureEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no capture event within 2s")
        .expect("capture queue closed")
}

#[tokio::test]
async fn test_chunks_queued_before_start_are_discarded() -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (events_tx, mut events) = mpsc::channel(16);

    // Captured before the session opened
    input_tx.send(InputEvent::Samples(vec![0.9; 8])).await?;

    let mut streamer =
        CaptureStreamer::start(input_rx, events_tx, 4, 16000, Arc::new(AtomicU64::new(0)));

    input_tx.send(InputEvent::Samples(vec![0.25; 4])).await?;

    match next_event(&mut events).await {
        CaptureEvent::Frame { sequence, packet } => {
            assert_eq!(sequence, 0);
            assert_eq!(codec::decode_packet(&packet.data)?, vec![0.25; 4]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    streamer.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_frames_are_numbered_in_capture_order() -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (events_tx, mut events) = mpsc::channel(16);
    let mut streamer =
        CaptureStreamer::start(input_rx, events_tx, 4, 16000, Arc::new(AtomicU64::new(0)));

    // Ten samples: two full frames and a remainder
    input_tx.send(InputEvent::Samples(vec![0.5; 10])).await?;

    for expected in 0..2 {
        match next_event(&mut events).await {
            CaptureEvent::Frame { sequence, packet } => {
                assert_eq!(sequence, expected);
                assert_eq!(packet.mime_type, "audio/pcm;rate=16000");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(events.try_recv().is_err());

    streamer.stop().await;
    assert!(!streamer.is_running());
    Ok(())
}

#[tokio::test]
async fn test_full_session_queue_drops_frames() -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (events_tx, mut events) = mpsc::channel(1);
    let dropped = Arc::new(AtomicU64::new(0));
    let mut streamer =
        CaptureStreamer::start(input_rx, events_tx, 2, 16000, Arc::clone(&dropped));

    // Three frames into a queue that holds one
    input_tx.send(InputEvent::Samples(vec![0.1; 6])).await?;

    tokio::time::timeout(Duration::from_secs(2), async {
        while dropped.load(Ordering::Relaxed) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    assert!(matches!(
        next_event(&mut events).await,
        CaptureEvent::Frame { sequence: 0, .. }
    ));
    assert_eq!(streamer.frames_dropped(), 2);

    streamer.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_device_failure_is_forwarded() -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (events_tx, mut events) = mpsc::channel(16);
    let _streamer =
        CaptureStreamer::start(input_rx, events_tx, 4, 16000, Arc::new(AtomicU64::new(0)));

    input_tx
        .send(InputEvent::Failed("stream error".to_string()))
        .await?;

    assert_eq!(
        next_event(&mut events).await,
        CaptureEvent::Failed("stream error".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_no_frames_after_stop() -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (events_tx, mut events) = mpsc::channel(16);
    let mut streamer =
        CaptureStreamer::start(input_rx, events_tx, 4, 16000, Arc::new(AtomicU64::new(0)));

    streamer.stop().await;

    // The pump dropped its end of the input
    assert!(input_tx.send(InputEvent::Samples(vec![0.5; 4])).await.is_err());
    assert!(events.recv().await.is_none());
    Ok(())
}
