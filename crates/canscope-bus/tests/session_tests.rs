//! BusSession integration tests against the virtual driver

mod common;

use std::time::Duration;

use canscope_bus::driver::ErrorFrameKind;
use canscope_bus::{BusSession, DriverError, Features, Frame, PeriodicItem, SessionError};
use canscope_core::{Direction, ErrorCounters, ProtocolMode};
use common::Harness;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};

fn frame(id: u32) -> Frame {
    Frame::classic(id, &[0x11, 0x22], false).unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_open_rejects_blank_endpoint() {
    let h = Harness::new();
    let mut config = h.config();
    config.endpoint = "  ".to_string();

    let result = BusSession::open(&h.driver, config, h.observers.clone()).await;
    assert!(matches!(result, Err(SessionError::Config(_))));
    assert_eq!(h.bus.open_count(), 0);
}

#[tokio::test]
async fn test_open_rejects_unsupported_features_before_io() {
    let h = Harness::with_capabilities(Features::CLASSIC);
    let mut config = h.config();
    config.listen_only = true;

    let err = BusSession::open(&h.driver, config, h.observers.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Config(ref msg) if msg.contains("LISTEN_ONLY")));
    assert_eq!(h.bus.open_count(), 0);

    let mut config = h.config();
    config.mode = ProtocolMode::Fd;
    let result = BusSession::open(&h.driver, config, h.observers.clone()).await;
    assert!(matches!(result, Err(SessionError::Config(_))));
}

#[tokio::test]
async fn test_open_announces_listening() {
    let h = Harness::new();
    let session = h.open(h.config()).await;

    assert!(session.is_open());
    assert_eq!(
        h.recorder.messages(),
        vec!["[info] Listening on 'virtual://bench' @ 500000 bps, mode=CAN 2.0...".to_string()]
    );
}

#[tokio::test]
async fn test_stream_yields_frames_and_notifies_observers() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    let stream = assert_ok!(session.stream_frames());
    futures::pin_mut!(stream);

    h.bus.inject(frame(0x100), Some(Duration::from_millis(7)));
    h.bus.inject(frame(0x200), None);

    let first = stream.next().await.unwrap();
    let second = stream.next().await.unwrap();
    assert_eq!(first.frame.id(), 0x100);
    assert_eq!(first.timestamp, Some(Duration::from_millis(7)));
    assert_eq!(second.frame.id(), 0x200);
    assert_eq!(h.recorder.frames().len(), 2);

    session.stop();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_cancel_before_any_frame() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    let stream = session.stream_frames().unwrap();

    session.stop();
    let frames: Vec<_> = stream.collect().await;

    assert!(frames.is_empty());
    assert_eq!(h.recorder.count_message("[info] Listener stopped."), 1);
    assert_eq!(h.bus.close_count(), 1);
    assert!(!session.is_open());

    drop(session);
    assert_eq!(h.recorder.count_message("[info] Listener stopped."), 1);
    assert_eq!(h.bus.close_count(), 1);
}

#[tokio::test]
async fn test_stream_can_only_be_taken_once() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    let _stream = session.stream_frames().unwrap();
    assert!(matches!(
        session.stream_frames().err(),
        Some(SessionError::StreamTaken)
    ));
}

#[tokio::test]
async fn test_stream_refused_after_stop_is_not_taken() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    session.stop();

    for _ in 0..2 {
        assert!(matches!(
            session.stream_frames().err(),
            Some(SessionError::NotOpen)
        ));
    }
    assert!(matches!(session.run().await, Err(SessionError::NotOpen)));
    assert_eq!(h.bus.close_count(), 1);
}

#[tokio::test]
async fn test_dropping_unpolled_stream_releases_handle() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    let stream = session.stream_frames().unwrap();
    drop(stream);

    assert_eq!(h.bus.close_count(), 1);
    assert!(!session.is_open());
}

#[tokio::test]
async fn test_bus_close_ends_run_with_error() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    h.bus.inject(frame(0x1), None);
    h.bus.close_bus();

    let err = assert_err!(session.run().await);
    assert!(matches!(err, SessionError::BusClosed(_)));
    assert_eq!(h.recorder.frames().len(), 1);
    assert_eq!(h.recorder.count_message("[info] Listener stopped."), 1);
    assert_eq!(h.bus.close_count(), 1);
}

#[tokio::test]
async fn test_fatal_receive_error_terminates_stream() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    h.bus.inject_receive_error(DriverError::Closed);

    assert!(matches!(session.run().await, Err(SessionError::BusClosed(_))));
    assert!(!session.is_open());
}

#[tokio::test]
async fn test_receive_fault_is_reported_and_stream_continues() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    let stream = session.stream_frames().unwrap();
    futures::pin_mut!(stream);

    h.bus
        .inject_receive_error(DriverError::ReceiveFailed("overrun".to_string()));
    h.bus.inject(frame(0x42), None);

    let next = stream.next().await.unwrap();
    assert_eq!(next.frame.id(), 0x42);
    assert!(h
        .recorder
        .messages()
        .contains(&"[exception] Receive failed: overrun".to_string()));
}

#[tokio::test]
async fn test_run_returns_ok_when_stopped() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    let token = session.cancel_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    assert_ok!(session.run().await);
}

#[tokio::test]
async fn test_transmit_echoes_outbound_frame() {
    let h = Harness::new();
    let session = h.open(h.config()).await;

    assert_eq!(session.transmit(&frame(0x321)), 1);
    let echoed = h.recorder.frames();
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed[0].direction, Direction::Outbound);
    assert_eq!(echoed[0].frame.id(), 0x321);
    assert_eq!(h.bus.transmitted(), vec![frame(0x321)]);
}

#[tokio::test]
async fn test_rejected_transmit_returns_zero() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    h.bus.reject_transmit(true);

    assert_eq!(session.transmit(&frame(0x10)), 0);
    // Attempted transmits are still mirrored.
    assert_eq!(h.recorder.frames().len(), 1);
}

#[tokio::test]
async fn test_commands_after_stop() {
    let h = Harness::new();
    let session = h.open(h.config()).await;
    session.stop();

    assert_eq!(session.transmit(&frame(0x10)), 0);
    let items = [PeriodicItem::new(frame(0x10), Duration::from_millis(10))];
    assert!(matches!(
        session.start_periodic(&items),
        Err(SessionError::NotOpen)
    ));
    assert!(h.bus.transmitted().is_empty());
    assert_eq!(h.bus.close_count(), 1);
}

#[tokio::test]
async fn test_error_frame_uses_inline_counters() {
    let h = Harness::new();
    let mut config = h.config();
    config.features = Features::ERROR_FRAME | Features::ERROR_COUNTERS;
    let _session = h.open(config).await;

    h.bus
        .inject_error_frame(ErrorFrameKind::ErrorPassive, Some(ErrorCounters { tx: 128, rx: 3 }));
    settle().await;

    assert_eq!(
        h.recorder.counters.lock().clone(),
        vec![ErrorCounters { tx: 128, rx: 3 }]
    );
    assert_eq!(h.bus.counter_queries(), 0);
    let messages = h.recorder.messages();
    let last = messages.last().unwrap();
    assert!(last.starts_with("[error] ErrorPassive @"), "{}", last);
}

#[tokio::test]
async fn test_error_frame_queries_counters_when_absent() {
    let h = Harness::new();
    let mut config = h.config();
    config.features = Features::ERROR_FRAME | Features::ERROR_COUNTERS;
    let _session = h.open(config).await;
    h.bus.set_counters(ErrorCounters { tx: 9, rx: 96 });

    h.bus.inject_error_frame(ErrorFrameKind::BusOff, None);
    settle().await;

    assert_eq!(h.bus.counter_queries(), 1);
    assert_eq!(
        h.recorder.counters.lock().clone(),
        vec![ErrorCounters { tx: 9, rx: 96 }]
    );
}

#[tokio::test]
async fn test_error_frames_ignored_without_feature() {
    let h = Harness::new();
    let _session = h.open(h.config()).await;

    h.bus.inject_error_frame(ErrorFrameKind::NoAck, None);
    settle().await;

    assert!(h.recorder.counters.lock().is_empty());
    assert!(!h.recorder.messages().iter().any(|m| m.starts_with("[error]")));
}

#[tokio::test]
async fn test_background_fault_reported_without_ending_session() {
    let h = Harness::new();
    let session = h.open(h.config()).await;

    h.bus.inject_fault("usb transfer stalled");
    settle().await;

    assert!(h
        .recorder
        .messages()
        .contains(&"[exception] usb transfer stalled".to_string()));
    assert!(session.is_open());
}
