use super::*;
use crate::test_utils::{SimulatedConnector, sample_frame};
use crate::transport::{BackoffConfig, Endpoint};
use futures::StreamExt;
use std::time::Duration;

fn test_config() -> BridgeConfig {
    BridgeConfig {
        endpoint: Endpoint::tcp("sim", 1),
        reconnect_backoff: BackoffConfig { min_ms: 100, max_ms: 1_000, jitter: 0.0 },
        max_reconnect_attempts: 5,
        housekeeping_interval_ms: 100,
        ..BridgeConfig::default()
    }
}

async fn wait_for_state(bridge: &Bridge, wanted: ConnectionState) {
    let mut states = bridge.state_updates();
    let reached = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(state) = states.next().await {
            if state == wanted {
                return;
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "never reached {wanted}, stuck in {}", bridge.connection_state());
}

fn drain(transitions: &mut broadcast::Receiver<StateTransition>) -> Vec<ConnectionState> {
    std::iter::from_fn(|| transitions.try_recv().ok()).map(|t| t.to).collect()
}

#[tokio::test(start_paused = true)]
async fn duplicate_sequences_are_rejected() {
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(test_config(), connector).await.unwrap();
    let mut subscription = bridge.subscribe_device(DeviceId(1)).unwrap();

    let link = links.next().await.unwrap();
    let frames = [sample_frame(1, 1), sample_frame(1, 2), sample_frame(1, 2), sample_frame(1, 4)];
    link.send_frames(&frames);

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(subscription.recv().await.unwrap().frame.sequence);
    }
    assert_eq!(delivered, vec![1, 2, 4]);
    assert!(subscription.try_recv().is_err());

    assert_eq!(bridge.latest(DeviceId(1)).unwrap().sequence, 4);
    let status = bridge.status();
    assert_eq!(status.frames_decoded, 4);
    assert_eq!(status.frames_rejected, 1);
    assert_eq!(status.devices, vec![DeviceId(1)]);
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert!(status.bytes_received > 0);

    bridge.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silence_marks_frames_stale_and_link_degraded() {
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(test_config(), connector).await.unwrap();
    let mut subscription = bridge.subscribe_device(DeviceId(3)).unwrap();

    let link = links.next().await.unwrap();
    link.send_frames([&sample_frame(3, 1)]);
    subscription.recv().await.unwrap();
    assert!(bridge.latest(DeviceId(3)).is_ok());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(bridge.connection_state(), ConnectionState::Degraded);
    assert!(matches!(bridge.latest(DeviceId(3)), Err(NotAvailable::Stale { .. })));
    assert!(matches!(bridge.latest(DeviceId(9)), Err(NotAvailable::NeverReceived { .. })));
    assert!(bridge.status().last_frame_age().unwrap() >= Duration::from_millis(250));

    link.send_frames([&sample_frame(3, 2)]);
    subscription.recv().await.unwrap();
    assert_eq!(bridge.connection_state(), ConnectionState::Connected);
    assert_eq!(bridge.latest(DeviceId(3)).unwrap().sequence, 2);
}

#[tokio::test(start_paused = true)]
async fn undecodable_bytes_do_not_keep_link_healthy() {
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(test_config(), connector).await.unwrap();
    let mut subscription = bridge.subscribe_device(DeviceId(6)).unwrap();

    let link = links.next().await.unwrap();
    link.send_frames([&sample_frame(6, 1)]);
    subscription.recv().await.unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        link.send(b"\x00\x01\x02\x03");
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(bridge.connection_state(), ConnectionState::Degraded);
    assert!(matches!(bridge.latest(DeviceId(6)), Err(NotAvailable::Stale { .. })));
    let status = bridge.status();
    assert_eq!(status.frames_decoded, 1);
    assert_eq!(status.decode_errors, 10);

    link.send_frames([&sample_frame(6, 2)]);
    subscription.recv().await.unwrap();
    assert_eq!(bridge.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn lost_link_reconnects_with_growing_delays() {
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(test_config(), connector.clone()).await.unwrap();
    let mut transitions = bridge.transitions();

    let first = links.next().await.unwrap();
    connector.refuse_next(2);
    first.reset();

    let _second = links.next().await.unwrap();
    wait_for_state(&bridge, ConnectionState::Connected).await;

    use ConnectionState::*;
    assert_eq!(
        drain(&mut transitions),
        vec![
            Connecting,
            Connected,
            Disconnected,
            Connecting,
            Disconnected,
            Connecting,
            Disconnected,
            Connecting,
            Connected
        ]
    );

    let attempts = connector.connect_attempts();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<Duration> = attempts.windows(2).skip(1).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 2);
    for (gap, expected) in gaps.iter().zip([200, 400]) {
        let expected = Duration::from_millis(expected);
        assert!(*gap >= expected && *gap < expected + Duration::from_millis(5), "gap {gap:?}");
    }
    assert_eq!(bridge.status().reconnect_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn new_connection_accepts_restarted_sequence() {
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(test_config(), connector).await.unwrap();
    let mut subscription = bridge.subscribe_device(DeviceId(1)).unwrap();

    let first = links.next().await.unwrap();
    first.send_frames([&sample_frame(1, 50)]);
    subscription.recv().await.unwrap();

    bridge.restart();
    let second = links.next().await.unwrap();
    second.send_frames([&sample_frame(1, 1)]);

    assert_eq!(subscription.recv().await.unwrap().frame.sequence, 1);
    assert_eq!(bridge.latest(DeviceId(1)).unwrap().sequence, 1);
    assert_eq!(bridge.status().frames_rejected, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_subscriber_does_not_hold_up_others() {
    let config = BridgeConfig { max_subscriber_queue_depth: 4, ..test_config() };
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(config, connector).await.unwrap();
    let slow = bridge.subscribe_device(DeviceId(2)).unwrap();
    let mut fast = bridge.subscribe_device(DeviceId(2)).unwrap();

    let link = links.next().await.unwrap();
    for sequence in 1..=10 {
        link.send_frames([&sample_frame(2, sequence)]);
        assert_eq!(fast.recv().await.unwrap().frame.sequence, sequence);
    }

    assert_eq!(fast.dropped(), 0);
    assert_eq!(slow.pending(), 4);
    assert_eq!(slow.dropped(), 6);
    assert_eq!(bridge.status().deliveries_dropped, 6);
    assert_eq!(bridge.status().subscribers, 2);
}

#[tokio::test(start_paused = true)]
async fn corrupt_input_is_counted_and_skipped() {
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(test_config(), connector).await.unwrap();
    let mut subscription = bridge.subscribe_device(DeviceId(5)).unwrap();

    let link = links.next().await.unwrap();
    link.send(b"\x00\x01\x02\x03");
    link.send_frames([&sample_frame(5, 1)]);

    assert_eq!(subscription.recv().await.unwrap().frame.sequence, 1);
    let status = bridge.status();
    assert_eq!(status.decode_errors, 1);
    assert_eq!(status.frames_decoded, 1);
}

#[tokio::test(start_paused = true)]
async fn ceiling_fails_until_restart() {
    let (connector, mut links) = SimulatedConnector::new();
    connector.refuse_next(u32::MAX);
    let config = BridgeConfig { max_reconnect_attempts: 3, ..test_config() };
    let bridge = Bridge::start_with_connector(config, connector.clone()).await.unwrap();

    wait_for_state(&bridge, ConnectionState::Failed).await;
    assert_eq!(connector.connect_attempts().len(), 3);
    assert_eq!(bridge.status().reconnect_attempts, 2);

    // Stays failed
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(bridge.connection_state(), ConnectionState::Failed);
    assert_eq!(connector.connect_attempts().len(), 3);

    connector.refuse_next(0);
    bridge.restart();
    let _link = links.next().await.unwrap();
    wait_for_state(&bridge, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn offline_subjects_close_after_grace_period() {
    let config = BridgeConfig { subject_grace_period_ms: 500, ..test_config() };
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(config, connector.clone()).await.unwrap();
    let mut subscription = bridge.subscribe_device(DeviceId(4)).unwrap();

    let link = links.next().await.unwrap();
    link.send_frames([&sample_frame(4, 1)]);
    subscription.recv().await.unwrap();

    connector.refuse_next(u32::MAX);
    link.close();

    assert!(subscription.recv().await.is_none());
    assert!(subscription.is_closed());
    assert_eq!(bridge.status().subjects, 0);
}

#[tokio::test(start_paused = true)]
async fn reconnecting_within_grace_period_keeps_subjects() {
    let config = BridgeConfig { subject_grace_period_ms: 500, ..test_config() };
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(config, connector).await.unwrap();
    let mut subscription = bridge.subscribe_device(DeviceId(4)).unwrap();

    let link = links.next().await.unwrap();
    link.send_frames([&sample_frame(4, 1)]);
    subscription.recv().await.unwrap();

    link.close();
    let _second = links.next().await.unwrap();
    wait_for_state(&bridge, ConnectionState::Connected).await;

    // Well past the grace period, with no new frame
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!subscription.is_closed());
    assert_eq!(bridge.status().subjects, 1);
}

#[tokio::test]
async fn invalid_config_is_fatal_at_start() {
    let config = BridgeConfig { stale_frame_timeout_ms: 0, ..BridgeConfig::default() };
    match Bridge::start(config).await {
        Err(BridgeError::Configuration { field, .. }) => {
            assert_eq!(field, "stale_frame_timeout_ms")
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("started with an invalid config"),
    }
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_closes_subscriptions() {
    let (connector, mut links) = SimulatedConnector::new();
    let bridge = Bridge::start_with_connector(test_config(), connector).await.unwrap();
    let mut subscription = bridge.subscribe("camera/1").unwrap();
    let _link = links.next().await.unwrap();

    bridge.stop().await;
    bridge.stop().await;

    assert!(bridge.is_stopped());
    assert!(subscription.recv().await.is_none());
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(bridge.subscribe("camera/1"), Err(BridgeError::Stopped)));
}
