//! Boundary scenarios from `spec.md` §8, run against the in-process
//! scripted mock adapter.

use std::time::Duration;

use relay_core::{RelayError, RelayStream};
use relay_test_support::{Event, ScriptedAdapter, ScriptedChannel};
use tokio_util::sync::CancellationToken;

fn min_buf() -> Vec<u8> {
    vec![0u8; RelayStream::<ScriptedAdapter>::min_read_size()]
}

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn scenario_1_first_read_opens_connection() {
    let channel = ScriptedChannel::new(vec![Event::connect_success_sid(b"sid0")]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);
    let mut buf = min_buf();

    let result = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf, &cancel())).await;
    assert!(result.is_err(), "read should still be pending on an idle transport");
    assert_eq!(stream.connect_count().await, 1);
}

#[tokio::test]
async fn scenario_2_buffer_too_small() {
    let adapter = ScriptedAdapter::new(vec![]);
    let stream = RelayStream::new(adapter);
    let mut buf = vec![0u8; RelayStream::<ScriptedAdapter>::min_read_size() - 1];

    let err = stream.read(&mut buf, &cancel()).await.unwrap_err();
    assert!(matches!(err, RelayError::BufferTooSmall { .. }));
    assert_eq!(stream.connect_count().await, 0);
}

#[tokio::test]
async fn scenario_3_truncated_message() {
    let channel = ScriptedChannel::new(vec![Event::Message(vec![0x00])]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);
    let mut buf = min_buf();

    let err = stream.read(&mut buf, &cancel()).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidServerResponse(_)));
}

#[tokio::test]
async fn scenario_4_unrecognized_tag_at_start() {
    for tag in [
        relay_protocol::TAG_UNUSED,
        relay_protocol::TAG_DEPRECATED,
        relay_protocol::TAG_ACK_LATENCY,
        relay_protocol::TAG_REPLY_LATENCY,
        relay_protocol::TAG_ACK + 1,
    ] {
        let channel = ScriptedChannel::new(vec![Event::raw_tag(tag)]);
        let adapter = ScriptedAdapter::new(vec![channel]);
        let stream = RelayStream::new(adapter);
        let mut buf = min_buf();

        let err = stream.read(&mut buf, &cancel()).await.unwrap_err();
        assert!(
            matches!(err, RelayError::InvalidServerResponse(_)),
            "tag {tag} should be fatal before the session is established"
        );
    }
}

#[tokio::test]
async fn scenario_5_unrecognized_tag_after_session_established() {
    let channel = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::raw_tag(relay_protocol::TAG_ACK_LATENCY),
        Event::data(vec![0xA, 0xB]),
    ]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);
    let mut buf = min_buf();

    let n = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf[..2], &[0xA, 0xB]);
}

#[tokio::test]
async fn scenario_6_ack_trimming() {
    let channel = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::ack(4),
        Event::ack(12),
    ]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);

    for _ in 0..3 {
        stream.write(&[0u8; 4], &cancel()).await.unwrap();
    }

    let mut buf = min_buf();
    let result = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf, &cancel())).await;
    assert!(result.is_err(), "no DATA was ever sent, so the read stays pending");

    assert_eq!(stream.unacknowledged_message_count().await, 0);
    assert_eq!(stream.expected_ack().await, 0);
}

#[tokio::test]
async fn scenario_7_zero_ack_is_invalid() {
    let channel = ScriptedChannel::new(vec![Event::connect_success_sid(b"sid0"), Event::ack(0)]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);

    stream.write(&[0u8; 4], &cancel()).await.unwrap();
    let mut buf = min_buf();
    let err = stream.read(&mut buf, &cancel()).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidServerResponse(_)));
}

#[tokio::test]
async fn scenario_8_mismatched_ack_exceeds_sent() {
    let channel = ScriptedChannel::new(vec![Event::connect_success_sid(b"sid0"), Event::ack(10)]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);

    stream.write(&[0u8; 4], &cancel()).await.unwrap();
    let mut buf = min_buf();
    let err = stream.read(&mut buf, &cancel()).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidServerResponse(_)));
}

#[tokio::test]
async fn scenario_9_graceful_close() {
    let channel = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::data(vec![0x01]),
        Event::closed(relay_core::close_codes::NORMAL_CLOSURE, "bye"),
    ]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);
    let mut buf = min_buf();

    let first = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(first, 1);
    let second = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(second, 0);
}

#[tokio::test]
async fn scenario_10_recoverable_close_with_nothing_sent_or_received_is_a_fresh_connect() {
    let first = ScriptedChannel::new(vec![Event::closed(
        relay_core::close_codes::PROTOCOL_ERROR,
        "boom",
    )]);
    let second = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::data(vec![1, 2]),
    ]);
    let adapter = ScriptedAdapter::new(vec![first, second]);
    let stream = RelayStream::new(adapter);
    let mut buf = min_buf();

    let n = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(stream.connect_count().await, 2);
    assert_eq!(stream.reconnect_count().await, 0);
}

#[tokio::test]
async fn scenario_11_recoverable_close_after_data_triggers_reconnect() {
    let first = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::data(vec![1]),
        Event::closed(relay_core::close_codes::PROTOCOL_ERROR, "boom"),
    ]);
    let second = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::data(vec![1, 2]),
    ]);
    let adapter = ScriptedAdapter::new(vec![first, second]);
    let stream = RelayStream::new(adapter);
    let mut buf = min_buf();

    let n1 = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(n1, 1);
    let n2 = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(n2, 2);
    assert_eq!(stream.connect_count().await, 1);
    assert_eq!(stream.reconnect_count().await, 1);
}

#[tokio::test]
async fn scenario_12_recoverable_close_after_write_replays_backlog() {
    let first = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::data(vec![1]),
        Event::closed(relay_core::close_codes::ENDPOINT_UNAVAILABLE, "boom"),
    ]);
    let second = ScriptedChannel::new(vec![Event::reconnect_success_ack(0), Event::data(vec![1])]);
    let adapter = ScriptedAdapter::new(vec![first, second.clone()]);
    let stream = RelayStream::new(adapter);

    stream.write(&[9u8, 9, 9], &cancel()).await.unwrap();

    let mut buf = min_buf();
    let n1 = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(n1, 1);
    let n2 = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(n2, 1);
    assert_eq!(stream.reconnect_count().await, 1);

    let replayed = second.sent().await;
    assert_eq!(replayed.len(), 1);
    assert_eq!(
        relay_protocol::decode(&replayed[0]).unwrap(),
        relay_protocol::Message::Data(vec![9, 9, 9])
    );
}

#[tokio::test]
async fn scenario_13_unrecoverable_close_on_reconnect() {
    let first = ScriptedChannel::new(vec![
        Event::connect_success_sid(b"sid0"),
        Event::data(vec![1]),
        Event::closed(relay_core::close_codes::PROTOCOL_ERROR, "boom"),
    ]);
    let second = ScriptedChannel::new(vec![Event::closed(
        relay_core::close_codes::SID_UNKNOWN,
        "unknown session",
    )]);
    let adapter = ScriptedAdapter::new(vec![first, second]);
    let stream = RelayStream::new(adapter);
    let mut buf = min_buf();

    let n1 = stream.read(&mut buf, &cancel()).await.unwrap();
    assert_eq!(n1, 1);
    let err = stream.read(&mut buf, &cancel()).await.unwrap_err();
    assert!(matches!(err, RelayError::ServerClosedStream(_)));
}

#[tokio::test]
async fn scenario_14_post_close_read_fails() {
    let adapter = ScriptedAdapter::new(vec![]);
    let stream = RelayStream::new(adapter);
    stream.close(&cancel()).await.unwrap();

    let mut buf = min_buf();
    let err = stream.read(&mut buf, &cancel()).await.unwrap_err();
    assert!(matches!(err, RelayError::StreamClosed));
}

// -- invariants woven in -----------------------------------------------

#[tokio::test]
async fn invariant_acked_never_exceeds_sent_and_queue_tracks_outstanding_bytes() {
    let channel = ScriptedChannel::new(vec![Event::connect_success_sid(b"sid0"), Event::ack(4)]);
    let adapter = ScriptedAdapter::new(vec![channel]);
    let stream = RelayStream::new(adapter);

    stream.write(&[0u8; 4], &cancel()).await.unwrap();
    stream.write(&[0u8; 4], &cancel()).await.unwrap();
    assert_eq!(stream.unacknowledged_message_count().await, 2);
    assert_eq!(stream.expected_ack().await, 8);

    let mut buf = min_buf();
    let _ = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf, &cancel())).await;

    assert_eq!(stream.unacknowledged_message_count().await, 1);
    assert_eq!(stream.expected_ack().await, 4);
}
