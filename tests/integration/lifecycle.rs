use crate::*;

use bytes::Bytes;
use cloudhub_session::TerminateCode;

/// Ack messages go out one at a time; the hub forwards the edge's ack and
/// the next message follows.
#[tokio::test]
async fn test_ack_forwarded_through_hub_releases_next_message() {
    let hub = hub(10);
    let mut conn = connect(&hub, "edge-1", options());
    let pool = conn.session.message_pool();

    let first = pool.enqueue_ack("config/update", Bytes::from_static(b"v1")).unwrap();
    let second = pool.enqueue_ack("config/update", Bytes::from_static(b"v2")).unwrap();

    let got = conn.inbox.recv().await.unwrap();
    assert_eq!(got.id, first);
    assert_eq!(got.payload, Bytes::from_static(b"v1"));

    settle().await;
    assert!(conn.inbox.try_recv().is_err(), "second message sent before ack");

    hub.receive_message_ack("edge-1", first).unwrap();
    let got = conn.inbox.recv().await.unwrap();
    assert_eq!(got.id, second);
}

#[tokio::test]
async fn test_no_ack_messages_stream_without_waiting() {
    let hub = hub(10);
    let mut conn = connect(&hub, "edge-1", options());
    let pool = conn.session.message_pool();

    for i in 0..3u8 {
        pool.enqueue_no_ack("telemetry", Bytes::from(vec![i])).unwrap();
    }
    for i in 0..3u8 {
        let got = conn.inbox.recv().await.unwrap();
        assert_eq!(got.payload, Bytes::from(vec![i]));
    }
    assert_eq!(pool.pending_acks(), 0);
}

/// Unacked message: sent once plus `ack_max_retries` resends, then dropped.
/// The session itself stays up.
#[tokio::test(start_paused = true)]
async fn test_unacked_message_is_resent_then_dropped() {
    let hub = hub(10);
    let mut conn = connect(&hub, "edge-1", options());
    let pool = conn.session.message_pool();

    let id = pool.enqueue_ack("cmd/reboot", Bytes::new()).unwrap();
    for _ in 0..3 {
        assert_eq!(conn.inbox.recv().await.unwrap().id, id);
    }

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(conn.inbox.try_recv().is_err());
    assert_eq!(pool.pending_acks(), 0);
    assert!(!conn.session.is_terminated());
    assert_eq!(hub.node_number(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_via_hub_keeps_session_alive() {
    let hub = hub(10);
    let conn = connect(&hub, "edge-1", options());

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        hub.keepalive_message("edge-1").unwrap();
    }
    settle().await;
    assert!(!conn.session.is_terminated());

    // silence past the window: the session ends and the transport unregisters it
    assert!(conn.task.await.unwrap());
    assert_eq!(conn.session.terminate_code(), TerminateCode::KeepaliveTimeout);
    assert_eq!(hub.node_number(), 0);
    assert!(hub.keepalive_message("edge-1").is_err());
}

#[tokio::test]
async fn test_send_failure_closes_and_unregisters() {
    let hub = hub(10);
    let conn = connect(&hub, "edge-1", options());

    conn.edge.break_link();
    conn.session
        .message_pool()
        .enqueue_no_ack("telemetry", Bytes::from_static(b"x"))
        .unwrap();

    assert!(conn.task.await.unwrap());
    assert_eq!(conn.session.terminate_code(), TerminateCode::SendFailed);
    assert_eq!(conn.edge.closes(), 1);
    assert!(hub.get_session("edge-1").is_none());
}

#[tokio::test]
async fn test_shutdown_terminates_every_session() {
    let hub = hub(10);
    let conns: Vec<_> = (0..5)
        .map(|i| connect(&hub, &format!("edge-{i}"), options()))
        .collect();

    assert_eq!(hub.terminate_all(TerminateCode::Shutdown), 5);
    for conn in conns {
        // already removed by the hub, so the transport finds nothing to delete
        assert!(!conn.task.await.unwrap());
        assert_eq!(conn.session.terminate_code(), TerminateCode::Shutdown);
    }
    assert_eq!(hub.node_number(), 0);
}
