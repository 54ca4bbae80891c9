use crate::*;

use cloudhub_session::{SessionError, TerminateCode};

/// A reconnect while the old connection is still up: the new session wins,
/// the old one is closed, and its late teardown leaves the new entry alone.
#[tokio::test]
async fn test_reconnect_supersedes_old_connection() {
    let hub = hub(10);
    let old = connect(&hub, "edge-1", options());
    let new = connect(&hub, "edge-1", options());

    assert!(old.session.is_terminated());
    assert_eq!(old.session.terminate_code(), TerminateCode::Superseded);
    assert_eq!(old.edge.closes(), 1);

    // old transport task wakes up and tries to unregister
    assert!(!old.task.await.unwrap());

    let current = hub.get_session("edge-1").unwrap();
    assert!(std::ptr::addr_eq(Arc::as_ptr(&current), Arc::as_ptr(&new.session)));
    assert_eq!(hub.node_number(), 1);
    assert!(!new.session.is_terminated());
}

/// Limit 2: a and b fill it, c is still accepted, deleting b leaves us at it.
#[tokio::test]
async fn test_node_limit_is_advisory() {
    let hub = hub(2);
    let _a = connect(&hub, "a", options());
    let b = connect(&hub, "b", options());
    assert!(hub.reach_limit());

    let _c = connect(&hub, "c", options());
    assert_eq!(hub.node_number(), 3);

    b.session.terminate();
    assert!(b.task.await.unwrap());
    assert_eq!(hub.node_number(), 2);
    assert!(hub.reach_limit());
}

/// The accept path that needs a hard cap uses `try_add_session`.
#[tokio::test]
async fn test_hard_cap_rejects_new_nodes_only() {
    let hub = hub(1);
    let (edge, _inbox) = EdgeEnd::new();
    let first = ChannelSession::new("a", CLOUD_ID, edge.clone(), options());
    let second = ChannelSession::new("b", CLOUD_ID, edge.clone(), options());
    let again = ChannelSession::new("a", CLOUD_ID, edge, options());

    hub.try_add_session(first.clone()).unwrap();
    assert_eq!(
        hub.try_add_session(second.clone()),
        Err(SessionError::LimitReached { limit: 1 })
    );
    assert!(!second.is_terminated());

    // same node reconnecting needs no new slot
    hub.try_add_session(again).unwrap();
    assert!(first.is_terminated());
    assert_eq!(hub.node_number(), 1);
}

#[tokio::test]
async fn test_events_for_unknown_node_are_not_found() {
    let hub = hub(10);
    assert_eq!(
        hub.keepalive_message("ghost"),
        Err(SessionError::NotFound("ghost".to_string()))
    );
    assert_eq!(
        hub.receive_message_ack("ghost", cloudhub_session::MessageId(1)),
        Err(SessionError::NotFound("ghost".to_string()))
    );
    assert_eq!(hub.is_node_connect_self("ghost"), (String::new(), false));
}

/// Many transports connecting, reconnecting and dropping at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_churn_keeps_count_consistent() {
    let hub = hub(1000);

    let mut workers = Vec::new();
    for w in 0..8 {
        let hub = hub.clone();
        workers.push(tokio::spawn(async move {
            let mut conns = Vec::new();
            for i in 0..50 {
                // overlapping node ids across workers force supersedes
                let node_id = format!("edge-{}", (w * 50 + i) % 120);
                let conn = connect(&hub, &node_id, options());
                if i % 3 == 0 {
                    conn.session.terminate();
                }
                conns.push((conn.session, conn.task));
            }
            conns
        }));
    }

    let mut conns = Vec::new();
    for worker in workers {
        conns.extend(worker.await.unwrap());
    }

    // wait for every closed session to be unregistered
    let mut live = Vec::new();
    for (session, task) in conns {
        if session.is_terminated() {
            task.await.unwrap();
        } else {
            live.push(task);
        }
    }

    assert_eq!(hub.node_number(), hub.len());
    assert_eq!(hub.len(), live.len());
    assert!(hub.len() <= 120);

    hub.terminate_all(TerminateCode::Shutdown);
    for task in live {
        task.await.unwrap();
    }
    assert_eq!(hub.node_number(), 0);
    assert!(hub.is_empty());
}
