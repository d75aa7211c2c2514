// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use datt_core::{Content, Hash, IdentityRecord, Message, PeerId};
use datt_store::MemoryStore;

use crate::config::{Config, HookError};
use crate::node::{Node, NodeError, SessionState};
use crate::test_utils::TestHub;
use crate::traits::{Transport, TransportEvent};

fn test_config() -> Config {
    Config {
        request_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

async fn spawn_node(hub: &TestHub, id: &str) -> Node {
    Node::spawn(test_config(), hub.create_transport(id), MemoryStore::new())
        .await
        .unwrap()
}

async fn wait_for_connection(node: &Node, peer: &PeerId) {
    for _ in 0..200 {
        if node.connected_peers().await.unwrap().contains(peer) {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("peer '{peer}' never connected");
}

/// Next raw frame delivered to a bare transport.
async fn next_frame(events: &mut mpsc::Receiver<TransportEvent>) -> Vec<u8> {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("event stream ended");
        if let TransportEvent::Data { bytes, .. } = event {
            return bytes;
        }
    }
}

/// Next frame that parses as a protocol message.
async fn next_message(events: &mut mpsc::Receiver<TransportEvent>) -> Message {
    loop {
        if let Ok(message) = Message::from_bytes(&next_frame(events).await) {
            return message;
        }
    }
}

#[tokio::test]
async fn session_reaches_active_state() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    assert_eq!(node.local_peer(), &PeerId::new("peer-a"));
    assert_eq!(node.state().await.unwrap(), SessionState::Active);
    assert!(node.connected_peers().await.unwrap().is_empty());
}

#[tokio::test]
async fn handshake_failure_rejects_initialization() {
    let hub = TestHub::new();
    let result = Node::spawn(
        test_config(),
        hub.create_failing_transport("peer-a"),
        MemoryStore::new(),
    )
    .await;

    assert!(matches!(result, Err(NodeError::Handshake(_))));
}

#[tokio::test]
async fn later_node_connects_to_listed_peers() {
    let hub = TestHub::new();
    let node_a = spawn_node(&hub, "peer-a").await;
    let node_b = spawn_node(&hub, "peer-b").await;

    // B found A in the peer list and dialed out; A registered the inbound connection.
    wait_for_connection(&node_a, node_b.local_peer()).await;
    wait_for_connection(&node_b, node_a.local_peer()).await;
}

#[tokio::test]
async fn resolves_remote_content_through_a_simulated_exchange() {
    let hub = TestHub::new();
    let node_a = spawn_node(&hub, "peer-a").await;
    let node_b = spawn_node(&hub, "peer-b").await;
    wait_for_connection(&node_a, node_b.local_peer()).await;

    node_b.sign_in("username", "password").await.unwrap();
    let hash = node_b.add_content_data("test data").await.unwrap();

    // A misses locally, broadcasts a content request and resolves on B's answer.
    let content = node_a.get_content(hash).await.unwrap();
    assert_eq!(content.data(), "test data");
    assert_eq!(content.hash(), hash);
    assert_eq!(content.owner_username(), Some("username"));

    // The resolved content was persisted, the second lookup is local.
    let content_again = node_a.get_content(hash).await.unwrap();
    assert_eq!(content_again, content);
}

#[tokio::test]
async fn get_content_times_out_when_nobody_answers() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    let result = node.get_content(Hash::new(b"nobody has this")).await;
    assert!(matches!(result, Err(NodeError::Timeout)));
}

#[tokio::test]
async fn answers_content_requests_from_peers() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;
    node.sign_in("username", "password").await.unwrap();
    let hash = node.add_content_data("test data").await.unwrap();

    let mut requester = hub.create_transport("peer-r");
    let mut events = requester.take_events();
    let conn = requester.connect(node.local_peer())
        .await
        .unwrap();
    wait_for_connection(&node, requester.local()).await;

    let request = Message::RequestContentByHash {
        hash,
        sender: requester.local().clone(),
    };
    conn.send(request.to_bytes()).await.unwrap();

    match next_message(&mut events).await {
        Message::Content {
            hash: answered,
            content,
        } => {
            assert_eq!(answered, hash);
            let content = Content::from_record(content).unwrap();
            assert_eq!(content.data(), "test data");
            assert_eq!(content.hash(), hash);
        }
        other => panic!("expected a CONTENT answer, got {other:?}"),
    }
}

#[tokio::test]
async fn dispatch_survives_garbage_frames() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;
    node.sign_in("username", "password").await.unwrap();
    let hash = node.add_content_data("test data").await.unwrap();

    let mut requester = hub.create_transport("peer-r");
    let mut events = requester.take_events();
    let conn = requester.connect(node.local_peer())
        .await
        .unwrap();
    wait_for_connection(&node, requester.local()).await;

    conn.send(b"not even json".to_vec()).await.unwrap();
    conn.send(b"{\"type\":\"NOT_A_TYPE\",\"body\":{}}".to_vec())
        .await
        .unwrap();

    let request = Message::RequestContentByHash {
        hash,
        sender: requester.local().clone(),
    };
    conn.send(request.to_bytes()).await.unwrap();

    assert!(matches!(
        next_message(&mut events).await,
        Message::Content { .. }
    ));
}

#[tokio::test]
async fn broadcast_reports_per_peer_results() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    let mut transport_b = hub.create_transport("peer-b");
    let mut events_b = transport_b.take_events();
    transport_b.connect(node.local_peer())
        .await
        .unwrap();
    let mut transport_c = hub.create_transport("peer-c");
    let _events_c = transport_c.take_events();
    transport_c.connect(node.local_peer())
        .await
        .unwrap();
    let mut transport_d = hub.create_transport("peer-d");
    let mut events_d = transport_d.take_events();
    transport_d.connect(node.local_peer())
        .await
        .unwrap();

    for peer in ["peer-b", "peer-c", "peer-d"] {
        wait_for_connection(&node, &PeerId::new(peer)).await;
    }

    hub.sever(node.local_peer(), &PeerId::new("peer-c")).await;

    let message = Message::RequestPeersForHash {
        hash: Hash::new(b"test data"),
    };
    let err = node.broadcast_message(message).await.unwrap_err();

    match err {
        NodeError::Broadcast(report) => {
            assert_eq!(report.len(), 3);
            assert_eq!(
                report.failed().collect::<Vec<_>>(),
                vec![&PeerId::new("peer-c")]
            );
            let mut succeeded: Vec<_> = report.succeeded().cloned().collect();
            succeeded.sort();
            assert_eq!(succeeded, vec![PeerId::new("peer-b"), PeerId::new("peer-d")]);
        }
        other => panic!("expected a broadcast error, got {other:?}"),
    }

    // The failing connection did not stop the frame from reaching the healthy peers.
    assert!(matches!(
        next_message(&mut events_b).await,
        Message::RequestPeersForHash { .. }
    ));
    assert!(matches!(
        next_message(&mut events_d).await,
        Message::RequestPeersForHash { .. }
    ));
}

#[tokio::test]
async fn announcing_identity_requires_a_session() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    assert!(matches!(
        node.announce_identity().await,
        Err(NodeError::NotSignedIn)
    ));

    let mut listener = hub.create_transport("peer-l");
    let mut events = listener.take_events();
    listener.connect(node.local_peer())
        .await
        .unwrap();
    wait_for_connection(&node, listener.local()).await;

    let record = node.sign_in("username", "password").await.unwrap();
    assert_eq!(record.username, "username");
    assert_eq!(
        record.address.to_string(),
        "18KWpWD4CDx4aFg4BprCVofBgshdJWmCB4"
    );

    // Signing in already announced the identity once.
    let announced: IdentityRecord = serde_json::from_slice(&next_frame(&mut events).await).unwrap();
    assert_eq!(announced, record);

    let report = node.announce_identity().await.unwrap();
    assert_eq!(report.len(), 1);
    let announced: IdentityRecord = serde_json::from_slice(&next_frame(&mut events).await).unwrap();
    assert_eq!(announced, record);
}

#[tokio::test]
async fn adding_raw_data_requires_a_session() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    assert!(matches!(
        node.add_content_data("test data").await,
        Err(NodeError::NotSignedIn)
    ));
}

#[tokio::test]
async fn adding_existing_content_needs_no_session() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    let content = Content::new("unowned data");
    let hash = node.add_content(content.clone()).await.unwrap();
    assert_eq!(hash, content.hash());
    assert_eq!(node.get_content(hash).await.unwrap(), content);
}

#[tokio::test]
async fn discovery_requests_are_answered_with_holding_peers() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;
    node.sign_in("username", "password").await.unwrap();
    let hash = node.add_content_data("test data").await.unwrap();

    let mut requester = hub.create_transport("peer-r");
    let mut events = requester.take_events();
    let conn = requester.connect(node.local_peer())
        .await
        .unwrap();
    wait_for_connection(&node, requester.local()).await;

    conn.send(Message::RequestPeersForHash { hash }.to_bytes())
        .await
        .unwrap();

    assert_eq!(
        next_message(&mut events).await,
        Message::AnnouncePeersForHash {
            hash,
            peers: vec![node.local_peer().clone()],
        }
    );
}

#[tokio::test]
async fn find_peers_collects_announcements() {
    let hub = TestHub::new();
    let node_a = spawn_node(&hub, "peer-a").await;
    let node_b = spawn_node(&hub, "peer-b").await;
    wait_for_connection(&node_a, node_b.local_peer()).await;

    node_b.sign_in("username", "password").await.unwrap();
    let hash = node_b.add_content_data("test data").await.unwrap();

    // First call broadcasts the request; B's announcement arrives asynchronously and is
    // reflected by a later call.
    assert!(node_a.find_peers_for_content(hash).await.unwrap().is_empty());
    for _ in 0..200 {
        if node_a.find_peers_for_content(hash).await.unwrap() == vec![PeerId::new("peer-b")] {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("announcement from peer-b never arrived");
}

#[tokio::test]
async fn hooks_observe_the_session_and_failures_stay_isolated() {
    let hub = TestHub::new();
    let opened = Arc::new(AtomicBool::new(false));
    let frames = Arc::new(AtomicUsize::new(0));

    let mut config = test_config();
    config.hooks.on_open = Some(Arc::new({
        let opened = opened.clone();
        move |_peer| {
            opened.store(true, Ordering::SeqCst);
            Ok(())
        }
    }));
    config.hooks.on_connection_data = Some(Arc::new({
        let frames = frames.clone();
        move |_peer, _bytes| {
            frames.fetch_add(1, Ordering::SeqCst);
            Err(HookError("boom".to_string()))
        }
    }));

    let node = Node::spawn(config, hub.create_transport("peer-a"), MemoryStore::new())
        .await
        .unwrap();
    assert!(opened.load(Ordering::SeqCst));

    let mut sender = hub.create_transport("peer-s");
    let _events = sender.take_events();
    let conn = sender.connect(node.local_peer())
        .await
        .unwrap();
    wait_for_connection(&node, sender.local()).await;

    conn.send(b"garbage".to_vec()).await.unwrap();
    for _ in 0..200 {
        if frames.load(Ordering::SeqCst) == 1 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(frames.load(Ordering::SeqCst), 1);

    // The failing hook never destabilized the session.
    assert_eq!(node.state().await.unwrap(), SessionState::Active);
}

#[tokio::test]
async fn send_message_fails_for_unknown_peers() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    let result = node
        .send_message(
            Message::RequestPeersForHash {
                hash: Hash::new(b"test data"),
            },
            &PeerId::new("peer-unknown"),
        )
        .await;
    assert!(matches!(result, Err(NodeError::UnknownPeer(_))));
}

#[tokio::test]
async fn shutdown_stops_the_session() {
    let hub = TestHub::new();
    let node = spawn_node(&hub, "peer-a").await;

    node.shutdown().await.unwrap();
    assert!(matches!(
        node.state().await,
        Err(NodeError::ActorClosed)
    ));
}
