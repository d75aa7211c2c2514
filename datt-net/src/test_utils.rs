// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory transport for exercising nodes without a real rendezvous service.
//!
//! A [`TestHub`] plays the rendezvous role: transports created from the same hub see each other
//! in the peer list and connect through in-process channels. Individual links can be severed to
//! simulate a dead connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use datt_core::PeerId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::traits::{Connection, NetworkError, Transport, TransportEvent};

const CHANNEL_SIZE: usize = 64;

/// In-memory rendezvous service connecting [`TestTransport`]s to each other.
#[derive(Clone, Debug, Default)]
pub struct TestHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Debug, Default)]
struct HubInner {
    peers: HashMap<PeerId, mpsc::Sender<TransportEvent>>,
    links: HashMap<(PeerId, PeerId), JoinHandle<()>>,
}

impl TestHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport whose handshake succeeds right away.
    pub fn create_transport(&self, id: &str) -> TestTransport {
        let local = PeerId::new(id);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_SIZE);
        events_tx
            .try_send(TransportEvent::Open {
                local: local.clone(),
            })
            .expect("fresh event channel has capacity");
        self.inner
            .lock()
            .unwrap()
            .peers
            .insert(local.clone(), events_tx);
        TestTransport {
            hub: self.clone(),
            local,
            events_rx: Some(events_rx),
        }
    }

    /// Build a transport whose handshake fails; the node sees an error instead of `Open`.
    pub fn create_failing_transport(&self, id: &str) -> TestTransport {
        let local = PeerId::new(id);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_SIZE);
        events_tx
            .try_send(TransportEvent::Error {
                reason: "could not listen for connections".to_string(),
            })
            .expect("fresh event channel has capacity");
        drop(events_tx);
        TestTransport {
            hub: self.clone(),
            local,
            events_rx: Some(events_rx),
        }
    }

    /// Kill the directional link `from -> to`; subsequent sends on it fail.
    pub async fn sever(&self, from: &PeerId, to: &PeerId) {
        let handle = self
            .inner
            .lock()
            .unwrap()
            .links
            .remove(&(from.clone(), to.clone()));
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn registered_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.inner.lock().unwrap().peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    fn open_connection(&self, from: &PeerId, to: &PeerId) -> Result<Connection, NetworkError> {
        let mut inner = self.inner.lock().unwrap();
        let to_events = inner
            .peers
            .get(to)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownPeer(to.clone()))?;
        let from_events = inner
            .peers
            .get(from)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownPeer(from.clone()))?;

        let outbound = pipe(&mut inner, from.clone(), to.clone(), to_events.clone());
        let inbound = pipe(&mut inner, to.clone(), from.clone(), from_events);

        to_events
            .try_send(TransportEvent::Connection { conn: inbound })
            .map_err(|_| NetworkError::ConnectionClosed(to.clone()))?;

        Ok(outbound)
    }
}

/// Forwarding task carrying frames from `sender_id` into `receiver_id`'s event stream.
fn pipe(
    inner: &mut HubInner,
    sender_id: PeerId,
    receiver_id: PeerId,
    receiver_events: mpsc::Sender<TransportEvent>,
) -> Connection {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHANNEL_SIZE);
    let from = sender_id.clone();
    let handle = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let event = TransportEvent::Data {
                peer: from.clone(),
                bytes,
            };
            if receiver_events.send(event).await.is_err() {
                break;
            }
        }
    });
    inner.links.insert((sender_id, receiver_id.clone()), handle);
    Connection::new(receiver_id, tx)
}

/// Transport backed by a [`TestHub`].
#[derive(Debug)]
pub struct TestTransport {
    hub: TestHub,
    local: PeerId,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
}

impl TestTransport {
    pub fn local(&self) -> &PeerId {
        &self.local
    }
}

#[async_trait]
impl Transport for TestTransport {
    fn take_events(&mut self) -> mpsc::Receiver<TransportEvent> {
        self.events_rx
            .take()
            .expect("transport events were already taken")
    }

    async fn list_all_peers(&mut self) -> Result<Vec<PeerId>, NetworkError> {
        Ok(self.hub.registered_peers())
    }

    async fn connect(&mut self, peer: &PeerId) -> Result<Connection, NetworkError> {
        self.hub.open_connection(&self.local, peer)
    }
}
