// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use datt_core::PeerId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Events pushed up from the rendezvous transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The handshake with the rendezvous service completed; our own peer id is known.
    Open { local: PeerId },

    /// A remote peer connected to us.
    Connection { conn: Connection },

    /// A data frame arrived on the connection with the given peer.
    Data { peer: PeerId, bytes: Vec<u8> },

    /// The transport failed; during the handshake this fails node initialization.
    Error { reason: String },
}

/// Sending half of a peer connection.
///
/// Inbound frames do not arrive here; they are delivered as [`TransportEvent::Data`] so that the
/// node processes frames of one connection strictly in arrival order.
#[derive(Clone, Debug)]
pub struct Connection {
    peer: PeerId,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl Connection {
    pub fn new(peer: PeerId, outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self { peer, outbound }
    }

    /// The remote peer this connection leads to.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Send a frame to the remote peer, resolving once the transport accepted it.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), NetworkError> {
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| NetworkError::ConnectionClosed(self.peer.clone()))
    }
}

/// The rendezvous transport the node runs on.
///
/// The transport introduces peers to each other and hands out raw connections; everything above
/// the frame level (message format, dispatch) is the node's business.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Take the transport's event receiver. Called exactly once, by the node.
    fn take_events(&mut self) -> mpsc::Receiver<TransportEvent>;

    /// List all peer ids currently registered at the rendezvous service, our own included.
    async fn list_all_peers(&mut self) -> Result<Vec<PeerId>, NetworkError>;

    /// Open an outbound connection to the given peer.
    async fn connect(&mut self, peer: &PeerId) -> Result<Connection, NetworkError>;
}

/// Error types for transport operations.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The connection to the peer is closed.
    #[error("connection to peer '{0}' is closed")]
    ConnectionClosed(PeerId),

    /// The rendezvous service knows no such peer.
    #[error("no route to peer '{0}'")]
    UnknownPeer(PeerId),

    /// The transport itself failed.
    #[error("rendezvous transport error: {0}")]
    Transport(String),
}
