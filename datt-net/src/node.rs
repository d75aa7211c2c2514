// SPDX-License-Identifier: MIT OR Apache-2.0

//! The peer session: connection lifecycle, message dispatch and content resolution.
//!
//! [`Node`] is the public handle; the session itself runs as an actor task owning the transport,
//! the content store, the discovery index and the connection registry. Commands travel through
//! an inbox channel and answer over oneshot channels, so all session state is touched from one
//! task only. Frames of a single connection are processed in arrival order; handlers may suspend
//! on store, crypto and send operations but are never re-entered for the same connection.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval};
use tracing::{debug, warn};

use datt_core::{Content, ContentError, Hash, Identity, IdentityRecord, Message, PeerId};
use datt_crypto::{CryptoEngine, CryptoEngineError};
use datt_discovery::ContentDiscovery;
use datt_store::{ContentStore, StoreError};

use crate::config::{Config, HookResult};
use crate::traits::{Connection, NetworkError, Transport, TransportEvent};

/// How often expired pending content requests are dropped.
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the command inbox.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Macro-state of a node session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No rendezvous handshake yet.
    Disconnected,
    /// Handshake complete, own peer id known.
    Connected,
    /// Waiting for the peer list from the rendezvous service.
    Discovering,
    /// Peer list processed, outbound connections initiated.
    Active,
    /// The handshake failed; the session is unusable and is not retried.
    Failed,
}

/// Per-peer outcome of a fan-out broadcast.
///
/// One peer's failure never prevents the send attempt to the others; the aggregate operation
/// still fails when any single send failed.
#[derive(Debug)]
pub struct BroadcastReport {
    results: Vec<(PeerId, Result<(), NetworkError>)>,
}

impl BroadcastReport {
    /// Number of connections the broadcast went out to.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, result)| result.is_ok())
    }

    /// Peers whose send failed.
    pub fn failed(&self) -> impl Iterator<Item = &PeerId> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(peer, _)| peer)
    }

    /// Peers whose send succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &PeerId> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(peer, _)| peer)
    }

    /// All per-peer results.
    pub fn results(&self) -> &[(PeerId, Result<(), NetworkError>)] {
        &self.results
    }
}

/// Handle to a running node session.
#[derive(Debug)]
pub struct Node {
    actor_tx: mpsc::Sender<ToNodeActor>,
    local_peer: PeerId,
}

impl Node {
    /// Start a node session on the given transport and store.
    ///
    /// Resolves once the rendezvous handshake completed, the peer list was processed and
    /// outbound connections were initiated. A handshake failure rejects the whole
    /// initialization; there is no automatic retry.
    pub async fn spawn<T, S>(config: Config, mut transport: T, store: S) -> Result<Self, NodeError>
    where
        T: Transport + Sync,
        S: ContentStore + Sync,
    {
        debug!(
            host = %config.host,
            port = config.port,
            path = %config.path,
            "starting node session"
        );

        let events = transport.take_events();
        let (actor_tx, inbox) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (init_tx, init_rx) = oneshot::channel();
        let crypto = CryptoEngine::new();

        tokio::task::spawn(run_session(
            config, transport, events, store, crypto, inbox, init_tx,
        ));

        let local_peer = init_rx.await.map_err(|_| NodeError::ActorClosed)??;
        Ok(Self {
            actor_tx,
            local_peer,
        })
    }

    /// Our own peer id on the rendezvous network.
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Authenticate with a username and password, then announce the identity to all peers.
    pub async fn sign_in(
        &self,
        username: &str,
        password: &str,
    ) -> Result<IdentityRecord, NodeError> {
        let (username, password) = (username.to_string(), password.to_string());
        self.request(|reply| ToNodeActor::SignIn {
            username,
            password,
            reply,
        })
        .await?
    }

    /// Persist an existing content object.
    pub async fn add_content(&self, content: Content) -> Result<Hash, NodeError> {
        self.request(|reply| ToNodeActor::AddContent { content, reply })
            .await?
    }

    /// Wrap raw data into content owned and signed by the session identity, then persist it.
    ///
    /// Fails with [`NodeError::NotSignedIn`] without a session identity.
    pub async fn add_content_data(&self, data: &str) -> Result<Hash, NodeError> {
        let data = data.to_string();
        self.request(|reply| ToNodeActor::AddContentData { data, reply })
            .await?
    }

    /// Resolve content by hash: local store first, then the network.
    ///
    /// A local miss broadcasts a content request and waits for a matching `CONTENT` message,
    /// bounded by the configured request timeout.
    pub async fn get_content(&self, hash: Hash) -> Result<Content, NodeError> {
        self.request(|reply| ToNodeActor::GetContent { hash, reply })
            .await?
    }

    /// Ask the network who holds the given hash; returns the peers known to claim it so far.
    pub async fn find_peers_for_content(&self, hash: Hash) -> Result<Vec<PeerId>, NodeError> {
        self.request(|reply| ToNodeActor::FindPeers { hash, reply })
            .await?
    }

    /// Send a message to every open connection concurrently.
    ///
    /// Fails when any single send failed; the report inside the error still carries the
    /// per-peer outcomes.
    pub async fn broadcast_message(&self, message: Message) -> Result<BroadcastReport, NodeError> {
        let report = self
            .request(|reply| ToNodeActor::Broadcast { message, reply })
            .await??;
        if report.all_succeeded() {
            Ok(report)
        } else {
            Err(NodeError::Broadcast(report))
        }
    }

    /// Send a message to exactly one peer.
    pub async fn send_message(&self, message: Message, peer: &PeerId) -> Result<(), NodeError> {
        let peer = peer.clone();
        self.request(|reply| ToNodeActor::Send {
            message,
            peer,
            reply,
        })
        .await?
    }

    /// Broadcast the session identity's public record to all peers.
    pub async fn announce_identity(&self) -> Result<BroadcastReport, NodeError> {
        let report = self
            .request(|reply| ToNodeActor::AnnounceIdentity { reply })
            .await??;
        if report.all_succeeded() {
            Ok(report)
        } else {
            Err(NodeError::Broadcast(report))
        }
    }

    /// Current macro-state of the session.
    pub async fn state(&self) -> Result<SessionState, NodeError> {
        self.request(|reply| ToNodeActor::State { reply }).await
    }

    /// Peers we currently hold an open connection to.
    pub async fn connected_peers(&self) -> Result<Vec<PeerId>, NodeError> {
        self.request(|reply| ToNodeActor::ConnectedPeers { reply })
            .await
    }

    /// Stop the session task.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.request(|reply| ToNodeActor::Shutdown { reply }).await
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> ToNodeActor,
    ) -> Result<R, NodeError> {
        let (reply, reply_rx) = oneshot::channel();
        self.actor_tx
            .send(make(reply))
            .await
            .map_err(|_| NodeError::ActorClosed)?;
        reply_rx.await.map_err(|_| NodeError::ActorClosed)
    }
}

enum ToNodeActor {
    SignIn {
        username: String,
        password: String,
        reply: oneshot::Sender<Result<IdentityRecord, NodeError>>,
    },
    AddContent {
        content: Content,
        reply: oneshot::Sender<Result<Hash, NodeError>>,
    },
    AddContentData {
        data: String,
        reply: oneshot::Sender<Result<Hash, NodeError>>,
    },
    GetContent {
        hash: Hash,
        reply: oneshot::Sender<Result<Content, NodeError>>,
    },
    FindPeers {
        hash: Hash,
        reply: oneshot::Sender<Result<Vec<PeerId>, NodeError>>,
    },
    Broadcast {
        message: Message,
        reply: oneshot::Sender<Result<BroadcastReport, NodeError>>,
    },
    Send {
        message: Message,
        peer: PeerId,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    AnnounceIdentity {
        reply: oneshot::Sender<Result<BroadcastReport, NodeError>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A caller or peer waiting for content to arrive from the network.
enum Waiter {
    /// A local `get_content` call.
    Caller(oneshot::Sender<Result<Content, NodeError>>),
    /// A peer whose content request we are resolving on their behalf.
    Peer(PeerId),
}

struct PendingRequest {
    waiter: Waiter,
    deadline: Instant,
}

async fn run_session<T, S>(
    config: Config,
    transport: T,
    mut events: mpsc::Receiver<TransportEvent>,
    mut store: S,
    crypto: CryptoEngine,
    inbox: mpsc::Receiver<ToNodeActor>,
    init_reply: oneshot::Sender<Result<PeerId, NodeError>>,
) where
    T: Transport + Sync,
    S: ContentStore + Sync,
{
    if let Err(err) = store.init().await {
        init_reply.send(Err(err.into())).ok();
        return;
    }

    // The session starts disconnected until the transport reports the completed handshake.
    let local_peer = loop {
        match events.recv().await {
            Some(TransportEvent::Open { local }) => break local,
            Some(TransportEvent::Error { reason }) => {
                init_reply.send(Err(NodeError::Handshake(reason))).ok();
                return;
            }
            Some(event) => debug!(?event, "ignoring transport event before handshake"),
            None => {
                init_reply
                    .send(Err(NodeError::Handshake(
                        "transport closed before handshake".to_string(),
                    )))
                    .ok();
                return;
            }
        }
    };
    debug!(peer = %local_peer, "rendezvous handshake complete");
    observe(
        "on_open",
        config.hooks.on_open.as_ref().map(|hook| hook(&local_peer)),
    );

    let mut actor = NodeActor {
        config,
        transport,
        events,
        inbox,
        store,
        crypto,
        discovery: ContentDiscovery::new(),
        identity: None,
        local_peer: local_peer.clone(),
        peers: Vec::new(),
        connections: HashMap::new(),
        pending: HashMap::new(),
        state: SessionState::Connected,
    };

    actor.discover_peers().await;
    actor.state = SessionState::Active;
    init_reply.send(Ok(local_peer)).ok();

    actor.run().await;
}

struct NodeActor<T, S> {
    config: Config,
    transport: T,
    events: mpsc::Receiver<TransportEvent>,
    inbox: mpsc::Receiver<ToNodeActor>,
    store: S,
    crypto: CryptoEngine,
    discovery: ContentDiscovery,
    identity: Option<Identity>,
    local_peer: PeerId,
    peers: Vec<PeerId>,
    connections: HashMap<PeerId, Connection>,
    pending: HashMap<Hash, Vec<PendingRequest>>,
    state: SessionState,
}

impl<T, S> NodeActor<T, S>
where
    T: Transport + Sync,
    S: ContentStore + Sync,
{
    async fn run(mut self) {
        let mut sweep = interval(PENDING_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                biased;
                msg = self.inbox.recv() => {
                    match msg {
                        Some(ToNodeActor::Shutdown { reply }) => {
                            reply.send(()).ok();
                            break;
                        }
                        Some(msg) => self.on_actor_message(msg).await,
                        None => break,
                    }
                },
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.on_transport_event(event).await,
                        None => {
                            warn!("transport event stream ended");
                            break;
                        }
                    }
                },
                _ = sweep.tick() => self.expire_pending(),
            }
        }
    }

    /// Request the peer list and connect out to every listed peer except ourselves.
    async fn discover_peers(&mut self) {
        self.state = SessionState::Discovering;

        match self.transport.list_all_peers().await {
            Ok(peers) => {
                debug!(count = peers.len(), "got peer list from rendezvous service");
                observe(
                    "on_peers",
                    self.config.hooks.on_peers.as_ref().map(|hook| hook(&peers)),
                );
                self.peers = peers;
                if self.connections.is_empty() {
                    self.connect_to_available_peers().await;
                }
            }
            Err(err) => warn!("could not list peers: {err}"),
        }
    }

    async fn connect_to_available_peers(&mut self) {
        for peer in self.peers.clone() {
            if peer == self.local_peer {
                continue;
            }
            debug!(%peer, "connecting to peer");
            match self.transport.connect(&peer).await {
                Ok(conn) => self.register_connection(conn),
                Err(err) => warn!(%peer, "failed to connect: {err}"),
            }
        }
    }

    fn register_connection(&mut self, conn: Connection) {
        let peer = conn.peer().clone();
        debug!(%peer, "registering connection");
        observe(
            "on_connection",
            self.config
                .hooks
                .on_connection
                .as_ref()
                .map(|hook| hook(&peer)),
        );
        if !self.peers.contains(&peer) {
            self.peers.push(peer.clone());
        }
        self.connections.insert(peer, conn);
    }

    async fn on_actor_message(&mut self, msg: ToNodeActor) {
        match msg {
            ToNodeActor::SignIn {
                username,
                password,
                reply,
            } => {
                match self.crypto.derive_identity(&username, &password).await {
                    Ok(identity) => {
                        let record = identity.to_record();
                        self.identity = Some(identity);
                        let report = self.broadcast_bytes(&identity_bytes(&record)).await;
                        if !report.all_succeeded() {
                            warn!("identity announcement did not reach every peer");
                        }
                        reply.send(Ok(record)).ok();
                    }
                    Err(err) => {
                        reply.send(Err(err.into())).ok();
                    }
                };
            }
            ToNodeActor::AddContent { content, reply } => {
                let result = self
                    .store
                    .put_content(content)
                    .await
                    .map_err(NodeError::from);
                reply.send(result).ok();
            }
            ToNodeActor::AddContentData { data, reply } => {
                let Some(identity) = &self.identity else {
                    reply.send(Err(NodeError::NotSignedIn)).ok();
                    return;
                };
                let content = Content::from_data_and_identity(data, identity, None, None);
                let result = self
                    .store
                    .put_content(content)
                    .await
                    .map_err(NodeError::from);
                reply.send(result).ok();
            }
            ToNodeActor::GetContent { hash, reply } => match self.store.get_content(&hash).await {
                Ok(Some(content)) => {
                    reply.send(Ok(content)).ok();
                }
                Ok(None) => {
                    self.request_remote_content(hash, Waiter::Caller(reply))
                        .await;
                }
                Err(err) => {
                    reply.send(Err(err.into())).ok();
                }
            },
            ToNodeActor::FindPeers { hash, reply } => {
                let request = self.discovery.find_peers_for_content(&hash);
                let report = self.broadcast_bytes(&request.to_bytes()).await;
                for peer in report.failed() {
                    warn!(%peer, %hash, "discovery request did not reach peer");
                }
                reply.send(Ok(self.discovery.peers_for(&hash))).ok();
            }
            ToNodeActor::Broadcast { message, reply } => {
                let report = self.broadcast_bytes(&message.to_bytes()).await;
                reply.send(Ok(report)).ok();
            }
            ToNodeActor::Send {
                message,
                peer,
                reply,
            } => {
                let result = self.send_to(&peer, message.to_bytes()).await;
                reply.send(result).ok();
            }
            ToNodeActor::AnnounceIdentity { reply } => {
                let Some(identity) = &self.identity else {
                    reply.send(Err(NodeError::NotSignedIn)).ok();
                    return;
                };
                let record = identity.to_record();
                let report = self.broadcast_bytes(&identity_bytes(&record)).await;
                reply.send(Ok(report)).ok();
            }
            ToNodeActor::State { reply } => {
                reply.send(self.state).ok();
            }
            ToNodeActor::ConnectedPeers { reply } => {
                reply.send(self.connections.keys().cloned().collect()).ok();
            }
            // Handled in the select loop.
            ToNodeActor::Shutdown { .. } => {}
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connection { conn } => {
                if self.state == SessionState::Disconnected {
                    debug!("ignoring inbound connection while disconnected");
                    return;
                }
                self.register_connection(conn);
            }
            TransportEvent::Data { peer, bytes } => {
                observe(
                    "on_connection_data",
                    self.config
                        .hooks
                        .on_connection_data
                        .as_ref()
                        .map(|hook| hook(&peer, &bytes)),
                );
                match Message::from_bytes(&bytes) {
                    Ok(message) => self.on_message(peer, message).await,
                    // Not every frame is a protocol message (identity announcements are not);
                    // drop quietly, never crash the loop.
                    Err(err) => debug!(%peer, "dropping unparseable frame: {err}"),
                }
            }
            TransportEvent::Open { .. } => debug!("ignoring duplicate handshake event"),
            TransportEvent::Error { reason } => warn!("transport error: {reason}"),
        }
    }

    async fn on_message(&mut self, from: PeerId, message: Message) {
        match message {
            Message::RequestPeersForHash { hash } => {
                debug!(peer = %from, %hash, "got peer request for hash");
                let holds_locally = matches!(self.store.get_content(&hash).await, Ok(Some(_)));
                let local_peer = self.local_peer.clone();
                if let Some(announce) =
                    self.discovery
                        .handle_discovery_request(&hash, &local_peer, holds_locally)
                {
                    if let Err(err) = self.send_to(&from, announce.to_bytes()).await {
                        warn!(peer = %from, "failed to answer discovery request: {err}");
                    }
                }
            }
            Message::AnnouncePeersForHash { hash, peers } => {
                debug!(%hash, count = peers.len(), "got peers for hash");
                self.discovery.handle_announce_peers_for_hash(hash, peers);
            }
            Message::RequestContentByHash { hash, sender } => {
                debug!(peer = %sender, %hash, "peer is requesting content");
                match self.store.get_content(&hash).await {
                    Ok(Some(content)) => {
                        let answer = Message::Content {
                            hash,
                            content: content.to_record(),
                        };
                        if let Err(err) = self.send_to(&sender, answer.to_bytes()).await {
                            warn!(peer = %sender, "failed to deliver content: {err}");
                        }
                    }
                    Ok(None) => {
                        // Local miss: try to resolve on the network on behalf of the requester.
                        // If nothing arrives before the deadline the requester gets no answer;
                        // their own wait is bounded by the same timeout on their side.
                        self.request_remote_content(hash, Waiter::Peer(sender)).await;
                    }
                    Err(err) => warn!(%hash, "store lookup failed: {err}"),
                }
            }
            Message::Content { hash, content } => match Content::from_record(content) {
                Ok(content) => {
                    if content.hash() != hash {
                        debug!(%hash, "dropping content whose record does not hash to the claimed value");
                        return;
                    }
                    debug!(%hash, "received content, persisting");
                    if let Err(err) = self.store.put_content(content.clone()).await {
                        warn!(%hash, "failed to persist received content: {err}");
                    }
                    self.resolve_pending(hash, content).await;
                }
                Err(err) => debug!(%hash, "dropping invalid content record: {err}"),
            },
        }
    }

    /// Register a waiter for content we do not hold and broadcast the request for it.
    ///
    /// Only one request per hash is in flight at a time; further waiters for the same hash
    /// piggyback on it. Waiters not fulfilled before their deadline are expired by the sweep.
    async fn request_remote_content(&mut self, hash: Hash, waiter: Waiter) {
        let deadline = Instant::now() + self.config.request_timeout;
        let already_pending = self.pending.contains_key(&hash);
        self.pending
            .entry(hash)
            .or_default()
            .push(PendingRequest { waiter, deadline });

        if already_pending {
            return;
        }

        let request = Message::RequestContentByHash {
            hash,
            sender: self.local_peer.clone(),
        };
        let report = self.broadcast_bytes(&request.to_bytes()).await;
        for peer in report.failed() {
            warn!(%peer, %hash, "content request did not reach peer");
        }
    }

    /// Fulfill and remove every waiter registered for the given hash.
    async fn resolve_pending(&mut self, hash: Hash, content: Content) {
        let Some(requests) = self.pending.remove(&hash) else {
            return;
        };
        for request in requests {
            match request.waiter {
                Waiter::Caller(reply) => {
                    reply.send(Ok(content.clone())).ok();
                }
                Waiter::Peer(peer) => {
                    let answer = Message::Content {
                        hash,
                        content: content.to_record(),
                    };
                    if let Err(err) = self.send_to(&peer, answer.to_bytes()).await {
                        warn!(%peer, "failed to forward resolved content: {err}");
                    }
                }
            }
        }
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        self.pending.retain(|hash, requests| {
            let mut kept = Vec::with_capacity(requests.len());
            for request in requests.drain(..) {
                if request.deadline <= now {
                    debug!(%hash, "pending content request expired");
                    if let Waiter::Caller(reply) = request.waiter {
                        reply.send(Err(NodeError::Timeout)).ok();
                    }
                } else {
                    kept.push(request);
                }
            }
            *requests = kept;
            !requests.is_empty()
        });
    }

    /// Send the same bytes to every open connection concurrently.
    async fn broadcast_bytes(&self, bytes: &[u8]) -> BroadcastReport {
        let sends = self.connections.iter().map(|(peer, conn)| {
            let peer = peer.clone();
            let conn = conn.clone();
            let bytes = bytes.to_vec();
            async move { (peer, conn.send(bytes).await) }
        });

        BroadcastReport {
            results: join_all(sends).await,
        }
    }

    async fn send_to(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), NodeError> {
        let conn = self
            .connections
            .get(peer)
            .ok_or_else(|| NodeError::UnknownPeer(peer.clone()))?;
        conn.send(bytes).await?;
        Ok(())
    }
}

fn identity_bytes(record: &IdentityRecord) -> Vec<u8> {
    // The record is plain data, encoding cannot fail.
    serde_json::to_vec(record).expect("identity record is always serializable")
}

/// Surface a hook outcome without letting it unwind into the session.
fn observe(hook_name: &str, result: Option<HookResult>) {
    if let Some(Err(err)) = result {
        warn!(hook = hook_name, "session hook failed: {err}");
    }
}

/// Error types for node operations.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The operation requires a signed-in session identity.
    #[error("must be signed in to perform this operation")]
    NotSignedIn,

    /// Content was not resolved from the network before the deadline.
    #[error("timed out waiting for content from the network")]
    Timeout,

    /// No connection is registered for the peer.
    #[error("no connection registered for peer '{0}'")]
    UnknownPeer(PeerId),

    /// At least one send of a fan-out broadcast failed.
    #[error("broadcast failed for {} of {} connections", .0.failed().count(), .0.len())]
    Broadcast(BroadcastReport),

    /// The rendezvous handshake failed.
    #[error("handshake with the rendezvous service failed: {0}")]
    Handshake(String),

    /// A transport operation failed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The content store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A content entity operation failed.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// A crypto engine operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoEngineError),

    /// The session task is no longer running.
    #[error("node session is no longer running")]
    ActorClosed,
}
