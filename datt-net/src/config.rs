// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for a node session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use datt_core::PeerId;
use thiserror::Error;

/// Default port of the rendezvous service.
pub const DEFAULT_RENDEZVOUS_PORT: u16 = 3000;

/// Default deadline for content requested from the network.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration parameters for a node session.
#[derive(Clone, Debug)]
pub struct Config {
    /// Host of the rendezvous service.
    pub host: String,

    /// Port of the rendezvous service.
    pub port: u16,

    /// Path of the rendezvous endpoint.
    pub path: String,

    /// How long a remote content request may stay unanswered before it fails with a timeout.
    pub request_timeout: Duration,

    /// Observer hooks for session events.
    pub hooks: Hooks,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_RENDEZVOUS_PORT,
            path: "/".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            hooks: Hooks::default(),
        }
    }
}

/// Outcome of a hook invocation.
pub type HookResult = Result<(), HookError>;

/// A hook reported a failure; it is logged at the call site and never propagated into the
/// dispatch loop.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct HookError(pub String);

/// Observer hooks a session embedder may register.
///
/// Hooks return a result instead of throwing: a failing hook is visible in the logs but cannot
/// destabilize the node.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Runs when the rendezvous handshake completes.
    pub on_open: Option<Arc<dyn Fn(&PeerId) -> HookResult + Send + Sync>>,

    /// Runs when the peer list arrives from the rendezvous service.
    pub on_peers: Option<Arc<dyn Fn(&[PeerId]) -> HookResult + Send + Sync>>,

    /// Runs when a connection is registered, inbound or outbound.
    pub on_connection: Option<Arc<dyn Fn(&PeerId) -> HookResult + Send + Sync>>,

    /// Runs for every inbound data frame, before dispatch.
    pub on_connection_data: Option<Arc<dyn Fn(&PeerId, &[u8]) -> HookResult + Send + Sync>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_peers", &self.on_peers.is_some())
            .field("on_connection", &self.on_connection.is_some())
            .field("on_connection_data", &self.on_connection_data.is_some())
            .finish()
    }
}
