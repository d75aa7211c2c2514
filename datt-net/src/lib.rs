// SPDX-License-Identifier: MIT OR Apache-2.0

//! Peer session orchestration for the datt content-sharing network.
//!
//! A [`Node`] owns the connections handed out by a rendezvous [`Transport`], dispatches inbound
//! protocol messages, and exposes the session operations: sign in, add and resolve content,
//! broadcast and point-to-point sends, identity announcement and content discovery. Content
//! lookups try the local [`ContentStore`](datt_store::ContentStore) first and fall back to the
//! network with a bounded wait.

pub mod config;
pub mod node;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;

#[cfg(test)]
mod tests;

pub use config::{
    Config, DEFAULT_RENDEZVOUS_PORT, DEFAULT_REQUEST_TIMEOUT, HookError, HookResult, Hooks,
};
pub use node::{BroadcastReport, Node, NodeError, SessionState};
pub use traits::{Connection, NetworkError, Transport, TransportEvent};
