// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::ContentRecord;
use crate::hash::Hash;

/// Identifier of a peer session on the rendezvous network.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for PeerId {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(value.to_string()))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.0).finish()
    }
}

/// Typed envelope for everything peers exchange over a connection.
///
/// The wire form is JSON with a `type` tag and a type-specific `body`, for example:
///
/// ```json
/// {"type":"REQUEST_CONTENT_BY_HASH","body":{"hash":"..","sender":".."}}
/// ```
///
/// Messages are immutable once constructed; they are created on send and parsed on receive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Message {
    /// Ask all peers who claims to hold the given content hash.
    #[serde(rename = "REQUEST_PEERS_FOR_HASH")]
    RequestPeersForHash { hash: Hash },

    /// Answer a discovery request with the peers known to hold the hash.
    #[serde(rename = "ANNOUNCE_PEERS_FOR_HASH")]
    AnnouncePeersForHash { hash: Hash, peers: Vec<PeerId> },

    /// Ask all peers for the content itself; `sender` is where the answer goes.
    #[serde(rename = "REQUEST_CONTENT_BY_HASH")]
    RequestContentByHash { hash: Hash, sender: PeerId },

    /// Deliver a content record to a requesting peer.
    #[serde(rename = "CONTENT")]
    Content { hash: Hash, content: ContentRecord },
}

impl Message {
    /// Encode the message for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        // All message bodies are plain data, encoding cannot fail.
        serde_json::to_vec(&self).expect("JSON encoder failed on a message")
    }

    /// Decode a wire frame into a message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Error types for wire messages.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Frame is not valid JSON or not a recognized message type.
    #[error("invalid message frame: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use crate::content::Content;
    use crate::hash::Hash;
    use crate::identity::Identity;

    use super::{Message, PeerId};

    #[test]
    fn request_peers_wire_form() {
        let hash = Hash::new(b"test data");
        let message = Message::RequestPeersForHash { hash };
        let json = String::from_utf8(message.to_bytes()).unwrap();
        assert_eq!(
            json,
            format!(
                "{{\"type\":\"REQUEST_PEERS_FOR_HASH\",\"body\":{{\"hash\":\"{}\"}}}}",
                hash.to_hex()
            )
        );
    }

    #[test]
    fn announce_peers_wire_form() {
        let hash = Hash::new(b"test data");
        let message = Message::AnnouncePeersForHash {
            hash,
            peers: vec![PeerId::new("peer-a"), PeerId::new("peer-b")],
        };
        let json = String::from_utf8(message.to_bytes()).unwrap();
        assert!(json.starts_with("{\"type\":\"ANNOUNCE_PEERS_FOR_HASH\""));
        assert!(json.contains("\"peers\":[\"peer-a\",\"peer-b\"]"));
    }

    #[test]
    fn round_trips_every_message_type() {
        let identity = Identity::from_credentials("username", "password").unwrap();
        let content = Content::from_data_and_identity("test data", &identity, None, None);
        let hash = content.hash();

        let messages = [
            Message::RequestPeersForHash { hash },
            Message::AnnouncePeersForHash {
                hash,
                peers: vec![PeerId::new("peer-a")],
            },
            Message::RequestContentByHash {
                hash,
                sender: PeerId::new("peer-b"),
            },
            Message::Content {
                hash,
                content: content.to_record(),
            },
        ];

        for message in messages {
            let parsed = Message::from_bytes(&message.to_bytes()).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn rejects_unknown_type_and_garbage() {
        assert!(Message::from_bytes(b"not even json").is_err());
        assert!(Message::from_bytes(b"{\"type\":\"NOT_A_TYPE\",\"body\":{}}").is_err());
        assert!(Message::from_bytes(b"{\"body\":{}}").is_err());
    }
}
