// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data-types for the datt content-sharing network: content-addressing hashes, cryptographic
//! identities, self-certifying content objects and the peer wire message envelope.

pub mod content;
pub mod hash;
pub mod identity;
pub mod message;
mod serde;

pub use content::{Content, ContentError, ContentRecord, verify_signature};
pub use hash::{HASH_LEN, Hash, HashError};
pub use identity::{
    Address, IDENTITY_KEY_PATH, Identity, IdentityError, IdentityRecord, PrivateKey, PublicKey,
    Signature,
};
pub use message::{Message, MessageError, PeerId};
