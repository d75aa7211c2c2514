// SPDX-License-Identifier: MIT OR Apache-2.0

//! Self-certifying content objects.
//!
//! A `Content` carries a string payload plus optional owner metadata (username, address, public
//! key), an optional post time and height, and an optional signature over the payload. Owner
//! metadata is identity-bound: an address must match the one derived from the public key, a
//! signature must verify against the payload under that key. Every mutation re-checks the full
//! binding against a candidate field set and leaves the entity untouched when the check fails.
//!
//! Content is addressed by the SHA-256 hash of its canonical record with the signature field
//! omitted: the hash covers payload and owner metadata, the signature covers the payload alone.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Hash;
use crate::identity::{Address, Identity, PublicKey, Signature};

/// A content object exchanged between peers.
#[derive(Clone)]
pub struct Content {
    data: String,
    owner_username: Option<String>,
    owner_address: Option<Address>,
    owner_pubkey: Option<PublicKey>,
    post_time: Option<DateTime<Utc>>,
    post_height: Option<u64>,
    signature: Option<Signature>,
}

impl Content {
    /// Content carrying only a payload, no owner metadata.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            owner_username: None,
            owner_address: None,
            owner_pubkey: None,
            post_time: None,
            post_height: None,
            signature: None,
        }
    }

    /// Content owned and signed by the given identity.
    pub fn from_data_and_identity(
        data: impl Into<String>,
        identity: &Identity,
        post_time: Option<DateTime<Utc>>,
        post_height: Option<u64>,
    ) -> Self {
        let data = data.into();
        let signature = identity.sign(&data);
        Self {
            data,
            owner_username: Some(identity.username().to_string()),
            owner_address: Some(identity.address().clone()),
            owner_pubkey: Some(*identity.public_key()),
            post_time,
            post_height,
            signature: Some(signature),
        }
    }

    /// Reconstruct content from its canonical record, checking the identity binding.
    ///
    /// Cross-checks run in a fixed order: the address against the public key first, then the
    /// signature against the public key. An address without a public key is accepted as-is; a
    /// public key without an address derives the address.
    pub fn from_record(record: ContentRecord) -> Result<Self, ContentError> {
        validate_binding(
            &record.data,
            record.owner_address.as_ref(),
            record.owner_pubkey.as_ref(),
            record.signature.as_ref(),
        )?;

        let owner_address = match (&record.owner_address, &record.owner_pubkey) {
            (None, Some(public_key)) => Some(public_key.address()),
            (address, _) => address.clone(),
        };

        Ok(Self {
            data: record.data,
            owner_username: record.owner_username,
            owner_address,
            owner_pubkey: record.owner_pubkey,
            post_time: record.post_time,
            post_height: record.post_height,
            signature: record.signature,
        })
    }

    /// Reconstruct content from a plain JSON value.
    ///
    /// Rejects anything that is not an object with at least a `data` field.
    pub fn from_object(value: serde_json::Value) -> Result<Self, ContentError> {
        let record: ContentRecord =
            serde_json::from_value(value).map_err(ContentError::NotInitializable)?;
        Self::from_record(record)
    }

    /// Reconstruct content from its serialized JSON form.
    pub fn from_json(raw: &str) -> Result<Self, ContentError> {
        let record: ContentRecord =
            serde_json::from_str(raw).map_err(ContentError::NotInitializable)?;
        Self::from_record(record)
    }

    /// Set the owner address.
    ///
    /// Requires a match with the already-set public key, if any. On failure the entity is
    /// unchanged.
    pub fn set_owner_address(&mut self, address: Address) -> Result<(), ContentError> {
        validate_binding(
            &self.data,
            Some(&address),
            self.owner_pubkey.as_ref(),
            self.signature.as_ref(),
        )?;
        self.owner_address = Some(address);
        Ok(())
    }

    /// Set the owner public key.
    ///
    /// Requires a match with the already-set address, if any; derives and sets the address when
    /// it is unset. On failure the public key remains unset.
    pub fn set_owner_pubkey(&mut self, public_key: PublicKey) -> Result<(), ContentError> {
        validate_binding(
            &self.data,
            self.owner_address.as_ref(),
            Some(&public_key),
            self.signature.as_ref(),
        )?;
        if self.owner_address.is_none() {
            self.owner_address = Some(public_key.address());
        }
        self.owner_pubkey = Some(public_key);
        Ok(())
    }

    /// Set the signature over the payload.
    ///
    /// Requires verification against the already-set public key, if any. On failure the
    /// signature remains unset.
    pub fn set_signature(&mut self, signature: Signature) -> Result<(), ContentError> {
        validate_binding(
            &self.data,
            self.owner_address.as_ref(),
            self.owner_pubkey.as_ref(),
            Some(&signature),
        )?;
        self.signature = Some(signature);
        Ok(())
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// UTF-8 bytes of the payload.
    pub fn data_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn owner_username(&self) -> Option<&str> {
        self.owner_username.as_deref()
    }

    pub fn owner_address(&self) -> Option<&Address> {
        self.owner_address.as_ref()
    }

    pub fn owner_pubkey(&self) -> Option<&PublicKey> {
        self.owner_pubkey.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn post_time(&self) -> Option<DateTime<Utc>> {
        self.post_time
    }

    pub fn post_height(&self) -> Option<u64> {
        self.post_height
    }

    /// Canonical bytes the content hash is computed over: the serialized record with the
    /// signature field omitted.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct CanonicalFields<'a> {
            data: &'a str,
            owner_username: Option<&'a str>,
            owner_pubkey: Option<&'a PublicKey>,
            owner_address: Option<&'a Address>,
            #[serde(with = "crate::serde::timestamp_opt")]
            post_time: Option<DateTime<Utc>>,
            post_height: Option<u64>,
        }

        let fields = CanonicalFields {
            data: &self.data,
            owner_username: self.owner_username.as_deref(),
            owner_pubkey: self.owner_pubkey.as_ref(),
            owner_address: self.owner_address.as_ref(),
            post_time: self.post_time,
            post_height: self.post_height,
        };

        serde_json::to_vec(&fields).expect("canonical content fields are always serializable")
    }

    /// Content hash: SHA-256 over [`canonical_bytes`](Self::canonical_bytes). Pure,
    /// deterministic and independent of the signature field.
    pub fn hash(&self) -> Hash {
        Hash::new(self.canonical_bytes())
    }

    pub fn hash_hex(&self) -> String {
        self.hash().to_hex()
    }

    /// The canonical record form of this content.
    pub fn to_record(&self) -> ContentRecord {
        ContentRecord {
            data: self.data.clone(),
            owner_username: self.owner_username.clone(),
            owner_pubkey: self.owner_pubkey,
            owner_address: self.owner_address.clone(),
            post_time: self.post_time,
            post_height: self.post_height,
            signature: self.signature,
        }
    }

    /// Serialize to the canonical JSON record with the fixed key order `data, owner_username,
    /// owner_pubkey, owner_address, post_time, post_height, signature`.
    pub fn serialize(&self) -> String {
        serde_json::to_string(&self.to_record())
            .expect("canonical content record is always serializable")
    }
}

impl PartialEq for Content {
    fn eq(&self, other: &Self) -> bool {
        self.hash().eq(&other.hash())
    }
}

impl Eq for Content {}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("hash", &self.hash_hex())
            .field("data", &self.data)
            .field("owner_username", &self.owner_username)
            .finish_non_exhaustive()
    }
}

/// Canonical serialized form of a [`Content`]. Field order is the wire key order; absent fields
/// serialize as `null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub data: String,
    #[serde(default)]
    pub owner_username: Option<String>,
    #[serde(default)]
    pub owner_pubkey: Option<PublicKey>,
    #[serde(default)]
    pub owner_address: Option<Address>,
    #[serde(default, with = "crate::serde::timestamp_opt")]
    pub post_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub post_height: Option<u64>,
    #[serde(default)]
    pub signature: Option<Signature>,
}

/// Check the identity binding for a candidate field set.
///
/// Both cross-checks hold at all times: an address set alongside a public key must equal the
/// derived address, a signature set alongside a public key must verify against the payload.
fn validate_binding(
    data: &str,
    owner_address: Option<&Address>,
    owner_pubkey: Option<&PublicKey>,
    signature: Option<&Signature>,
) -> Result<(), ContentError> {
    if let (Some(address), Some(public_key)) = (owner_address, owner_pubkey) {
        if address != &public_key.address() {
            return Err(ContentError::AddressMismatch);
        }
    }

    if let (Some(signature), Some(public_key)) = (signature, owner_pubkey) {
        if !public_key.verify(&Hash::new(data), signature) {
            return Err(ContentError::SignatureMismatch);
        }
    }

    Ok(())
}

/// Check a `(data, signature, public key)` tuple for consistency.
///
/// Returns `false` for a structurally valid but non-matching signature; malformed material never
/// reaches this function because it fails at parse time.
pub fn verify_signature(data: &str, signature: &Signature, public_key: &PublicKey) -> bool {
    public_key.verify(&Hash::new(data), signature)
}

/// Error types for `Content` entities.
#[derive(Error, Debug)]
pub enum ContentError {
    /// Input record is missing, not an object or lacks the `data` field.
    #[error("record cannot be initialized into content: {0}")]
    NotInitializable(#[source] serde_json::Error),

    /// Owner address does not equal the address derived from the owner public key.
    #[error("owner address does not match the owner public key")]
    AddressMismatch,

    /// Signature does not verify against the payload under the owner public key.
    #[error("signature does not verify against the content data")]
    SignatureMismatch,
}
