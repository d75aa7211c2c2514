// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use datt_core::{Content, Hash};
use thiserror::Error;

/// Persistence interface for content objects, keyed by content hash.
///
/// A missing entry is `Ok(None)`, not an error: whether a local miss is fatal is for the caller
/// to decide (the node falls back to the network on one).
#[async_trait]
pub trait ContentStore: Send + 'static {
    /// Prepare the store for use.
    async fn init(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Get a piece of content by its hash.
    async fn get_content(&self, hash: &Hash) -> Result<Option<Content>, StoreError>;

    /// Persist a piece of content, returning its hash.
    ///
    /// Content with an identical hash is considered equal; storing it again overwrites the
    /// existing entry.
    async fn put_content(&mut self, content: Content) -> Result<Hash, StoreError>;
}

/// Error types for content stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error occurred in the storage backend.
    #[error("error occurred in content store: {0}")]
    Backend(String),
}
