// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use async_trait::async_trait;
use datt_core::{Content, Hash};

use crate::traits::{ContentStore, StoreError};

/// In-memory content store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    contents: HashMap<Hash, Content>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            contents: Default::default(),
        }
    }

    /// Number of stored content objects.
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_content(&self, hash: &Hash) -> Result<Option<Content>, StoreError> {
        Ok(self.contents.get(hash).cloned())
    }

    async fn put_content(&mut self, content: Content) -> Result<Hash, StoreError> {
        let hash = content.hash();
        self.contents.insert(hash, content);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use datt_core::{Content, Hash, Identity};

    use crate::traits::ContentStore;

    use super::MemoryStore;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let identity = Identity::from_credentials("username", "password").unwrap();
        let content = Content::from_data_and_identity("hello!", &identity, None, None);

        let mut store = MemoryStore::new();
        store.init().await.unwrap();

        let hash = store.put_content(content.clone()).await.unwrap();
        assert_eq!(hash, content.hash());

        let found = store.get_content(&hash).await.unwrap();
        assert_eq!(found, Some(content));
    }

    #[tokio::test]
    async fn miss_is_none_not_an_error() {
        let store = MemoryStore::new();
        let found = store.get_content(&Hash::new(b"unknown")).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn duplicate_hash_overwrites() {
        let identity = Identity::from_credentials("username", "password").unwrap();
        let content = Content::from_data_and_identity("hello!", &identity, None, None);

        let mut store = MemoryStore::new();
        store.put_content(content.clone()).await.unwrap();
        store.put_content(content.clone()).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
