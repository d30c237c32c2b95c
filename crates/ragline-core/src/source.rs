//! Object store capability.
//!
//! Raw documents live in an object store under a bucket and key. The
//! [`ObjectStore`] trait is the only way the pipeline reads them;
//! [`MemoryObjectStore`] backs tests and embedded use.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's bytes. Fails with [`Error::NotFound`] if absent.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Object key for a document: `{prefix}/{knowledge_base_id}/{filename}`.
///
/// An empty prefix yields `{knowledge_base_id}/{filename}`.
pub fn document_key(prefix: &str, knowledge_base_id: &str, filename: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", knowledge_base_id, filename)
    } else {
        format!("{}/{}/{}", prefix, knowledge_base_id, filename)
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert((bucket.to_string(), key.to_string()), bytes.into());
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::ObjectStoreFailure("object map lock poisoned".into()))?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("s3://{}/{}", bucket, key)))
    }
}
