// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Object store abstraction.
//!
//! The feed pipeline only needs a handful of operations from the bucket that
//! holds audio uploads and the feed document: list by prefix, whole-object
//! reads and writes, streaming reads, server-side copy, delete and (where the
//! backend supports it) pre-signed download URLs. [`ObjectStore`] captures
//! exactly that, so tests can run against [`MemoryStore`] and deployments
//! against [`S3Store`] or [`LocalStore`].

mod local;
mod memory;
mod s3;

pub use self::local::LocalStore;
pub use self::memory::{MemoryStore, Operation};
pub use self::s3::S3Store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use url::Url;

use crate::error::StoreError;

/// Stream of object descriptors produced by a listing
pub type ObjectStream<'a> = BoxStream<'a, Result<ObjectInfo, StoreError>>;

/// A streaming object body
pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// A shared handle to a store
pub type StoreHandle = Arc<dyn ObjectStore>;

/// Key and size of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Object opened for streaming, with its length
pub struct ObjectBody {
    /// Object size in bytes
    pub size: u64,
    /// Object contents as a stream of chunks
    pub body: ByteStream,
}

/// Operations the feed pipeline needs from a bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name, used in logs and errors
    fn name(&self) -> &'static str;

    /// List every object whose key starts with `prefix`, nested keys included
    ///
    /// The stream is lazy and finite. Each call enumerates the store again.
    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a>;

    /// Read a whole object
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist.
    async fn read(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Open an object for streaming
    async fn open(&self, key: &str) -> Result<ObjectBody, StoreError>;

    /// Create or replace an object
    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;

    /// Copy an object to a new key, replacing any object already there
    async fn copy(&self, src: &str, dest: &str) -> Result<(), StoreError>;

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether [`signed_url`](Self::signed_url) is available
    fn can_sign(&self) -> bool {
        false
    }

    /// Create a time-limited URL granting read access to an object
    async fn signed_url(&self, _key: &str, _ttl: Duration) -> Result<Url, StoreError> {
        Err(StoreError::Unsupported {
            operation: "signed_url",
            store: self.name(),
        })
    }
}

/// Reject keys that could escape the store root or are otherwise malformed
pub fn validate_key(key: &str) -> Result<&str, StoreError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment == ".." || segment == ".");

    if invalid {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(key)
    }
}
