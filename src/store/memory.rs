// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory store for tests and local experiments.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectBody, ObjectInfo, ObjectStore, ObjectStream, validate_key};
use crate::error::StoreError;

/// Store operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Read,
    Write,
    Copy,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// Object store kept entirely in memory
///
/// Objects live in a sorted map, so listings come back in key order.
/// Individual operations can be set up to fail with
/// [`fail`](Self::fail), which is how tests exercise aborted passes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failures: RwLock<HashSet<(Operation, String)>>,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with objects
    pub fn with_objects(
        objects: impl IntoIterator<Item = (impl Into<String>, impl Into<Bytes>)>,
    ) -> Self {
        let objects = objects
            .into_iter()
            .map(|(key, data)| {
                let object = StoredObject {
                    data: data.into(),
                    content_type: "application/octet-stream".to_string(),
                };
                (key.into(), object)
            })
            .collect();

        Self {
            objects: RwLock::new(objects),
            ..Self::default()
        }
    }

    /// Make every future `operation` on `key` fail
    ///
    /// For [`Operation::List`] the key is the listing prefix; for
    /// [`Operation::Copy`] it is the source key.
    pub fn fail(&self, operation: Operation, key: impl Into<String>) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((operation, key.into()));
    }

    /// Stop failing `operation` on `key`
    pub fn heal(&self, operation: Operation, key: &str) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(operation, key.to_string()));
    }

    /// Number of whole-object reads served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Current contents of an object
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.snapshot_object(key).map(|object| object.data)
    }

    /// Content type an object was written with
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.snapshot_object(key).map(|object| object.content_type)
    }


    fn snapshot_object(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn check(&self, operation: Operation, key: &str) -> Result<(), StoreError> {
        let failures = self.failures.read().unwrap_or_else(|e| e.into_inner());
        if failures.contains(&(operation, key.to_string())) {
            return Err(StoreError::Backend {
                operation: operation_name(operation),
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn require(&self, key: &str) -> Result<StoredObject, StoreError> {
        self.snapshot_object(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }
}

fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::List => "list",
        Operation::Read => "read",
        Operation::Write => "write",
        Operation::Copy => "copy",
        Operation::Delete => "delete",
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a> {
        Box::pin(stream! {
            if let Err(e) = self.check(Operation::List, prefix) {
                yield Err(e);
                return;
            }

            // Snapshot under the lock, then yield without holding it
            let matching: Vec<ObjectInfo> = self
                .objects
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, object)| ObjectInfo::new(key.clone(), object.data.len() as u64))
                .collect();

            for info in matching {
                yield Ok(info);
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Bytes, StoreError> {
        validate_key(key)?;
        self.check(Operation::Read, key)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.require(key)?.data)
    }

    async fn open(&self, key: &str) -> Result<ObjectBody, StoreError> {
        validate_key(key)?;
        self.check(Operation::Read, key)?;
        let data = self.require(key)?.data;
        let size = data.len() as u64;

        Ok(ObjectBody {
            size,
            body: Box::pin(futures::stream::once(async move { Ok(data) })),
        })
    }

    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.check(Operation::Write, key)?;
        let object = StoredObject {
            data,
            content_type: content_type.to_string(),
        };
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), object);
        Ok(())
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<(), StoreError> {
        validate_key(src)?;
        validate_key(dest)?;
        self.check(Operation::Copy, src)?;
        let object = self.require(src)?;
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(dest.to_string(), object);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.check(Operation::Delete, key)?;
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }
}
