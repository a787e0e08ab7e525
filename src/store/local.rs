// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Store backed by a directory tree.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use tokio::fs;
use tokio_util::io::ReaderStream;

use super::{ObjectBody, ObjectInfo, ObjectStore, ObjectStream, validate_key};
use crate::error::StoreError;

/// Object store rooted at a local directory
///
/// Keys map to paths below the root, with `/` as separator. Writes go to a
/// temporary sibling first and are renamed into place, so readers never see
/// a half-written feed document.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`, which must be an existing directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::Io {
                source: std::io::Error::new(ErrorKind::NotFound, "store root is not a directory"),
                path: root,
            });
        }
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let key = validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        Some(segments?.join("/"))
    }

    async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn not_found_or_io(key: &str, path: &Path, source: std::io::Error) -> StoreError {
    if source.kind() == ErrorKind::NotFound {
        StoreError::NotFound {
            key: key.to_string(),
        }
    } else {
        io_error(path, source)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a> {
        Box::pin(stream! {
            let mut pending = vec![self.root.clone()];

            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        yield Err(io_error(&dir, e));
                        return;
                    }
                };

                // Sort per directory so listings are stable across runs
                let mut found = Vec::new();
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => found.push(entry),
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(io_error(&dir, e));
                            return;
                        }
                    }
                }
                found.sort_by_key(|entry| entry.file_name());

                let mut subdirs = Vec::new();
                for entry in found {
                    let path = entry.path();
                    let file_type = match entry.file_type().await {
                        Ok(file_type) => file_type,
                        Err(e) => {
                            yield Err(io_error(&path, e));
                            return;
                        }
                    };

                    if file_type.is_dir() {
                        subdirs.push(path);
                        continue;
                    }

                    let Some(key) = self.key_for(&path) else {
                        continue;
                    };
                    // Skip in-flight writes
                    if !key.starts_with(prefix) || key.ends_with(".tmp") {
                        continue;
                    }

                    match entry.metadata().await {
                        Ok(metadata) => {
                            yield Ok(ObjectInfo::new(key, metadata.len()));
                        }
                        Err(e) => {
                            yield Err(io_error(&path, e));
                            return;
                        }
                    }
                }

                // Reverse so the stack pops subdirectories in name order
                pending.extend(subdirs.into_iter().rev());
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(key)?;
        fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| not_found_or_io(key, &path, e))
    }

    async fn open(&self, key: &str) -> Result<ObjectBody, StoreError> {
        let path = self.path_for(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, &path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(&path, e))?
            .len();

        let body = ReaderStream::new(file).map_err(move |e| io_error(&path, e));

        Ok(ObjectBody {
            size,
            body: Box::pin(body),
        })
    }

    async fn write(&self, key: &str, data: Bytes, _content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &data).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<(), StoreError> {
        let src_path = self.path_for(src)?;
        let dest_path = self.path_for(dest)?;
        Self::ensure_parent(&dest_path).await?;

        fs::copy(&src_path, &dest_path)
            .await
            .map(|_| ())
            .map_err(|e| not_found_or_io(src, &src_path, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(key, &path, e))
    }
}
