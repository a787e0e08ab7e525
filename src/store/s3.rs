// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! S3-compatible store.
//!
//! Works against AWS S3 and S3-compatible services (MinIO, Backblaze B2,
//! Google Cloud Storage interoperability mode, ...). Credentials are passed
//! explicitly from configuration.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream as S3ByteStream,
};
use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

use super::{ObjectBody, ObjectInfo, ObjectStore, ObjectStream, validate_key};
use crate::error::StoreError;

/// Store backed by an S3 bucket
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Create a store for `bucket`
    ///
    /// `endpoint` selects an S3-compatible service other than AWS; path-style
    /// addressing is always used for compatibility with those services.
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        let credentials = Credentials::new(key_id, key_secret, None, None, "podindex-config");
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            .force_path_style(true);
        if let Some(endpoint) = endpoint {
            config = config.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(config.build()),
            bucket: bucket.into(),
        }
    }
}

fn backend_error(
    operation: &'static str,
    key: &str,
    error: impl std::error::Error,
) -> StoreError {
    StoreError::Backend {
        operation,
        key: key.to_string(),
        message: DisplayErrorContext(error).to_string(),
    }
}

/// Bytes escaped in an `x-amz-copy-source` key: everything but unreserved characters and `/`
const COPY_SOURCE_ESCAPED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE_ESCAPED))
}

fn object_size(size: Option<i64>) -> u64 {
    size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0)
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a> {
        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .into_paginator()
                .send();

            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(backend_error("list", prefix, e));
                        return;
                    }
                };

                for object in page.contents() {
                    let Some(key) = object.key() else {
                        continue;
                    };
                    // Zero-byte "directory" placeholders
                    if key.ends_with('/') {
                        continue;
                    }
                    yield Ok(ObjectInfo::new(key, object_size(object.size())));
                }
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Bytes, StoreError> {
        let opened = self.get_object(key).await?;
        let data = opened
            .body
            .collect()
            .await
            .map_err(|e| backend_error("read", key, e))?;
        Ok(data.into_bytes())
    }

    async fn open(&self, key: &str) -> Result<ObjectBody, StoreError> {
        let opened = self.get_object(key).await?;
        let size = object_size(opened.content_length());
        let mut body = opened.body;
        let key = key.to_string();

        let body = stream! {
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        yield Err(backend_error("open", &key, e));
                        break;
                    }
                }
            }
        };

        Ok(ObjectBody {
            size,
            body: Box::pin(body),
        })
    }

    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        let key = validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| backend_error("write", key, e))
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<(), StoreError> {
        let src = validate_key(src)?;
        let dest = validate_key(dest)?;
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source(&self.bucket, src))
            .key(dest)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| backend_error("copy", src, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = validate_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| backend_error("delete", key, e))
    }

    fn can_sign(&self) -> bool {
        true
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<Url, StoreError> {
        let key = validate_key(key)?;
        let presigning =
            PresigningConfig::expires_in(ttl).map_err(|e| backend_error("signed_url", key, e))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| backend_error("signed_url", key, e))?;

        Url::parse(request.uri()).map_err(|e| backend_error("signed_url", key, e))
    }
}

impl S3Store {
    async fn get_object(
        &self,
        key: &str,
    ) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput, StoreError> {
        let key = validate_key(key)?;
        self.client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StoreError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    backend_error("read", key, e)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_keeps_slashes() {
        assert_eq!(copy_source("bucket", "files/a.mp3"), "bucket/files/a.mp3");
    }

    #[test]
    fn copy_source_encodes_spaces_and_symbols() {
        assert_eq!(
            copy_source("bucket", "my show & more.mp3"),
            "bucket/my%20show%20%26%20more.mp3"
        );
    }

    #[test]
    fn copy_source_keeps_unreserved_marks() {
        assert_eq!(copy_source("b", "my-show_01.v2~final.mp3"), "b/my-show_01.v2~final.mp3");
        assert_eq!(copy_source("b", "a+b=c?.mp3"), "b/a%2Bb%3Dc%3F.mp3");
    }

    #[test]
    fn copy_source_encodes_utf8_bytes() {
        assert_eq!(copy_source("b", "é.mp3"), "b/%C3%A9.mp3");
    }

    #[test]
    fn negative_or_missing_sizes_become_zero() {
        assert_eq!(object_size(Some(42)), 42);
        assert_eq!(object_size(Some(-1)), 0);
        assert_eq!(object_size(None), 0);
    }

    #[tokio::test]
    async fn s3_store_can_sign() {
        let store = S3Store::new("bucket", "us-east-1", None, "key", "secret");
        assert!(store.can_sign());
        assert_eq!(store.name(), "s3");
    }

    #[tokio::test]
    async fn presigned_url_points_at_object() {
        let store = S3Store::new(
            "podcasts",
            "us-east-1",
            Some("https://s3.example.com".to_string()),
            "key",
            "secret",
        );

        let url = store
            .signed_url("files/a.mp3", Duration::from_secs(900))
            .await
            .unwrap();

        assert_eq!(url.host_str(), Some("s3.example.com"));
        assert_eq!(url.path(), "/podcasts/files/a.mp3");
        assert!(url.query().unwrap_or("").contains("X-Amz-Expires=900"));
    }
}
