// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use futures::{StreamExt, TryStreamExt, future};

use crate::episode::is_audio_name;
use crate::error::PromoteError;
use crate::store::{ObjectStore, ObjectStream};

/// Default prefix audio objects are published from
pub const DEFAULT_MEDIA_PREFIX: &str = "files/";

/// Where new uploads are expected to land
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ScanMode {
    /// Uploads land at the bucket root and are moved under the media prefix
    #[default]
    FlatRoot,
    /// Uploads land directly under the media prefix
    Prefixed,
}

/// Lazily list audio objects under `prefix`, nested keys included
pub fn list_audio_objects<'a>(store: &'a dyn ObjectStore, prefix: &'a str) -> ObjectStream<'a> {
    store
        .list(prefix)
        .try_filter(|object| future::ready(is_audio_name(&object.key)))
        .boxed()
}

/// Lazily list audio objects sitting directly at the bucket root
///
/// Anything inside a "folder" is left alone, including objects already
/// under the media prefix.
pub fn list_root_audio_objects(store: &dyn ObjectStore) -> ObjectStream<'_> {
    store
        .list("")
        .try_filter(|object| future::ready(!object.key.contains('/') && is_audio_name(&object.key)))
        .boxed()
}

/// Key an object ends up at once promoted
pub fn promoted_key(key: &str, media_prefix: &str) -> String {
    if key.starts_with(media_prefix) {
        key.to_string()
    } else {
        format!("{media_prefix}{key}")
    }
}

/// Move an object under the media prefix
///
/// Stores have no rename, so this copies and then deletes the source. If the
/// copy fails nothing is deleted. If the delete fails the object exists at
/// both keys until a later promotion of the same source copies it again and
/// retries the delete. Objects already under the prefix are left untouched.
///
/// Returns the promoted key.
pub async fn promote(
    store: &dyn ObjectStore,
    key: &str,
    media_prefix: &str,
) -> Result<String, PromoteError> {
    let dest = promoted_key(key, media_prefix);
    if dest == key {
        return Ok(dest);
    }

    store
        .copy(key, &dest)
        .await
        .map_err(|e| PromoteError::CopyFailed {
            src: key.to_string(),
            dest: dest.clone(),
            source: e,
        })?;

    store
        .delete(key)
        .await
        .map_err(|e| PromoteError::DeleteFailed {
            src: key.to_string(),
            dest: dest.clone(),
            source: e,
        })?;

    Ok(dest)
}
