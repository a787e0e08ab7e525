// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by object store backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store request '{operation}' failed for {key}: {message}")]
    Backend {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("Operation '{operation}' is not supported by the {store} store")]
    Unsupported {
        operation: &'static str,
        store: &'static str,
    },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Whether the error means the object simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors that can occur while moving an object under the media prefix
#[derive(Error, Debug)]
pub enum PromoteError {
    #[error("Failed to copy {src} to {dest}: {source}")]
    CopyFailed {
        src: String,
        dest: String,
        #[source]
        source: StoreError,
    },

    #[error("Copied {src} to {dest} but failed to delete the source: {source}")]
    DeleteFailed {
        src: String,
        dest: String,
        #[source]
        source: StoreError,
    },
}

/// Errors that abort a processing pass
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to read feed document {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Feed document {key} is not valid UTF-8")]
    InvalidUtf8 { key: String },

    #[error("Failed to list audio objects: {0}")]
    List(#[source] StoreError),

    #[error("Promotion error: {0}")]
    Promote(#[from] PromoteError),

    #[error("Failed to write feed document {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Processing did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Errors in startup configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {name} (required by the {context})")]
    Missing {
        name: &'static str,
        context: &'static str,
    },

    #[error("Public base URL '{0}' cannot be used as a base for enclosure links")]
    UnusableBaseUrl(String),

    #[error(
        "Media prefix '{0}' must be a relative key ending in '/', made of letters, digits, '-', '_' and '.'"
    )]
    InvalidMediaPrefix(String),

    #[error("File delivery 'redirect' requires a store that can pre-sign URLs, but '{0}' cannot")]
    RedirectUnsupported(&'static str),

    #[error("Failed to initialize store: {0}")]
    Store(#[from] StoreError),
}
