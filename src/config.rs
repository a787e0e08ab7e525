// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command line and environment configuration.
//!
//! Every flag can also be set from the environment, so the server can be
//! configured entirely by its deployment platform.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::warn;
use url::Url;

use crate::clock::SharedClock;
use crate::error::ConfigError;
use crate::feed::{ChannelInfo, FeedCache, FeedSettings};
use crate::http::{AppState, FileDelivery};
use crate::process::{DEFAULT_INDEX_KEY, ProcessOptions, Processor};
use crate::progress::SharedProgressReporter;
use crate::scan::{DEFAULT_MEDIA_PREFIX, ScanMode};
use crate::store::{LocalStore, MemoryStore, S3Store, StoreHandle, validate_key};

/// Maintain a podcast feed from audio uploads in an object store
#[derive(Parser, Debug)]
#[command(name = "podindex")]
#[command(about = "Maintain a podcast feed from audio uploads in an object store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "PODINDEX_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the feed over HTTP and accept processing triggers
    Serve(ServeArgs),
    /// Run a single processing pass and exit
    Process(ProcessArgs),
}

/// Which store backend holds the audio and the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    S3,
    Local,
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Store backend
    #[arg(long = "store", env = "PODINDEX_STORE", value_enum, default_value_t = StoreKind::S3)]
    pub kind: StoreKind,

    /// Bucket name (s3)
    #[arg(long, env = "PODINDEX_BUCKET")]
    pub bucket: Option<String>,

    /// Bucket region (s3)
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Endpoint of an S3-compatible service (s3)
    #[arg(long, env = "PODINDEX_S3_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Access key id (s3)
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// Secret access key (s3)
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Root directory (local)
    #[arg(long, env = "PODINDEX_ROOT")]
    pub root: Option<PathBuf>,
}

fn required<'a, T>(
    value: &'a Option<T>,
    name: &'static str,
    context: &'static str,
) -> Result<&'a T, ConfigError> {
    value.as_ref().ok_or(ConfigError::Missing { name, context })
}

impl StoreArgs {
    /// Create the configured store
    pub fn build(&self) -> Result<StoreHandle, ConfigError> {
        match self.kind {
            StoreKind::S3 => {
                const CONTEXT: &str = "s3 store";
                let bucket = required(&self.bucket, "PODINDEX_BUCKET", CONTEXT)?;
                let key_id = required(&self.access_key_id, "AWS_ACCESS_KEY_ID", CONTEXT)?;
                let secret = required(&self.secret_access_key, "AWS_SECRET_ACCESS_KEY", CONTEXT)?;

                Ok(Arc::new(S3Store::new(
                    bucket,
                    &self.region,
                    self.endpoint.clone(),
                    key_id,
                    secret,
                )))
            }
            StoreKind::Local => {
                let root = required(&self.root, "PODINDEX_ROOT", "local store")?;
                Ok(Arc::new(LocalStore::new(root)?))
            }
            StoreKind::Memory => {
                warn!("Using the in-memory store, nothing will be persisted");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FeedArgs {
    /// Key of the feed document
    #[arg(long, env = "PODINDEX_INDEX_OBJECT", default_value = DEFAULT_INDEX_KEY)]
    pub index_key: String,

    /// Prefix audio is published from
    #[arg(long, env = "PODINDEX_MEDIA_PREFIX", default_value = DEFAULT_MEDIA_PREFIX)]
    pub media_prefix: String,

    /// Where new uploads land
    #[arg(long, env = "PODINDEX_SCAN_MODE", value_enum, default_value_t = ScanMode::FlatRoot)]
    pub scan_mode: ScanMode,

    /// Public URL object paths are appended to in enclosure links
    #[arg(long, env = "PODINDEX_PUBLIC_BASE_URL")]
    pub public_base_url: Url,

    /// Advertise audio/mp4 for m4a enclosures instead of audio/mpeg
    #[arg(long, env = "PODINDEX_DETECT_MIME_TYPE")]
    pub detect_mime_type: bool,

    /// Channel title for a newly created feed
    #[arg(long, env = "PODINDEX_CHANNEL_TITLE")]
    pub channel_title: Option<String>,

    /// Channel description for a newly created feed
    #[arg(long, env = "PODINDEX_CHANNEL_DESCRIPTION")]
    pub channel_description: Option<String>,

    /// Channel link for a newly created feed (defaults to the public base URL)
    #[arg(long, env = "PODINDEX_CHANNEL_LINK")]
    pub channel_link: Option<Url>,
}

impl FeedArgs {
    /// Validate and convert into processing options
    pub fn process_options(&self) -> Result<ProcessOptions, ConfigError> {
        if self.public_base_url.cannot_be_a_base() {
            return Err(ConfigError::UnusableBaseUrl(
                self.public_base_url.to_string(),
            ));
        }

        // The prefix doubles as the literal part of the audio route
        let prefix = self.media_prefix.as_str();
        let prefix_ok = prefix.strip_suffix('/').is_some_and(|stem| {
            validate_key(stem).is_ok()
                && stem.split('/').all(|segment| !segment.is_empty())
                && stem
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b"-_./".contains(&b))
        });
        if !prefix_ok {
            return Err(ConfigError::InvalidMediaPrefix(prefix.to_string()));
        }

        let channel = self.channel_title.as_ref().map(|title| ChannelInfo {
            title: title.clone(),
            description: self.channel_description.clone(),
            link: self.channel_link.clone(),
        });

        Ok(ProcessOptions {
            index_key: self.index_key.clone(),
            media_prefix: self.media_prefix.clone(),
            scan_mode: self.scan_mode,
            feed: FeedSettings {
                public_base_url: self.public_base_url.clone(),
                detect_mime_type: self.detect_mime_type,
            },
            channel,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub feed: FeedArgs,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Seconds a fetched feed is served from memory
    #[arg(long, env = "PODINDEX_CACHE_TTL_SECS", default_value_t = 60)]
    pub cache_ttl_secs: u32,

    /// How audio files are handed out
    #[arg(long, env = "PODINDEX_FILE_DELIVERY", value_enum, default_value_t = FileDelivery::Stream)]
    pub file_delivery: FileDelivery,

    /// Lifetime of pre-signed download URLs in seconds
    #[arg(long, env = "PODINDEX_SIGNED_URL_TTL_SECS", default_value_t = 900)]
    pub signed_url_ttl_secs: u64,

    /// Timeout for feed reads and file lookups in seconds
    #[arg(long, env = "PODINDEX_READ_TIMEOUT_SECS", default_value_t = 10)]
    pub read_timeout_secs: u64,

    /// Timeout for a processing pass in seconds
    #[arg(long, env = "PODINDEX_PROCESS_TIMEOUT_SECS", default_value_t = 3300)]
    pub process_timeout_secs: u64,
}

impl ServeArgs {
    /// Build the store, cache and processor behind the HTTP server
    pub fn app_state(
        &self,
        clock: SharedClock,
        reporter: SharedProgressReporter,
    ) -> Result<AppState, ConfigError> {
        let options = self.feed.process_options()?;
        let store = self.store.build()?;

        if self.file_delivery == FileDelivery::Redirect && !store.can_sign() {
            return Err(ConfigError::RedirectUnsupported(store.name()));
        }

        let cache = Arc::new(FeedCache::new(
            store.clone(),
            options.index_key.clone(),
            chrono::Duration::seconds(i64::from(self.cache_ttl_secs)),
            clock.clone(),
        ));
        let processor = Arc::new(Processor::new(
            store.clone(),
            cache.clone(),
            options,
            clock,
            reporter,
        ));

        Ok(AppState {
            store,
            cache,
            processor,
            delivery: self.file_delivery,
            signed_url_ttl: Duration::from_secs(self.signed_url_ttl_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            process_timeout: Duration::from_secs(self.process_timeout_secs),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub feed: FeedArgs,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}
