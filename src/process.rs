// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::clock::{Clock, SharedClock};
use crate::episode::{EpisodeRecord, derive_episode};
use crate::error::ProcessError;
use crate::feed::{
    ChannelInfo, FEED_CONTENT_TYPE, FeedCache, FeedSettings, merge_feed, published_object_paths,
    render_preamble,
};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::scan::{
    DEFAULT_MEDIA_PREFIX, ScanMode, list_audio_objects, list_root_audio_objects, promote,
};
use crate::store::{ObjectInfo, ObjectStore, StoreHandle};

/// Default key of the feed document
pub const DEFAULT_INDEX_KEY: &str = "index.xml";

/// Options for a processing pass
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Key of the feed document
    pub index_key: String,
    /// Prefix audio objects are published from, ending in `/`
    pub media_prefix: String,
    /// Where new uploads are expected
    pub scan_mode: ScanMode,
    /// How new items are rendered
    pub feed: FeedSettings,
    /// Channel header for a brand-new document (None = start from nothing)
    pub channel: Option<ChannelInfo>,
}

impl ProcessOptions {
    pub fn new(feed: FeedSettings) -> Self {
        Self {
            index_key: DEFAULT_INDEX_KEY.to_string(),
            media_prefix: DEFAULT_MEDIA_PREFIX.to_string(),
            scan_mode: ScanMode::default(),
            feed,
            channel: None,
        }
    }
}

/// Result of a processing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    /// Number of uploads moved under the media prefix
    pub promoted: usize,
    /// Number of new items added to the feed
    pub published: usize,
    /// Number of audio objects that already had an item
    pub skipped: usize,
    /// Whether the feed document was written
    pub written: bool,
}

/// Run one processing pass against the store
///
/// This is the pipeline behind `POST /process`. It:
/// 1. Reads the feed document (a missing document starts a new one)
/// 2. In flat-root mode, moves root uploads under the media prefix
/// 3. Lists audio under the media prefix, skipping already published paths
/// 4. Appends an item per new object and writes the document back
///
/// Any listing or promotion failure aborts the pass before the document is
/// written and is reported as [`ProgressEvent::ProcessFailed`]. Objects
/// promoted before the failure stay promoted and are published by the next
/// pass.
pub async fn process_feed(
    store: &dyn ObjectStore,
    options: &ProcessOptions,
    clock: &dyn Clock,
    reporter: &SharedProgressReporter,
) -> Result<ProcessResult, ProcessError> {
    let outcome = run_pass(store, options, clock, reporter).await;
    if let Err(e) = &outcome {
        reporter.report(ProgressEvent::ProcessFailed {
            error: e.to_string(),
        });
    }
    outcome
}

async fn run_pass(
    store: &dyn ObjectStore,
    options: &ProcessOptions,
    clock: &dyn Clock,
    reporter: &SharedProgressReporter,
) -> Result<ProcessResult, ProcessError> {
    let key = options.index_key.as_str();
    let mut result = ProcessResult::default();

    reporter.report(ProgressEvent::ReadingFeed {
        key: key.to_string(),
    });
    let existing = read_document(store, key).await?;
    if existing.is_none() {
        reporter.report(ProgressEvent::FeedMissing {
            key: key.to_string(),
        });
    }

    if options.scan_mode == ScanMode::FlatRoot {
        reporter.report(ProgressEvent::ScanningObjects {
            prefix: String::new(),
        });
        // Collect first so promotions never race the listing
        let uploads: Vec<ObjectInfo> = list_root_audio_objects(store)
            .try_collect()
            .await
            .map_err(ProcessError::List)?;

        for upload in uploads {
            let dest = promote(store, &upload.key, &options.media_prefix).await?;
            reporter.report(ProgressEvent::ObjectPromoted {
                src: upload.key,
                dest,
            });
            result.promoted += 1;
        }
    }

    let published = existing
        .as_deref()
        .map(|document| published_object_paths(document, &options.feed))
        .unwrap_or_default();

    reporter.report(ProgressEvent::ScanningObjects {
        prefix: options.media_prefix.clone(),
    });
    let candidates: Vec<ObjectInfo> = list_audio_objects(store, &options.media_prefix)
        .try_collect()
        .await
        .map_err(ProcessError::List)?;

    let mut records: Vec<EpisodeRecord> = Vec::new();
    for object in candidates {
        if published.contains(&object.key) {
            reporter.report(ProgressEvent::AlreadyPublished {
                object_path: object.key,
            });
            result.skipped += 1;
            continue;
        }

        let record = derive_episode(&object.key, object.size, clock);
        reporter.report(ProgressEvent::EpisodeDiscovered {
            title: record.title.clone(),
            object_path: record.object_path.clone(),
            size_bytes: record.size_bytes,
        });
        records.push(record);
    }
    result.published = records.len();

    // Nothing new and nothing to create
    if records.is_empty() && existing.is_some() {
        report_completed(reporter, &result);
        return Ok(result);
    }

    let base = match (existing, &options.channel) {
        (Some(document), _) => document,
        (None, Some(channel)) => render_preamble(channel, &options.feed),
        (None, None) => String::new(),
    };
    let document = merge_feed(&base, &records, &options.feed);
    let bytes = document.len();

    store
        .write(key, Bytes::from(document), FEED_CONTENT_TYPE)
        .await
        .map_err(|source| ProcessError::Write {
            key: key.to_string(),
            source,
        })?;
    result.written = true;

    reporter.report(ProgressEvent::FeedWritten {
        key: key.to_string(),
        new_items: records.len(),
        bytes,
    });
    report_completed(reporter, &result);

    Ok(result)
}

async fn read_document(store: &dyn ObjectStore, key: &str) -> Result<Option<String>, ProcessError> {
    match store.read(key).await {
        Ok(bytes) => String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| ProcessError::InvalidUtf8 {
                key: key.to_string(),
            }),
        Err(e) if e.is_not_found() => Ok(None),
        Err(source) => Err(ProcessError::Read {
            key: key.to_string(),
            source,
        }),
    }
}

fn report_completed(reporter: &SharedProgressReporter, result: &ProcessResult) {
    reporter.report(ProgressEvent::ProcessCompleted {
        promoted: result.promoted,
        published: result.published,
        skipped: result.skipped,
        written: result.written,
    });
}

/// Runs processing passes one at a time and keeps the feed cache in step
///
/// Passes are serialized with an in-process mutex. This does not guard
/// against a second instance writing the same bucket.
pub struct Processor {
    store: StoreHandle,
    cache: Arc<FeedCache>,
    options: ProcessOptions,
    clock: SharedClock,
    reporter: SharedProgressReporter,
    running: Mutex<()>,
}

impl Processor {
    pub fn new(
        store: StoreHandle,
        cache: Arc<FeedCache>,
        options: ProcessOptions,
        clock: SharedClock,
        reporter: SharedProgressReporter,
    ) -> Self {
        if cache.key() != options.index_key {
            warn!(
                cache_key = cache.key(),
                index_key = %options.index_key,
                "Feed cache and processing pass use different keys"
            );
        }

        Self {
            store,
            cache,
            options,
            clock,
            reporter,
            running: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Run one pass, waiting for any pass already in flight
    ///
    /// The cache is invalidated only after the document was written.
    pub async fn run(&self) -> Result<ProcessResult, ProcessError> {
        let _guard = self.running.lock().await;

        let result = process_feed(
            self.store.as_ref(),
            &self.options,
            self.clock.as_ref(),
            &self.reporter,
        )
        .await?;

        if result.written {
            self.cache.invalidate().await;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::{DEFAULT_TTL, TRAILER};
    use crate::progress::{NoopReporter, RecordingReporter};
    use crate::store::{MemoryStore, Operation};
    use chrono::{DateTime, Utc};
    use url::Url;

    const EXISTING_FEED: &str = "<?xml version=\"1.0\"?>\n<rss version=\"2.0\">\n<channel>\n<title>Show</title>\n</channel>\n</rss>\n";

    fn clock() -> ManualClock {
        let start = DateTime::parse_from_rfc3339("2006-01-02T15:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        ManualClock::new(start)
    }

    fn options(scan_mode: ScanMode) -> ProcessOptions {
        let feed = FeedSettings::new(Url::parse("https://cdn.example.com/podcast").unwrap());
        ProcessOptions {
            scan_mode,
            ..ProcessOptions::new(feed)
        }
    }

    async fn run(store: &MemoryStore, options: &ProcessOptions) -> Result<ProcessResult, ProcessError> {
        process_feed(store, options, &clock(), &NoopReporter::shared()).await
    }

    fn document(store: &MemoryStore) -> String {
        String::from_utf8(store.get("index.xml").unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn creates_feed_from_prefixed_object() {
        let store = MemoryStore::with_objects([("files/my_show_01.mp3", vec![0u8; 1024])]);

        let result = run(&store, &options(ScanMode::FlatRoot)).await.unwrap();

        assert_eq!(
            result,
            ProcessResult {
                promoted: 0,
                published: 1,
                skipped: 0,
                written: true,
            }
        );

        let feed = document(&store);
        assert!(feed.contains("<title>my show</title>"));
        assert!(feed.contains(
            "url=\"https://cdn.example.com/podcast/files/my_show_01.mp3\" length=\"1024\" type=\"audio/mpeg\""
        ));
        assert!(feed.contains("<pubDate>Mon, 2 Jan 2006 15:04:05 +0000</pubDate>"));
        assert!(feed.ends_with(TRAILER));
        assert_eq!(
            store.content_type("index.xml").unwrap(),
            "application/rss+xml; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn flat_root_uploads_are_promoted_and_published() {
        let store = MemoryStore::with_objects([
            ("index.xml", EXISTING_FEED.as_bytes().to_vec()),
            ("episode_1.mp3", vec![0u8; 10]),
            ("notes.txt", vec![0u8; 3]),
        ]);

        let result = run(&store, &options(ScanMode::FlatRoot)).await.unwrap();

        assert_eq!(result.promoted, 1);
        assert_eq!(result.published, 1);
        assert!(store.get("episode_1.mp3").is_none());
        assert!(store.get("files/episode_1.mp3").is_some());
        assert!(store.get("notes.txt").is_some());

        let feed = document(&store);
        assert!(feed.starts_with("<?xml version=\"1.0\"?>\n<rss version=\"2.0\">\n<channel>\n<title>Show</title>\n     <item>"));
        assert!(feed.contains("files/episode_1.mp3"));
    }

    #[tokio::test]
    async fn rerun_does_not_duplicate_items() {
        let store = MemoryStore::with_objects([("files/a.mp3", vec![0u8; 4])]);
        let options = options(ScanMode::FlatRoot);

        run(&store, &options).await.unwrap();
        let first = document(&store);

        let result = run(&store, &options).await.unwrap();
        assert_eq!(result.published, 0);
        assert_eq!(result.skipped, 1);
        assert!(!result.written);
        assert_eq!(document(&store), first);
        assert_eq!(first.matches("<item>").count(), 1);
    }

    async fn run_recorded(store: &MemoryStore, options: &ProcessOptions) -> Vec<ProgressEvent> {
        let recorder = Arc::new(RecordingReporter::default());
        let reporter: SharedProgressReporter = recorder.clone();
        let _ = process_feed(store, options, &clock(), &reporter).await;
        recorder.events()
    }

    #[tokio::test]
    async fn pass_reports_promotion_before_discovery() {
        let store = MemoryStore::with_objects([
            ("index.xml", EXISTING_FEED.as_bytes().to_vec()),
            ("a.mp3", vec![0u8; 4]),
        ]);

        let events = run_recorded(&store, &options(ScanMode::FlatRoot)).await;

        assert_eq!(
            events,
            vec![
                ProgressEvent::ReadingFeed {
                    key: "index.xml".to_string(),
                },
                ProgressEvent::ScanningObjects {
                    prefix: String::new(),
                },
                ProgressEvent::ObjectPromoted {
                    src: "a.mp3".to_string(),
                    dest: "files/a.mp3".to_string(),
                },
                ProgressEvent::ScanningObjects {
                    prefix: "files/".to_string(),
                },
                ProgressEvent::EpisodeDiscovered {
                    title: "a".to_string(),
                    object_path: "files/a.mp3".to_string(),
                    size_bytes: 4,
                },
                ProgressEvent::FeedWritten {
                    key: "index.xml".to_string(),
                    new_items: 1,
                    bytes: document(&store).len(),
                },
                ProgressEvent::ProcessCompleted {
                    promoted: 1,
                    published: 1,
                    skipped: 0,
                    written: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn unchanged_pass_reports_no_write() {
        let store = MemoryStore::with_objects([("files/a.mp3", vec![0u8; 4])]);
        let options = options(ScanMode::Prefixed);
        run(&store, &options).await.unwrap();

        let events = run_recorded(&store, &options).await;

        assert_eq!(
            events,
            vec![
                ProgressEvent::ReadingFeed {
                    key: "index.xml".to_string(),
                },
                ProgressEvent::ScanningObjects {
                    prefix: "files/".to_string(),
                },
                ProgressEvent::AlreadyPublished {
                    object_path: "files/a.mp3".to_string(),
                },
                ProgressEvent::ProcessCompleted {
                    promoted: 0,
                    published: 0,
                    skipped: 1,
                    written: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_feed_and_failure_are_reported() {
        let store = MemoryStore::with_objects([("files/a.mp3", vec![0u8; 4])]);
        store.fail(Operation::List, "files/");

        let events = run_recorded(&store, &options(ScanMode::Prefixed)).await;

        assert_eq!(
            events[1],
            ProgressEvent::FeedMissing {
                key: "index.xml".to_string(),
            }
        );
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::ProcessFailed { error }) if error.contains("files/")
        ));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ProgressEvent::FeedWritten { .. }))
        );
    }

    #[tokio::test]
    async fn failed_listing_writes_nothing() {
        let store = MemoryStore::with_objects([
            ("index.xml", EXISTING_FEED.as_bytes().to_vec()),
            ("files/a.mp3", vec![0u8; 4]),
        ]);
        store.fail(Operation::List, "files/");

        let err = run(&store, &options(ScanMode::Prefixed)).await.unwrap_err();

        assert!(matches!(err, ProcessError::List(_)));
        assert_eq!(document(&store), EXISTING_FEED);
    }

    #[tokio::test]
    async fn failed_promotion_aborts_and_retry_publishes() {
        let store = MemoryStore::with_objects([
            ("index.xml", EXISTING_FEED.as_bytes().to_vec()),
            ("a.mp3", vec![0u8; 4]),
            ("b.mp3", vec![0u8; 5]),
        ]);
        store.fail(Operation::Copy, "b.mp3");
        let options = options(ScanMode::FlatRoot);

        let err = run(&store, &options).await.unwrap_err();
        assert!(matches!(err, ProcessError::Promote(_)));
        assert_eq!(document(&store), EXISTING_FEED);
        // a.mp3 stays promoted
        assert!(store.get("files/a.mp3").is_some());

        store.heal(Operation::Copy, "b.mp3");
        let result = run(&store, &options).await.unwrap();

        assert_eq!(result.promoted, 1);
        assert_eq!(result.published, 2);
        let feed = document(&store);
        assert_eq!(feed.matches("<item>").count(), 2);
        assert!(feed.contains("files/a.mp3"));
        assert!(feed.contains("files/b.mp3"));
    }

    #[tokio::test]
    async fn stale_root_duplicate_is_cleaned_up_on_retry() {
        let store = MemoryStore::with_objects([("a.mp3", vec![0u8; 4])]);
        store.fail(Operation::Delete, "a.mp3");
        let options = options(ScanMode::FlatRoot);

        assert!(run(&store, &options).await.is_err());
        assert!(store.get("a.mp3").is_some());
        assert!(store.get("files/a.mp3").is_some());
        assert!(store.get("index.xml").is_none());

        store.heal(Operation::Delete, "a.mp3");
        run(&store, &options).await.unwrap();

        assert!(store.get("a.mp3").is_none());
        assert_eq!(document(&store).matches("<item>").count(), 1);
    }

    #[tokio::test]
    async fn prefixed_mode_leaves_root_alone() {
        let store = MemoryStore::with_objects([
            ("root.mp3", vec![0u8; 4]),
            ("files/nested/deep.m4a", vec![0u8; 6]),
        ]);

        let result = run(&store, &options(ScanMode::Prefixed)).await.unwrap();

        assert_eq!(result.promoted, 0);
        assert_eq!(result.published, 1);
        assert!(store.get("root.mp3").is_some());
        assert!(document(&store).contains("files/nested/deep.m4a\" length=\"6\" type=\"audio/mpeg\""));
    }

    #[tokio::test]
    async fn missing_feed_without_new_objects_gets_bare_trailer() {
        let store = MemoryStore::new();

        let result = run(&store, &options(ScanMode::FlatRoot)).await.unwrap();

        assert!(result.written);
        assert_eq!(document(&store), TRAILER);
    }

    #[tokio::test]
    async fn missing_feed_starts_from_channel_header() {
        let store = MemoryStore::with_objects([("files/a.mp3", vec![0u8; 4])]);
        let mut options = options(ScanMode::Prefixed);
        options.channel = Some(ChannelInfo {
            title: "My Show".to_string(),
            description: Some("Weekly".to_string()),
            link: None,
        });

        run(&store, &options).await.unwrap();

        let feed = document(&store);
        assert!(feed.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(feed.contains("<title>My Show</title>"));
        assert!(feed.contains("<item>"));
    }

    #[tokio::test]
    async fn unreadable_feed_aborts() {
        let store = MemoryStore::with_objects([("files/a.mp3", vec![0u8; 4])]);
        store.fail(Operation::Read, "index.xml");

        let err = run(&store, &options(ScanMode::Prefixed)).await.unwrap_err();
        assert!(matches!(err, ProcessError::Read { .. }));
        assert!(store.get("index.xml").is_none());
    }

    #[tokio::test]
    async fn non_utf8_feed_is_rejected() {
        let store = MemoryStore::with_objects([("index.xml", vec![0xffu8, 0xfe])]);

        let err = run(&store, &options(ScanMode::Prefixed)).await.unwrap_err();
        assert!(matches!(err, ProcessError::InvalidUtf8 { .. }));
    }

    #[tokio::test]
    async fn processor_invalidates_cache_after_write() {
        let store = Arc::new(MemoryStore::with_objects([(
            "index.xml",
            EXISTING_FEED.as_bytes().to_vec(),
        )]));
        let clock: SharedClock = Arc::new(clock());
        let cache = Arc::new(FeedCache::new(store.clone(), "index.xml", DEFAULT_TTL, clock.clone()));
        let processor = Processor::new(
            store.clone(),
            cache.clone(),
            options(ScanMode::FlatRoot),
            clock,
            NoopReporter::shared(),
        );

        assert_eq!(cache.read().await.unwrap(), EXISTING_FEED.as_bytes());

        store
            .write("files/new.mp3", Bytes::from_static(b"1234"), "audio/mpeg")
            .await
            .unwrap();
        processor.run().await.unwrap();

        let served = cache.read().await.unwrap();
        assert!(String::from_utf8(served.to_vec()).unwrap().contains("files/new.mp3"));
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test]
    async fn processor_keeps_cache_when_nothing_written() {
        let store = Arc::new(MemoryStore::with_objects([(
            "index.xml",
            EXISTING_FEED.as_bytes().to_vec(),
        )]));
        let clock: SharedClock = Arc::new(clock());
        let cache = Arc::new(FeedCache::new(store.clone(), "index.xml", DEFAULT_TTL, clock.clone()));
        let processor = Processor::new(
            store.clone(),
            cache.clone(),
            options(ScanMode::FlatRoot),
            clock,
            NoopReporter::shared(),
        );

        cache.read().await.unwrap();
        let result = processor.run().await.unwrap();
        cache.read().await.unwrap();

        assert!(!result.written);
        // One cache fill plus the pass's own read
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_runs_publish_once() {
        let store = Arc::new(MemoryStore::with_objects([("a.mp3", vec![0u8; 4])]));
        let clock: SharedClock = Arc::new(clock());
        let cache = Arc::new(FeedCache::new(store.clone(), "index.xml", DEFAULT_TTL, clock.clone()));
        let processor = Arc::new(Processor::new(
            store.clone(),
            cache,
            options(ScanMode::FlatRoot),
            clock,
            NoopReporter::shared(),
        ));

        let runs: Vec<_> = (0..4)
            .map(|_| {
                let processor = processor.clone();
                tokio::spawn(async move { processor.run().await })
            })
            .collect();
        for run in runs {
            run.await.unwrap().unwrap();
        }

        assert_eq!(document(&store).matches("<item>").count(), 1);
    }
}
