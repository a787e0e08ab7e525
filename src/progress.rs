use std::sync::Arc;

use tracing::{debug, info, warn};

/// Events emitted during a processing pass for progress reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The feed document is being read from the store
    ReadingFeed { key: String },

    /// No feed document exists yet, a new one will be created
    FeedMissing { key: String },

    /// Objects under a prefix are being enumerated
    ScanningObjects { prefix: String },

    /// An upload was moved under the media prefix
    ObjectPromoted { src: String, dest: String },

    /// A new episode will be added to the feed
    EpisodeDiscovered {
        title: String,
        object_path: String,
        size_bytes: u64,
    },

    /// An audio object already has an item in the feed
    AlreadyPublished { object_path: String },

    /// The updated feed document was stored
    FeedWritten {
        key: String,
        new_items: usize,
        bytes: usize,
    },

    /// Processing pass completed
    ProcessCompleted {
        promoted: usize,
        published: usize,
        skipped: usize,
        written: bool,
    },

    /// Processing pass aborted; the next pass picks up where it stopped
    ProcessFailed { error: String },
}

/// Trait for reporting progress events during a processing pass.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Reporter that turns events into structured log lines, used by the server
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl TracingReporter {
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

impl ProgressReporter for TracingReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ReadingFeed { key } => debug!(%key, "Reading feed document"),
            ProgressEvent::FeedMissing { key } => {
                info!(%key, "Feed document missing, starting a new one")
            }
            ProgressEvent::ScanningObjects { prefix } => debug!(%prefix, "Scanning objects"),
            ProgressEvent::ObjectPromoted { src, dest } => info!(%src, %dest, "Promoted upload"),
            ProgressEvent::EpisodeDiscovered {
                title,
                object_path,
                size_bytes,
            } => info!(%title, %object_path, size_bytes, "Discovered episode"),
            ProgressEvent::AlreadyPublished { object_path } => {
                debug!(%object_path, "Already published")
            }
            ProgressEvent::FeedWritten {
                key,
                new_items,
                bytes,
            } => info!(%key, new_items, bytes, "Wrote feed document"),
            ProgressEvent::ProcessCompleted {
                promoted,
                published,
                skipped,
                written,
            } => info!(promoted, published, skipped, written, "Processing complete"),
            ProgressEvent::ProcessFailed { error } => {
                warn!(%error, "Processing pass failed, it will be retried by the next pass")
            }
        }
    }
}

/// Collects events so tests can assert on what a pass reported
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingReporter {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
