pub mod clock;
pub mod config;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod process;
pub mod progress;
pub mod scan;
pub mod store;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Cli, Command, FeedArgs, ProcessArgs, ServeArgs, StoreArgs, StoreKind};
pub use episode::{EpisodeRecord, derive_episode, title_from_name};
pub use error::{ConfigError, ProcessError, PromoteError, StoreError};
pub use feed::{ChannelInfo, FEED_CONTENT_TYPE, FeedCache, FeedSettings, merge_feed, strip_trailer};
pub use http::{AppState, FileDelivery, router};
pub use process::{ProcessOptions, ProcessResult, Processor, process_feed};
pub use progress::{
    NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter, TracingReporter,
};
pub use scan::{ScanMode, promote};
pub use store::{LocalStore, MemoryStore, ObjectStore, S3Store, StoreHandle};
