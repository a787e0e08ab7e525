mod cache;
mod merge;

pub use cache::{DEFAULT_TTL, FeedCache};
pub use merge::{
    ChannelInfo, FeedSettings, TRAILER, merge_feed, published_object_paths, render_item,
    render_preamble, strip_trailer,
};

/// Content type of the feed document, both when stored and when served
pub const FEED_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
