// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;

use url::Url;

use crate::episode::{EpisodeRecord, enclosure_mime_type};

/// Closing markup that ends every valid feed document
pub const TRAILER: &str = "</channel>\n</rss>\n";

/// Single-line trailer fragments tried when the full trailer is absent
const TRAILER_LINES: [&str; 2] = ["</channel>\n", "</rss>\n"];

/// How new items are rendered into the feed
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Public URL that object paths are appended to
    pub public_base_url: Url,
    /// Advertise `audio/mp4` for m4a files instead of `audio/mpeg`
    pub detect_mime_type: bool,
}

impl FeedSettings {
    pub fn new(public_base_url: Url) -> Self {
        Self {
            public_base_url,
            detect_mime_type: false,
        }
    }

    /// Public URL of an object
    pub fn enclosure_url(&self, object_path: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.as_str().trim_end_matches('/'),
            object_path.trim_start_matches('/')
        )
    }
}

/// Channel metadata used to start a brand-new document
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<Url>,
}

/// Render the header of a new RSS 2.0 document, up to and including `<channel>`
pub fn render_preamble(channel: &ChannelInfo, settings: &FeedSettings) -> String {
    let link = channel
        .link
        .as_ref()
        .unwrap_or(&settings.public_base_url)
        .as_str();
    let description = channel.description.as_deref().unwrap_or("");

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <rss version=\"2.0\">\n\
         <channel>\n\
         <title>{}</title>\n\
         <link>{}</link>\n\
         <description>{}</description>\n",
        html_escape::encode_text(&channel.title),
        html_escape::encode_text(link),
        html_escape::encode_text(description),
    )
}

/// Remove one trailer from the end of a document
///
/// The full two-line trailer is tried first, then each of its lines on its
/// own. At most one of them is removed. A document ending in none of them is
/// returned unchanged.
pub fn strip_trailer(document: &str) -> &str {
    if let Some(prefix) = document.strip_suffix(TRAILER) {
        return prefix;
    }

    TRAILER_LINES
        .iter()
        .find_map(|line| document.strip_suffix(line))
        .unwrap_or(document)
}

/// Render one `<item>` block (without a trailing newline)
pub fn render_item(record: &EpisodeRecord, settings: &FeedSettings) -> String {
    let url = settings.enclosure_url(&record.object_path);
    let mime_type = enclosure_mime_type(&record.object_path, settings.detect_mime_type);

    format!(
        "     <item>\n         <title>{}</title>\n         <pubDate>{}</pubDate>\n         <enclosure url=\"{}\" length=\"{}\" type=\"{}\" />\n     </item>",
        html_escape::encode_text(&record.title),
        html_escape::encode_text(&record.pub_date),
        html_escape::encode_double_quoted_attribute(&url),
        record.size_bytes,
        mime_type,
    )
}

/// Append new episode items to a feed document
///
/// Existing content before the trailer is kept byte for byte. Items are
/// appended in the given order and the trailer is written back once.
/// Records are never deduplicated.
pub fn merge_feed(existing: &str, records: &[EpisodeRecord], settings: &FeedSettings) -> String {
    let prefix = strip_trailer(existing);

    let mut document = String::with_capacity(prefix.len() + records.len() * 256 + TRAILER.len());
    document.push_str(prefix);

    // New items and the trailer always start on their own line
    if !prefix.is_empty() && !prefix.ends_with('\n') {
        document.push('\n');
    }

    for record in records {
        document.push_str(&render_item(record, settings));
        document.push('\n');
    }

    document.push_str(TRAILER);
    document
}

/// Object paths whose enclosures already appear in a document
///
/// Only URLs under the configured public base URL are considered.
pub fn published_object_paths(document: &str, settings: &FeedSettings) -> HashSet<String> {
    const MARKER: &str = "url=\"";

    let base = format!(
        "{}/",
        settings.public_base_url.as_str().trim_end_matches('/')
    );

    let mut paths = HashSet::new();
    let mut rest = document;

    while let Some(start) = rest.find(MARKER) {
        rest = &rest[start + MARKER.len()..];
        let Some(end) = rest.find('"') else {
            break;
        };

        let url = html_escape::decode_html_entities(&rest[..end]);
        if let Some(path) = url.strip_prefix(&base) {
            paths.insert(path.to_string());
        }
        rest = &rest[end + 1..];
    }

    paths
}
