// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;

use super::title::title_from_name;

/// Metadata for one episode, derived from an audio object
///
/// Records only live for the duration of a processing pass: they are
/// rendered into the feed document and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeRecord {
    pub title: String,
    /// Publication date rendered as RFC 2822 text
    pub pub_date: String,
    /// Store key of the audio object, relative to the public base URL
    pub object_path: String,
    /// Byte length reported by the store
    pub size_bytes: u64,
}

/// Format a timestamp for a `<pubDate>` element
pub fn format_pub_date(at: DateTime<Utc>) -> String {
    at.to_rfc2822()
}

/// Derive an episode record from an object key and its size
///
/// The publication date is the clock's current time.
pub fn derive_episode(object_path: &str, size_bytes: u64, clock: &dyn Clock) -> EpisodeRecord {
    EpisodeRecord {
        title: title_from_name(object_path),
        pub_date: format_pub_date(clock.now()),
        object_path: object_path.to_string(),
        size_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn fixed_clock() -> ManualClock {
        let start = DateTime::parse_from_rfc3339("2006-01-02T15:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        ManualClock::new(start)
    }

    #[test]
    fn derive_fills_all_fields() {
        let clock = fixed_clock();
        let record = derive_episode("files/my_show_01.mp3", 1024, &clock);

        assert_eq!(record.title, "my show");
        assert_eq!(record.pub_date, "Mon, 2 Jan 2006 15:04:05 +0000");
        assert_eq!(record.object_path, "files/my_show_01.mp3");
        assert_eq!(record.size_bytes, 1024);
    }

    #[test]
    fn derive_is_deterministic_under_fixed_clock() {
        let clock = fixed_clock();
        let a = derive_episode("files/ep_01_intro.mp3", 7, &clock);
        let b = derive_episode("files/ep_01_intro.mp3", 7, &clock);

        assert_eq!(a, b);
        assert_eq!(a.title, "ep    intro");
    }

    #[test]
    fn pub_date_parses_as_rfc2822() {
        let clock = fixed_clock();
        let record = derive_episode("files/a.mp3", 0, &clock);

        let parsed = DateTime::parse_from_rfc2822(&record.pub_date).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), clock.now());
    }
}
