// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Extensions (lowercase, without the dot) accepted as episode audio
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a"];

/// Enclosure MIME type written for every episode unless detection is enabled
pub const DEFAULT_MIME_TYPE: &str = "audio/mpeg";

/// Final path segment of an object key
pub fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Get the allow-listed audio extension of an object name, lowercased
///
/// Returns `None` for names without an extension or with one that is not
/// in [`AUDIO_EXTENSIONS`].
pub fn audio_extension(name: &str) -> Option<String> {
    let base = base_name(name);
    let (_, ext) = base.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    AUDIO_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Check whether an object name looks like an episode audio file
pub fn is_audio_name(name: &str) -> bool {
    audio_extension(name).is_some()
}

/// Map an object name to the MIME type advertised for it
///
/// With `detect` disabled this is always `audio/mpeg`, even for `m4a`.
pub fn enclosure_mime_type(name: &str, detect: bool) -> &'static str {
    if !detect {
        return DEFAULT_MIME_TYPE;
    }

    match audio_extension(name).as_deref() {
        Some("m4a") => "audio/mp4",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Derive a human-readable title from an object name
///
/// Takes the last path segment, strips the audio extension, replaces every
/// underscore and ASCII digit with one space each and trims trailing
/// whitespace. Leading and inner runs of spaces are kept as they are.
pub fn title_from_name(name: &str) -> String {
    let base = base_name(name);

    let stem = match base.rsplit_once('.') {
        Some((stem, ext)) if AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()) => stem,
        _ => base,
    };

    let replaced: String = stem
        .chars()
        .map(|c| if c == '_' || c.is_ascii_digit() { ' ' } else { c })
        .collect();

    replaced.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Title tests ===

    #[test]
    fn title_replaces_underscores_and_digits() {
        assert_eq!(title_from_name("my_show_01.mp3"), "my show");
    }

    #[test]
    fn title_replaces_each_character_with_one_space() {
        // '_', '0', '1', '_' each become a space
        assert_eq!(title_from_name("ep_01_intro.mp3"), "ep    intro");
    }

    #[test]
    fn title_keeps_leading_spaces() {
        assert_eq!(title_from_name("01_intro.mp3"), "   intro");
    }

    #[test]
    fn title_uses_last_path_segment() {
        assert_eq!(title_from_name("files/nested/my_show.mp3"), "my show");
    }

    #[test]
    fn title_strips_uppercase_extension() {
        assert_eq!(title_from_name("Interview.M4A"), "Interview");
    }

    #[test]
    fn title_keeps_unknown_extension() {
        assert_eq!(title_from_name("notes.txt"), "notes.txt");
    }

    #[test]
    fn title_only_strips_last_extension() {
        assert_eq!(title_from_name("show.part.mp3"), "show.part");
    }

    #[test]
    fn title_ignores_non_ascii_digits() {
        assert_eq!(title_from_name("show_٣.mp3"), "show ٣");
    }

    #[test]
    fn title_without_letters_is_empty() {
        assert_eq!(title_from_name("2024_01_15.mp3"), "");
    }

    #[test]
    fn title_is_stable_once_clean() {
        let once = title_from_name("my_show_01.mp3");
        assert_eq!(title_from_name(&once), once);
    }

    // === Extension tests ===

    #[test]
    fn recognizes_allowed_extensions() {
        assert!(is_audio_name("episode.mp3"));
        assert!(is_audio_name("episode.m4a"));
        assert!(is_audio_name("EPISODE.MP3"));
    }

    #[test]
    fn rejects_other_extensions() {
        assert!(!is_audio_name("episode.ogg"));
        assert!(!is_audio_name("index.xml"));
        assert!(!is_audio_name("mp3"));
        assert!(!is_audio_name("episode.mp3.partial"));
    }

    #[test]
    fn extension_is_taken_from_last_segment() {
        assert_eq!(audio_extension("dir.mp3/readme"), None);
        assert_eq!(audio_extension("dir/show.M4a"), Some("m4a".to_string()));
    }

    // === MIME tests ===

    #[test]
    fn mime_is_mpeg_without_detection() {
        assert_eq!(enclosure_mime_type("show.m4a", false), "audio/mpeg");
        assert_eq!(enclosure_mime_type("show.mp3", false), "audio/mpeg");
    }

    #[test]
    fn mime_detection_maps_m4a() {
        assert_eq!(enclosure_mime_type("show.m4a", true), "audio/mp4");
        assert_eq!(enclosure_mime_type("show.mp3", true), "audio/mpeg");
    }
}
