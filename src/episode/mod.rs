mod record;
mod title;

pub use record::{EpisodeRecord, derive_episode, format_pub_date};
pub use title::{
    AUDIO_EXTENSIONS, DEFAULT_MIME_TYPE, audio_extension, base_name, enclosure_mime_type,
    is_audio_name, title_from_name,
};
