use once_cell::sync::Lazy;
use regex::Regex;
use time::OffsetDateTime;

use crate::i18n::Locale;

static AUDIO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(webm|mp3|wav|ogg|m4a)(\?|$)").unwrap());
static VIDEO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(mp4|mov|avi|mkv|webm)(\?|$)").unwrap());

/// How a media URL is rendered on the wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Image,
}

/// Classify a media URL by its extension. Audio is checked first, so a
/// `.webm` recording plays as audio.
pub fn media_kind(url: &str) -> MediaKind {
    if AUDIO_RE.is_match(url) {
        MediaKind::Audio
    } else if VIDEO_RE.is_match(url) {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}

/// Short age of a post, e.g. "Fa 5 min", or the day and month once it is a
/// week old.
pub fn relative_time(created_at: OffsetDateTime, now: OffsetDateTime, locale: Locale) -> String {
    let m = locale.messages();
    let minutes = (now - created_at).whole_minutes();
    if minutes < 1 {
        return m.just_now.to_string();
    }
    if minutes < 60 {
        return m.minutes_ago.replace("{n}", &minutes.to_string());
    }
    let hours = minutes / 60;
    if hours < 24 {
        return m.hours_ago.replace("{n}", &hours.to_string());
    }
    let days = hours / 24;
    if days < 7 {
        return m.days_ago.replace("{n}", &days.to_string());
    }
    let month = m.months[created_at.month() as usize - 1];
    format!("{} {}", created_at.day(), month)
}

/// Up to two initials for an author badge.
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|w| w.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect()
}
