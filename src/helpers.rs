use std::fmt::Write;
use std::time::Duration;

use crate::config::MAX_QUEUE_DISPLAY;
use crate::session::SessionSnapshot;

const MAX_TITLE_LENGTH: usize = 100;
const UNKNOWN_TRACK_TITLE: &str = "Unknown";

/// Whether a text channel counts as the music channel. Emoji and punctuation
/// are ignored, so "🎵 music" and "music-room" both match "music".
pub fn channel_matches(channel_name: &str, allowed: &str) -> bool {
    let cleaned: String = channel_name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    let allowed = allowed.trim().to_lowercase();

    cleaned.contains(&allowed) || cleaned.trim() == allowed
}

/// Escapes Discord markdown and caps the length of a track title.
pub fn sanitize_title(title: &str) -> String {
    if title.trim().is_empty() {
        return UNKNOWN_TRACK_TITLE.to_string();
    }

    let truncated: String = if title.chars().count() > MAX_TITLE_LENGTH {
        let head: String = title.chars().take(MAX_TITLE_LENGTH - 3).collect();
        format!("{head}...")
    } else {
        title.to_string()
    };

    let mut escaped = String::with_capacity(truncated.len());
    for c in truncated.chars() {
        if matches!(c, '*' | '_' | '~' | '`' | '|') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let display_seconds = seconds - (minutes * 60);

    format!("{minutes}:{display_seconds:0>2}")
}

/// Now-playing line plus the first queue positions.
pub fn format_queue(snapshot: &SessionSnapshot) -> String {
    let mut text = String::from("**Music Queue**\n");

    if let Some(current) = &snapshot.current {
        let _ = write!(text, "**Now Playing:** {}", sanitize_title(&current.title));
        if let Some(duration) = current.duration {
            let _ = write!(text, " `{}`", format_duration(duration));
        }
        text.push('\n');
    }

    text.push_str("**Up Next:**\n");

    if snapshot.queue.is_empty() {
        text.push_str("Queue is empty");
        return text;
    }

    for (position, track) in snapshot.queue.iter().take(MAX_QUEUE_DISPLAY) {
        let _ = writeln!(text, "{position}. {}", sanitize_title(&track.title));
    }

    if snapshot.queue.len() > MAX_QUEUE_DISPLAY {
        let remaining = snapshot.queue.len() - MAX_QUEUE_DISPLAY;
        let _ = write!(text, "... and {remaining} more");
    }

    text
}
