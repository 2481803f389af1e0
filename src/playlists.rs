use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{PlayerError, Result};
use crate::models::TrackInfo;

/// One line of `yt-dlp -j --flat-playlist` output.
#[derive(Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

pub fn is_playlist_url(input: &str) -> bool {
    input.starts_with("http") && (input.contains("&list=") || input.contains("?list="))
}

/// Parses the JSON-lines output of a flat playlist scan, skipping lines that
/// do not describe an entry.
pub fn tracks_from_playlist_output(output: &str) -> Vec<TrackInfo> {
    let lines: Vec<&str> = output.lines().filter(|line| !line.trim().is_empty()).collect();

    let tracks = lines
        .iter()
        .filter_map(|line| {
            let entry: PlaylistEntry = serde_json::from_str(line).ok()?;

            let duration = entry
                .duration
                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());

            Some(TrackInfo {
                title: entry.title.unwrap_or_else(|| entry.id.clone()),
                url: entry.url,
                duration,
            })
        })
        .collect::<Vec<TrackInfo>>();

    if tracks.len() < lines.len() {
        warn!("{} playlist entries skipped due to parse errors", lines.len() - tracks.len());
    }

    tracks
}

/// Lists a playlist through yt-dlp. Blocks until the process exits.
pub fn tracks_from_playlist_url(url: &str) -> Result<Vec<TrackInfo>> {
    info!("Getting tracks from playlist {url}");

    let output = Command::new("yt-dlp")
        .arg("-j")
        .arg("--flat-playlist")
        .arg(url)
        .output()
        .map_err(|why| PlayerError::Extraction(format!("yt-dlp failed to start: {why}")))?;

    let result = String::from_utf8_lossy(&output.stdout);

    if result.trim().is_empty() {
        let error = String::from_utf8_lossy(&output.stderr);
        return Err(PlayerError::Extraction(error.trim().to_string()));
    }

    let tracks = tracks_from_playlist_output(&result);
    if tracks.is_empty() {
        return Err(PlayerError::NotFound(url.to_string()));
    }

    Ok(tracks)
}
