use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::TrackResolver;
use crate::audio::{
    dispatcher::{LoadError, LoadResult, Playlist, Severity},
    track::{Track, TrackInfo},
};

/// Resolution gives up after this long.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Playlists are cut to this many entries.
const MAX_PLAYLIST_ITEMS: usize = 100;

/// Resolves queries with `yt-dlp -J --flat-playlist`.
pub struct YtDlpResolver {
    program: String,
}

/// What yt-dlp prints for a video, a playlist, or one flat playlist entry.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    is_live: Option<bool>,
    live_status: Option<String>,
    extractor_key: Option<String>,
    ie_key: Option<String>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

impl YtDlpInfo {
    fn is_playlist(&self) -> bool {
        self.kind.as_deref() == Some("playlist")
    }

    fn is_live(&self) -> bool {
        self.is_live.unwrap_or(false) || self.live_status.as_deref() == Some("is_live")
    }

    fn into_track(self) -> Option<Track> {
        let live = self.is_live();
        let id = self.id?;
        let uri = self
            .webpage_url
            .or(self.url)
            .or_else(|| youtube_watch_url(&id, self.ie_key.as_deref()));
        let mut info = TrackInfo::new(
            id,
            self.title.unwrap_or_else(|| "Unknown title".to_string()),
            self.duration.map_or(0, |secs| (secs * 1000.0).round() as u64),
        );
        if let Some(author) = self.uploader.or(self.channel) {
            info = info.with_author(author);
        }
        if let Some(uri) = uri {
            info = info.with_uri(uri);
        }
        if live {
            info = info.live();
        }
        Some(Track::new(info))
    }
}

fn youtube_watch_url(id: &str, ie_key: Option<&str>) -> Option<String> {
    (ie_key == Some("Youtube")).then(|| format!("https://www.youtube.com/watch?v={}", id))
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, query: &str) -> Result<std::process::Output, LoadError> {
        let limit = MAX_PLAYLIST_ITEMS.to_string();
        let mut command = Command::new(&self.program);
        command
            .args(["-J", "--flat-playlist", "--no-warnings", "--playlist-end", limit.as_str(), query])
            .kill_on_drop(true);
        let output = command.output();

        match timeout(RESOLVE_TIMEOUT, output).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                warn!("❌ Could not run {}: {}", self.program, e);
                Err(LoadError::fault("The track resolver is not available."))
            }
            Err(_) => Err(LoadError::common("Timed out while looking up the track.")),
        }
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn load(&self, query: &str) -> LoadResult {
        info!("🔍 Resolving: {}", query);

        let output = match self.run(query).await {
            Ok(output) => output,
            Err(e) => return LoadResult::LoadFailed(e),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp exited with {}: {}", output.status, stderr.trim());
            return classify_failure(&stderr);
        }

        parse_output(query, &output.stdout)
    }
}

/// Maps yt-dlp's JSON dump to a result.
fn parse_output(query: &str, stdout: &[u8]) -> LoadResult {
    let info: YtDlpInfo = match serde_json::from_slice(stdout) {
        Ok(info) => info,
        Err(e) => {
            warn!("Unreadable yt-dlp output for {}: {}", query, e);
            return LoadResult::LoadFailed(LoadError::new(
                "The track resolver returned an unexpected response.",
                Severity::Suspicious,
            ));
        }
    };

    if !info.is_playlist() {
        return match info.into_track() {
            Some(track) => LoadResult::TrackLoaded(track),
            None => LoadResult::NoMatches,
        };
    }

    let is_search = info
        .extractor_key
        .as_deref()
        .is_some_and(|key| key.ends_with("Search") || key.ends_with("SearchURL"));
    let name = info.title.clone().unwrap_or_else(|| query.to_string());
    let tracks: Vec<Track> = info
        .entries
        .into_iter()
        .filter_map(YtDlpInfo::into_track)
        .collect();

    if tracks.is_empty() {
        return LoadResult::NoMatches;
    }
    if is_search {
        LoadResult::PlaylistLoaded(Playlist::search(query, tracks))
    } else {
        LoadResult::PlaylistLoaded(Playlist::new(name, tracks))
    }
}

/// Maps a failed yt-dlp run to a result, keeping the first error line.
fn classify_failure(stderr: &str) -> LoadResult {
    let message = stderr
        .lines()
        .find_map(|line| line.trim().strip_prefix("ERROR:"))
        .map(str::trim)
        .unwrap_or("The track could not be loaded.");

    if message.contains("Unsupported URL") || message.contains("is not a valid URL") {
        return LoadResult::NoMatches;
    }

    // "[youtube] abc: Video unavailable" → "Video unavailable"
    let message = match message.split_once("] ") {
        Some((_, rest)) => rest.split_once(": ").map_or(rest, |(_, reason)| reason),
        None => message,
    };
    LoadResult::LoadFailed(LoadError::common(message))
}
