use std::{fmt, sync::Arc, time::Duration};

/// Metadata resolved for a playable item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub identifier: String,
    pub title: String,
    pub author: Option<String>,
    pub length_ms: u64,
    pub uri: Option<String>,
    pub is_stream: bool,
}

impl TrackInfo {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, length_ms: u64) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            author: None,
            length_ms,
            uri: None,
            is_stream: false,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn live(mut self) -> Self {
        self.is_stream = true;
        self.length_ms = 0;
        self
    }
}

/// Handle to a resolved track.
///
/// Clones share the same underlying metadata. Two handles are the *same* track only if
/// they come from the same resolution, which is what end-of-track bookkeeping relies on
/// (see [`Track::is_same`]).
#[derive(Debug, Clone)]
pub struct Track {
    info: Arc<TrackInfo>,
}

impl Track {
    pub fn new(info: TrackInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn length_ms(&self) -> u64 {
        self.info.length_ms
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.info.length_ms)
    }

    /// Identity comparison: true only for clones of one resolved handle.
    pub fn is_same(&self, other: &Track) -> bool {
        Arc::ptr_eq(&self.info, &other.info)
    }

    /// `title (m:ss)`, or `title (LIVE)` for streams.
    pub fn describe(&self) -> String {
        if self.info.is_stream {
            format!("{} (LIVE)", self.info.title)
        } else {
            format!("{} ({})", self.info.title, format_duration(self.info.length_ms))
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.info.title)
    }
}

/// Formats milliseconds as `m:ss`, or `h:mm:ss` once the length reaches an hour.
pub fn format_duration(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(59_999), "0:59");
        assert_eq!(format_duration(61_000), "1:01");
        assert_eq!(format_duration(3_599_000), "59:59");
        assert_eq!(format_duration(3_600_000), "1:00:00");
        assert_eq!(format_duration(7_384_000), "2:03:04");
    }

    #[test]
    fn test_describe() {
        let track = Track::new(TrackInfo::new("abc", "Song", 185_000));
        assert_eq!(track.describe(), "Song (3:05)");

        let live = Track::new(TrackInfo::new("xyz", "Radio", 0).live());
        assert_eq!(live.describe(), "Radio (LIVE)");
    }

    #[test]
    fn test_identity_follows_resolution() {
        let info = TrackInfo::new("abc", "Song", 1_000);
        let first = Track::new(info.clone());
        let again = Track::new(info);

        assert!(first.is_same(&first.clone()));
        assert!(!first.is_same(&again));
    }
}
