//! # Sources Module
//!
//! Turning user queries into tracks, and tracks into audio.
//!
//! - [`TrackResolver`]: query → [`LoadResult`], implemented by [`YtDlpResolver`]
//! - [`FfmpegDecoder`]: track → Opus frames, the decoder behind the bot's players
//!
//! Both shell out to `yt-dlp` (and `ffmpeg` for decoding), which must be on the
//! `PATH` or configured explicitly.

pub mod ffmpeg;
pub mod ytdlp;

use async_trait::async_trait;
use url::Url;

use crate::audio::dispatcher::LoadResult;

pub use ffmpeg::FfmpegDecoder;
pub use ytdlp::YtDlpResolver;

/// Resolves a query (a URL or a prefixed search term) into tracks.
///
/// Never fails: backend errors are reported as [`LoadResult::LoadFailed`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn load(&self, query: &str) -> LoadResult;
}

/// The query to resolve for user input: URLs are used verbatim, anything else
/// becomes a search with `search_prefix`.
pub fn identifier_for(input: &str, search_prefix: &str) -> String {
    let input = input.trim();
    if is_url(input) {
        input.to_string()
    } else {
        format!("{}{}", search_prefix, input)
    }
}

pub fn is_url(input: &str) -> bool {
    matches!(Url::parse(input), Ok(url) if matches!(url.scheme(), "http" | "https"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_urls_are_used_verbatim() {
        assert_eq!(
            identifier_for("https://youtu.be/dQw4w9WgXcQ", "ytsearch:"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
        assert_eq!(
            identifier_for("  https://soundcloud.com/a/b ", "ytsearch:"),
            "https://soundcloud.com/a/b"
        );
    }

    #[test]
    fn test_other_input_becomes_a_search() {
        assert_eq!(identifier_for("never gonna", "ytsearch:"), "ytsearch:never gonna");
        assert_eq!(identifier_for("mailto:me@example.com", "scsearch:"), "scsearch:mailto:me@example.com");
        assert!(!is_url("youtube.com/watch?v=x"));
    }
}
