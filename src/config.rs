use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // register commands in one guild only (development)

    // Sessions
    pub idle_timeout: Duration,
    pub reaper_interval: Duration,

    // Resolution
    pub search_prefix: String,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,

    // Audio
    pub opus_bitrate: u32,
    pub frame_buffer: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Builds a configuration from `lookup`, falling back to [`Default`] for every
    /// optional key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            guild_id: var("GUILD_ID").map(|id| parse("GUILD_ID", &id)).transpose()?,

            idle_timeout: var("IDLE_TIMEOUT")
                .map(|value| parse_duration("IDLE_TIMEOUT", &value))
                .transpose()?
                .unwrap_or(defaults.idle_timeout),
            reaper_interval: var("REAPER_INTERVAL")
                .map(|value| parse_duration("REAPER_INTERVAL", &value))
                .transpose()?
                .unwrap_or(defaults.reaper_interval),

            search_prefix: var("SEARCH_PREFIX").unwrap_or(defaults.search_prefix),
            ytdlp_path: var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),

            opus_bitrate: var("OPUS_BITRATE")
                .map(|value| parse("OPUS_BITRATE", &value))
                .transpose()?
                .unwrap_or(defaults.opus_bitrate),
            frame_buffer: var("FRAME_BUFFER")
                .map(|value| parse("FRAME_BUFFER", &value))
                .transpose()?
                .unwrap_or(defaults.frame_buffer),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Idle timeout and reaper interval must be non-zero
    /// - The reaper must sweep at least once per idle timeout
    /// - Opus bitrate must be between 8kbps and 510kbps (Discord limit)
    /// - At least one frame must be buffered ahead
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.reaper_interval.is_zero() {
            anyhow::bail!("Reaper interval must be greater than 0");
        }

        if self.reaper_interval > self.idle_timeout {
            anyhow::bail!(
                "Reaper interval ({}) cannot exceed the idle timeout ({})",
                humantime::format_duration(self.reaper_interval),
                humantime::format_duration(self.idle_timeout)
            );
        }

        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.frame_buffer == 0 {
            anyhow::bail!("Frame buffer must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging, without the
    /// token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Sessions: idle timeout {}, swept every {}\n  \
            Resolution: prefix {:?}, yt-dlp at {}, ffmpeg at {}\n  \
            Audio: {}kbps, {} frames ({}ms) buffered",
            self.guild_id
                .map_or("global".to_string(), |id| format!("in guild {}", id)),
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.reaper_interval),
            self.search_prefix,
            self.ytdlp_path,
            self.ffmpeg_path,
            self.opus_bitrate / 1000,
            self.frame_buffer,
            self.frame_buffer * 20,
        )
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", key, value))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("{} is not a duration (try \"10m\" or \"90s\"): {:?}", key, value))
}

/// Reference values, used for every optional key that is not set.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,

            idle_timeout: Duration::from_secs(10 * 60),
            reaper_interval: Duration::from_secs(60),

            search_prefix: "ytsearch:".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),

            opus_bitrate: 96_000, // 96kbps (Discord default)
            frame_buffer: 50,     // one second
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_fill_optional_keys() {
        let config = load(&[("DISCORD_TOKEN", "secret")]).unwrap();

        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.search_prefix, "ytsearch:");
        assert_eq!(config.opus_bitrate, 96_000);
        assert_eq!(config.guild_id, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = load(&[
            ("DISCORD_TOKEN", "secret"),
            ("GUILD_ID", "1234"),
            ("IDLE_TIMEOUT", "5m"),
            ("REAPER_INTERVAL", "30s"),
            ("SEARCH_PREFIX", "scsearch:"),
            ("OPUS_BITRATE", "128000"),
            ("FRAME_BUFFER", ""),
        ])
        .unwrap();

        assert_eq!(config.guild_id, Some(1234));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.reaper_interval, Duration::from_secs(30));
        assert_eq!(config.search_prefix, "scsearch:");
        assert_eq!(config.opus_bitrate, 128_000);
        assert_eq!(config.frame_buffer, 50);
    }

    #[test]
    fn test_missing_token_and_bad_values_fail() {
        assert!(load(&[]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "t"), ("IDLE_TIMEOUT", "soon")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "t"), ("OPUS_BITRATE", "loud")]).is_err());
    }

    #[test]
    fn test_validation_rules() {
        let valid = Config {
            discord_token: "t".into(),
            ..Config::default()
        };
        assert!(valid.validate().is_ok());

        let cases = [
            Config { idle_timeout: Duration::ZERO, ..valid.clone() },
            Config { reaper_interval: Duration::from_secs(3600), ..valid.clone() },
            Config { opus_bitrate: 600_000, ..valid.clone() },
            Config { opus_bitrate: 1_000, ..valid.clone() },
            Config { frame_buffer: 0, ..valid.clone() },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "very-secret".into(),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("very-secret"));
        assert!(summary.contains("idle timeout 10m"));
    }
}
