//! Configuration file parser for config.toml.
//!
//! The file maps feed names to their channel metadata and source URLs,
//! plus the polling interval. Unlike most settings files it is not
//! optional: an aggregator without configured feeds has nothing to do,
//! so a missing file is an error rather than a default.
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::feed::{Feed, Source};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file too large: {0}")]
    TooLarge(String),

    #[error("feed {feed:?} has no sources")]
    NoSources { feed: String },

    #[error("feed {feed:?} lists source URL {url:?} more than once")]
    DuplicateSource { feed: String, url: String },

    #[error("feed {feed:?} has an invalid source URL {url:?}: {source}")]
    InvalidSource {
        feed: String,
        url: String,
        #[source]
        source: url::ParseError,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Seconds between sync passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Feed name → channel metadata and sources.
    #[serde(default)]
    pub feeds: HashMap<String, FeedConfig>,
}

/// One configured feed. The source list is fixed by this configuration;
/// the sync engine never adds or removes sources at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    pub sources: Vec<String>,
}

fn default_poll_interval() -> u64 {
    600
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::Io)`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    /// - A feed without sources or with an unparsable source URL → error
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;

        // Parse as a raw table first to flag likely typos
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["poll_interval_secs", "feeds"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        if config.feeds.is_empty() {
            tracing::warn!(path = %path.display(), "no feeds configured");
        } else {
            tracing::info!(
                path = %path.display(),
                feeds = config.feeds.len(),
                "loaded configuration"
            );
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, feed) in &self.feeds {
            if feed.sources.is_empty() {
                return Err(ConfigError::NoSources { feed: name.clone() });
            }
            // (feed, url) is the storage key for a source, so a repeated
            // URL must be caught here rather than fail the seed insert.
            let mut seen = std::collections::HashSet::new();
            for url in &feed.sources {
                Url::parse(url).map_err(|source| ConfigError::InvalidSource {
                    feed: name.clone(),
                    url: url.clone(),
                    source,
                })?;
                if !seen.insert(url.as_str()) {
                    return Err(ConfigError::DuplicateSource {
                        feed: name.clone(),
                        url: url.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl FeedConfig {
    /// Build the in-memory aggregate for a freshly configured feed, with
    /// no episodes and no `last_build_date` yet.
    pub fn to_feed(&self, name: &str) -> Feed {
        Feed {
            name: name.to_string(),
            title: self.title.clone(),
            link: self.link.clone(),
            language: self.language.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
            sources: self
                .sources
                .iter()
                .map(|url| Source { url: url.clone() })
                .collect(),
            last_build_date: None,
            episodes: vec![],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir_name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    const VALID: &str = r#"
poll_interval_secs = 120

[feeds.show]
title = "The Show"
link = "https://example.com/show"
language = "en"
description = "A show"
image = "https://example.com/cover.jpg"
sources = ["https://a.example.com/rss", "https://b.example.com/rss"]
"#;

    #[test]
    fn test_full_config_parses() {
        let path = write_config("podmerge_config_test_full", VALID);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 120);
        let feed = &config.feeds["show"];
        assert_eq!(feed.title, "The Show");
        assert_eq!(feed.sources.len(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_poll_interval_defaults() {
        let path = write_config(
            "podmerge_config_test_default",
            r#"
[feeds.show]
title = "t"
link = "https://example.com"
sources = ["https://a.example.com/rss"]
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 600);
        assert_eq!(config.feeds["show"].language, "");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = Path::new("/tmp/podmerge_test_nonexistent_config.toml");
        assert!(matches!(Config::load(path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let path = write_config("podmerge_config_test_invalid", "this is not [valid toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_feed_without_sources_rejected() {
        let path = write_config(
            "podmerge_config_test_nosources",
            r#"
[feeds.show]
title = "t"
link = "https://example.com"
sources = []
"#,
        );
        match Config::load(&path) {
            Err(ConfigError::NoSources { feed }) => assert_eq!(feed, "show"),
            other => panic!("expected NoSources, got {:?}", other.map(|_| ())),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_duplicate_source_url_rejected() {
        let path = write_config(
            "podmerge_config_test_dupsource",
            r#"
[feeds.show]
title = "t"
link = "https://example.com"
sources = ["https://a.example.com/rss", "https://a.example.com/rss"]
"#,
        );
        match Config::load(&path) {
            Err(ConfigError::DuplicateSource { feed, url }) => {
                assert_eq!(feed, "show");
                assert_eq!(url, "https://a.example.com/rss");
            }
            other => panic!("expected DuplicateSource, got {:?}", other.map(|_| ())),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_source_url_rejected() {
        let path = write_config(
            "podmerge_config_test_badurl",
            r#"
[feeds.show]
title = "t"
link = "https://example.com"
sources = ["not a url"]
"#,
        );
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidSource { .. })
        ));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_to_feed_starts_without_sync_state() {
        let path = write_config("podmerge_config_test_tofeed", VALID);
        let config = Config::load(&path).unwrap();
        let feed = config.feeds["show"].to_feed("show");
        assert_eq!(feed.name, "show");
        assert_eq!(feed.sources[0].url, "https://a.example.com/rss");
        assert!(feed.episodes.is_empty());
        assert!(feed.last_build_date.is_none());

        std::fs::remove_file(&path).ok();
    }
}
