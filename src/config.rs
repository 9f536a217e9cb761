//! Static configuration, read once at startup and shared as `Arc<Config>`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings file read by the binary when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";
/// Streamer list, kept apart from the settings file.
pub const DEFAULT_STREAMERS_FILE: &str = "streamers.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub downloads_dir: PathBuf,
    /// Where the streamer list is persisted.
    pub streamers_file: PathBuf,
    pub poll: PollConfig,
    #[serde(with = "secs")]
    pub probe_timeout: Duration,
    /// Upper bound on simultaneously active recording sessions.
    pub max_concurrent_recordings: usize,
    pub backoff: BackoffConfig,
    /// How often live byte counts are republished while recording.
    #[serde(with = "secs")]
    pub progress_interval: Duration,
    pub confirm_deletes: ConfirmDeletes,
    pub web: WebConfig,
    /// Extensions (without the dot) counted as recordings by the index.
    pub video_extensions: Vec<String>,
}

/// Polling cadence per class of probe outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(with = "secs")]
    pub offline: Duration,
    #[serde(with = "secs")]
    pub long_offline: Duration,
    /// Continuous offline time after which `long_offline` applies.
    #[serde(with = "secs")]
    pub long_offline_after: Duration,
    #[serde(with = "secs")]
    pub private: Duration,
    #[serde(with = "secs")]
    pub rate_limited: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "secs")]
    pub min: Duration,
    #[serde(with = "secs")]
    pub max: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmDeletes {
    Off,
    Always,
    /// Ask only when the client reports itself as a mobile device.
    #[default]
    Mobile,
}

impl ConfirmDeletes {
    pub fn should_confirm(&self, mobile_client: bool) -> bool {
        match self {
            ConfirmDeletes::Off => false,
            ConfirmDeletes::Always => true,
            ConfirmDeletes::Mobile => mobile_client,
        }
    }
}

/// Refresh frequencies handed to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    #[serde(with = "secs")]
    pub list_refresh: Duration,
    #[serde(with = "secs")]
    pub status_refresh: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            streamers_file: PathBuf::from(DEFAULT_STREAMERS_FILE),
            poll: PollConfig::default(),
            probe_timeout: Duration::from_secs(15),
            max_concurrent_recordings: 16,
            backoff: BackoffConfig::default(),
            progress_interval: Duration::from_secs(5),
            confirm_deletes: ConfirmDeletes::default(),
            web: WebConfig::default(),
            video_extensions: ["mp4", "mkv", "webm", "mov", "avi", "wmv", "ts", "flv"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            offline: Duration::from_secs(5),
            long_offline: Duration::from_secs(15),
            long_offline_after: Duration::from_secs(180),
            private: Duration::from_secs(5),
            rate_limited: Duration::from_secs(180),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(20),
            max: Duration::from_secs(600),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            list_refresh: Duration::from_secs(30),
            status_refresh: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        if config.streamers_file == path {
            return Err(ConfigError::Invalid(format!(
                "streamers_file must not be the config file {}",
                path.display()
            )));
        }
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config {} not found, using defaults", path.display());
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_recordings == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_recordings must be at least 1".to_string(),
            ));
        }
        if self.backoff.min.is_zero() || self.backoff.max < self.backoff.min {
            return Err(ConfigError::Invalid(format!(
                "backoff range {:?}..{:?} is empty",
                self.backoff.min, self.backoff.max
            )));
        }
        let intervals = [
            ("poll.offline", self.poll.offline),
            ("poll.long_offline", self.poll.long_offline),
            ("poll.private", self.poll.private),
            ("poll.rate_limited", self.poll.rate_limited),
            ("probe_timeout", self.probe_timeout),
            ("progress_interval", self.progress_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
        }
        if self.video_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "video_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durations are written as (fractional) seconds.
mod secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!("invalid duration {}", secs)));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = Config::from_json(
            r#"{ "max_concurrent_recordings": 2, "poll": { "offline": 0.5 }, "confirm_deletes": "off" }"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_recordings, 2);
        assert_eq!(config.poll.offline, Duration::from_millis(500));
        assert_eq!(config.poll.long_offline, Duration::from_secs(15));
        assert_eq!(config.confirm_deletes, ConfirmDeletes::Off);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = Config::from_json(r#"{ "max_concurrent_recordings": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let err = Config::from_json(r#"{ "backoff": { "min": 30, "max": 10 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_duration() {
        let err = Config::from_json(r#"{ "probe_timeout": -1 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[tokio::test]
    async fn saved_streamers_do_not_clobber_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(DEFAULT_CONFIG_FILE);

        let config = Config::from_file(&config_path).unwrap();
        let store = crate::store::StreamerStore::new(dir.path().join(&config.streamers_file));
        assert_ne!(store.path(), config_path.as_path());

        let records = vec![crate::store::StreamerRecord {
            site: "DU".to_string(),
            username: "https://example.com/a.m3u8".to_string(),
            running: true,
        }];
        store.save(&records).await.unwrap();
        std::fs::write(&config_path, serde_json::to_vec(&config).unwrap()).unwrap();

        let reloaded = Config::from_file(&config_path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(store.load().await.unwrap(), records);
    }

    #[test]
    fn rejects_streamers_file_shared_with_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("settings.json");
        let json = format!(r#"{{ "streamers_file": {:?} }}"#, config_path.display().to_string());
        std::fs::write(&config_path, json).unwrap();

        let err = Config::from_file(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn confirm_delete_policy() {
        assert!(!ConfirmDeletes::Off.should_confirm(true));
        assert!(ConfirmDeletes::Always.should_confirm(false));
        assert!(ConfirmDeletes::Mobile.should_confirm(true));
        assert!(!ConfirmDeletes::Mobile.should_confirm(false));
    }
}
