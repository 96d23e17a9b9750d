use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

const CONFIG_FILE: &str = "aerolopa";
const ENV_PREFIX: &str = "AEROLOPA";

/// Upper bound for `pipeline.freshness_hours`: one hundred years.
pub const MAX_FRESHNESS_HOURS: i64 = 100 * 365 * 24;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Layered settings: defaults, then `aerolopa.toml`, then `AEROLOPA__*` env vars.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub crawler: CrawlerSettings,
    pub throttle: ThrottleSettings,
    pub pipeline: PipelineSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.aerolopa.com/".into(),
            user_agent: "Mozilla/5.0 (compatible; aerolopa-crawler/0.1)".into(),
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            rate_limit_delay_ms: 10_000,
        }
    }
}

impl CrawlerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    pub max_concurrent: usize,
    pub min_interval_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_interval_ms: 1000,
        }
    }
}

impl ThrottleSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub freshness_hours: i64,
    pub min_image_bytes: u64,
    pub workers: usize,
    pub accept_unrecognized: bool,
    pub lease_ttl_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            freshness_hours: 24,
            min_image_bytes: 50 * 1024,
            workers: 4,
            accept_unrecognized: true,
            lease_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub output_dir: PathBuf,
    pub database: String,
    pub event_log: String,
    pub image_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            database: "seatmaps.sqlite".into(),
            event_log: "events.jsonl".into(),
            image_dir: "images".into(),
        }
    }
}

impl StorageSettings {
    pub fn database_path(&self) -> PathBuf {
        self.output_dir.join(&self.database)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.output_dir.join(&self.event_log)
    }

    pub fn image_root(&self) -> PathBuf {
        self.output_dir.join(&self.image_dir)
    }
}

impl Settings {
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load with `file` as the optional config file name (extension optional).
    pub fn load_from(file: &str) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: &str| Err(SettingsError::Invalid(msg.to_string()));

        match url::Url::parse(&self.crawler.base_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            _ => return invalid("crawler.base_url must be an absolute http(s) URL"),
        }
        if self.crawler.max_retries == 0 {
            return invalid("crawler.max_retries must be at least 1");
        }
        if self.crawler.timeout_secs == 0 {
            return invalid("crawler.timeout_secs must be positive");
        }
        if !(self.crawler.backoff_multiplier >= 1.0) {
            return invalid("crawler.backoff_multiplier must be >= 1.0");
        }
        if self.throttle.max_concurrent == 0 {
            return invalid("throttle.max_concurrent must be at least 1");
        }
        if self.pipeline.workers == 0 {
            return invalid("pipeline.workers must be at least 1");
        }
        if !(0..=MAX_FRESHNESS_HOURS).contains(&self.pipeline.freshness_hours) {
            return invalid("pipeline.freshness_hours must be between 0 and 876000");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.throttle.max_concurrent, 2);
        assert_eq!(s.pipeline.min_image_bytes, 51_200);
        assert_eq!(s.crawler.max_retries, 3);
        assert_eq!(s.storage.database_path(), PathBuf::from("data/seatmaps.sqlite"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut s = Settings::default();
        s.throttle.max_concurrent = 0;
        assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut s = Settings::default();
        s.crawler.base_url = "ftp://aerolopa.com".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut s = Settings::default();
        s.crawler.backoff_multiplier = 0.5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_freshness() {
        let mut s = Settings::default();
        s.pipeline.freshness_hours = -1;
        assert!(s.validate().is_err());
        s.pipeline.freshness_hours = i64::MAX;
        assert!(s.validate().is_err());
        s.pipeline.freshness_hours = MAX_FRESHNESS_HOURS;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler.toml");
        std::fs::write(
            &path,
            "[throttle]\nmax_concurrent = 3\nmin_interval_ms = 1500\n\n[pipeline]\nfreshness_hours = 48\n",
        )
        .unwrap();

        let s = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(s.throttle.max_concurrent, 3);
        assert_eq!(s.throttle.min_interval(), Duration::from_millis(1500));
        assert_eq!(s.pipeline.freshness_hours, 48);
        // untouched sections keep their defaults
        assert_eq!(s.crawler.max_retries, 3);
    }
}
