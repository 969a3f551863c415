//! Service configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, a
//! `config.yaml` found in `.` or `./config`, and `DATA_SERVICE_*`
//! environment variables. Durations are written in human form (`5s`,
//! `24h`, `100ms`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "DATA_SERVICE_";
const CONFIG_FILE: &str = "config.yaml";
const SEARCH_DIRS: [&str; 2] = [".", "./config"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub log_level: String,
    pub log_format: LogFormat,
    #[serde(with = "duration_str")]
    pub processing_interval: Duration,
    pub batch_size: usize,
    pub job_batch_size: usize,
    #[serde(with = "duration_str")]
    pub retention_period: Duration,
    #[serde(with = "duration_str")]
    pub shutdown_grace_period: Duration,
    #[serde(with = "duration_str")]
    pub processing_delay_min: Duration,
    #[serde(with = "duration_str")]
    pub processing_delay_max: Duration,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub count: usize,
    #[serde(with = "duration_str")]
    pub interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            database_url: "sqlite://data.db".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            processing_interval: Duration::from_secs(5),
            batch_size: 10,
            job_batch_size: 20,
            retention_period: Duration::from_secs(24 * 60 * 60),
            shutdown_grace_period: Duration::from_secs(30),
            processing_delay_min: Duration::from_millis(100),
            processing_delay_max: Duration::from_millis(600),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: 50,
            interval: Duration::from_millis(100),
        }
    }
}

/// A loaded configuration plus the file it came from, if any.
#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub source: Option<PathBuf>,
}

impl Config {
    /// Loads `config.yaml` from the search path, then applies environment
    /// overrides and validates the result.
    pub fn load() -> Result<ConfigLoad> {
        let source = SEARCH_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(CONFIG_FILE))
            .find(|path| path.is_file());

        let mut config = match &source {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(ConfigLoad { config, source })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Applies `DATA_SERVICE_<FIELD>` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(v) = var("PORT") {
            self.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.log_format = match v.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => return Err(Error::Config(format!("invalid LOG_FORMAT: {}", other))),
            };
        }
        if let Some(v) = var("PROCESSING_INTERVAL") {
            self.processing_interval = parse_duration("PROCESSING_INTERVAL", &v)?;
        }
        if let Some(v) = var("BATCH_SIZE") {
            self.batch_size = parse_number("BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("JOB_BATCH_SIZE") {
            self.job_batch_size = parse_number("JOB_BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("RETENTION_PERIOD") {
            self.retention_period = parse_duration("RETENTION_PERIOD", &v)?;
        }
        if let Some(v) = var("SHUTDOWN_GRACE_PERIOD") {
            self.shutdown_grace_period = parse_duration("SHUTDOWN_GRACE_PERIOD", &v)?;
        }
        if let Some(v) = var("PROCESSING_DELAY_MIN") {
            self.processing_delay_min = parse_duration("PROCESSING_DELAY_MIN", &v)?;
        }
        if let Some(v) = var("PROCESSING_DELAY_MAX") {
            self.processing_delay_max = parse_duration("PROCESSING_DELAY_MAX", &v)?;
        }
        if let Some(v) = var("GENERATOR_COUNT") {
            self.generator.count = parse_number("GENERATOR_COUNT", &v)?;
        }
        if let Some(v) = var("GENERATOR_INTERVAL") {
            self.generator.interval = parse_duration("GENERATOR_INTERVAL", &v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::validation("batch_size must be positive"));
        }
        if self.job_batch_size == 0 {
            return Err(Error::validation("job_batch_size must be positive"));
        }
        if self.processing_interval.is_zero() {
            return Err(Error::validation("processing_interval must be positive"));
        }
        if self.processing_delay_max < self.processing_delay_min {
            return Err(Error::validation(
                "processing_delay_max must not be below processing_delay_min",
            ));
        }
        let retention = self.retention()?;
        if chrono::Utc::now().checked_sub_signed(retention).is_none() {
            return Err(Error::validation("retention_period reaches before the earliest timestamp"));
        }
        Ok(())
    }

    /// The retention period as a signed span for timestamp arithmetic.
    pub fn retention(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.retention_period)
            .map_err(|e| Error::Config(format!("retention_period out of range: {}", e)))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {}: {}", name, e)))
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| Error::Config(format!("invalid {}: {}", name, e)))
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
