use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use ::config::{Config, Environment, File, FileFormat, Source};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "TRADE_ANALYTICS";
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub analytics: AnalyticsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite:./trade_analytics.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSettings {
    /// Offset of the calendar zone used for day, week and month boundaries.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Layers defaults, then the optional file at `path`, then
    /// `TRADE_ANALYTICS_*` environment variables (`__` between sections).
    pub fn load(path: &str) -> Result<Self> {
        Self::layered(File::with_name(path).required(false))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::layered(File::from_str(toml, FileFormat::Toml))
    }

    fn layered<S>(file: S) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let config: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config
            .validate()
            .map_err(|errors| anyhow!("Invalid configuration: {}", errors.join(", ")))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be > 0".to_string());
        }
        if self.analytics.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            errors.push("analytics.utc_offset_minutes must be within +/-840".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl AnalyticsSettings {
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or_else(|| anyhow!("UTC offset out of range: {} minutes", self.utc_offset_minutes))
    }
}
