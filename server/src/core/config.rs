//! Application configuration
//!
//! Precedence, highest first: CLI flag > environment variable (handled by
//! `clap`'s `env = ...` on each field, so it is already folded into
//! `CliConfig` by the time it reaches here) > JSON config file > persisted
//! `Settings` record (stats toggles and interactions-storage only, read
//! back from storage at start-up) > built-in default.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SESSION_TTL_MINUTES,
    DEFAULT_TIMEZONE, ENV_DATA_DIR,
};

/// Which calendar intervals are currently rolled up, besides `allTime`
/// which is always enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsToggles {
    pub hourly: bool,
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
    pub quarterly: bool,
    pub yearly: bool,
}

impl Default for StatsToggles {
    fn default() -> Self {
        Self {
            hourly: true,
            daily: true,
            weekly: true,
            monthly: true,
            quarterly: true,
            yearly: true,
        }
    }
}

/// Server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Mutable runtime settings; this is the in-memory mirror of the
/// `Settings` resource persisted through the storage interface and
/// exposed read/write via `GET/PUT /dashboard/settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: String,
    pub stats_toggles: StatsToggles,
    pub interactions_storage: bool,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Settings {
    pub const ID: &'static str = "settings";

    pub fn new(stats_toggles: StatsToggles, interactions_storage: bool, api_key: Option<String>) -> Self {
        Self {
            id: Self::ID.to_string(),
            stats_toggles,
            interactions_storage,
            api_key,
        }
    }
}

/// Top-level application configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `dev` disables the `api-key` check; anything else behaves as production.
    pub environment: String,
    pub timezone: Tz,
    pub session_ttl_minutes: u64,
    pub settings: Settings,
}

impl AppConfig {
    pub fn is_dev(&self) -> bool {
        self.environment == "dev"
    }

    /// `stored` is whatever `Settings` record storage holds from a previous
    /// run's `PUT /dashboard/settings` (`None` on a first-ever boot). It
    /// slots in between the config file and the hardcoded default: a toggle
    /// flipped through the dashboard takes effect on the next restart, but
    /// `--stats-hourly`/env/file still win if set.
    pub fn load(cli: &CliConfig, stored: Option<&Settings>) -> Result<Self> {
        let file_config = Self::load_file(cli)?;

        let host = cli
            .host
            .clone()
            .or(file_config.as_ref().and_then(|f| f.host.clone()))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli
            .port
            .or(file_config.as_ref().and_then(|f| f.port))
            .unwrap_or(DEFAULT_PORT);
        let environment = cli
            .env
            .clone()
            .or(file_config.as_ref().and_then(|f| f.env.clone()))
            .unwrap_or_else(|| "prod".to_string());
        let timezone_name = cli
            .timezone
            .clone()
            .or(file_config.as_ref().and_then(|f| f.timezone.clone()))
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid timezone: {timezone_name}"))?;
        let session_ttl_minutes = cli
            .session_ttl_minutes
            .or(file_config.as_ref().and_then(|f| f.session_ttl_minutes))
            .unwrap_or(DEFAULT_SESSION_TTL_MINUTES);
        let api_key = cli
            .api_key
            .clone()
            .or(file_config.as_ref().and_then(|f| f.api_key.clone()));
        let interactions_storage = cli
            .interactions_storage
            .or(file_config.as_ref().and_then(|f| f.interactions_storage))
            .or(stored.map(|s| s.interactions_storage))
            .unwrap_or(true);

        let file_toggles = file_config.as_ref().and_then(|f| f.stats_toggles);
        let stored_toggles = stored.map(|s| s.stats_toggles);
        let default_toggles = file_toggles.or(stored_toggles).unwrap_or_default();
        let stats_toggles = StatsToggles {
            hourly: cli.stats_hourly.unwrap_or(default_toggles.hourly),
            daily: cli.stats_daily.unwrap_or(default_toggles.daily),
            weekly: cli.stats_weekly.unwrap_or(default_toggles.weekly),
            monthly: cli.stats_monthly.unwrap_or(default_toggles.monthly),
            quarterly: cli.stats_quarterly.unwrap_or(default_toggles.quarterly),
            yearly: cli.stats_yearly.unwrap_or(default_toggles.yearly),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            environment,
            timezone,
            session_ttl_minutes,
            settings: Settings::new(stats_toggles, interactions_storage, api_key),
        })
    }

    fn load_file(cli: &CliConfig) -> Result<Option<FileConfig>> {
        let path = match &cli.config {
            Some(p) => p.clone(),
            None => {
                let default_path = Self::default_config_path();
                if !default_path.exists() {
                    return Ok(None);
                }
                default_path
            }
        };

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let parsed: FileConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(Some(parsed))
    }

    fn default_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return expand_path(&dir).join(CONFIG_FILE_NAME);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DOT_FOLDER)
            .join(CONFIG_FILE_NAME)
    }
}

/// Optional on-disk JSON config file; every field is optional so a file can
/// override just one setting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    env: Option<String>,
    timezone: Option<String>,
    session_ttl_minutes: Option<u64>,
    api_key: Option<String>,
    interactions_storage: Option<bool>,
    stats_toggles: Option<StatsToggles>,
}

/// True when a host string means "bind to every interface".
pub fn is_all_interfaces(host: &str) -> bool {
    host == "0.0.0.0" || host == "::"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_set() {
        let cli = CliConfig::default();
        // Avoid touching a real config file on the test host.
        let mut cli = cli;
        cli.config = Some(PathBuf::from("/nonexistent/engauge-config-test.json"));
        let cfg = AppConfig::load(&cli, None).unwrap();
        assert_eq!(cfg.server.host, DEFAULT_HOST);
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.environment, "prod");
        assert!(cfg.settings.stats_toggles.hourly);
    }

    #[test]
    fn cli_overrides_defaults() {
        let mut cli = CliConfig::default();
        cli.config = Some(PathBuf::from("/nonexistent/engauge-config-test.json"));
        cli.port = Some(9999);
        cli.env = Some("dev".to_string());
        cli.stats_hourly = Some(false);
        let cfg = AppConfig::load(&cli, None).unwrap();
        assert_eq!(cfg.server.port, 9999);
        assert!(cfg.is_dev());
        assert!(!cfg.settings.stats_toggles.hourly);
    }

    #[test]
    fn stored_settings_override_defaults_but_not_cli() {
        let mut cli = CliConfig::default();
        cli.config = Some(PathBuf::from("/nonexistent/engauge-config-test.json"));
        cli.stats_daily = Some(true);

        let stored = Settings::new(
            StatsToggles { hourly: false, daily: false, weekly: false, monthly: true, quarterly: true, yearly: true },
            false,
            None,
        );
        let cfg = AppConfig::load(&cli, Some(&stored)).unwrap();

        assert!(!cfg.settings.stats_toggles.hourly, "stored toggle beats the hardcoded default");
        assert!(cfg.settings.stats_toggles.daily, "explicit CLI flag still wins over storage");
        assert!(!cfg.settings.interactions_storage);
    }

    #[test]
    fn is_all_interfaces_detects_wildcard() {
        assert!(is_all_interfaces("0.0.0.0"));
        assert!(!is_all_interfaces("127.0.0.1"));
    }
}
