use log::Level;
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

use crate::error::Error;
use crate::logger::levels_at_or_above;

const APP_DIR: &str = "webhook-notifier";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub notifications: NotificationOptions,
    pub monitor: MonitorOptions,
    pub sites: SiteList,
}

#[derive(Debug, Deserialize)]
pub struct NotificationOptions {
    pub webhook_url: Option<String>,
    #[serde(default = "default_level")]
    pub level: Level,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            webhook_url: None,
            level: default_level(),
        }
    }
}

fn default_level() -> Level {
    Level::Warn
}

#[derive(Debug, Deserialize)]
pub struct MonitorOptions {
    pub timeout_secs: u64,
    pub check_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SiteList {
    pub urls: Vec<String>,
}

impl Config {
    /// Loads the config file (`CONFIG_PATH`, or `config.toml` under the user
    /// config directory) and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Fails if no config location can be determined, the file cannot be
    /// read or parsed, or an override is malformed.
    pub fn load() -> Result<Config, Error> {
        let path = match dotenvy::var("CONFIG_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_path()?,
        };
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| dotenvy::var(key).ok())?;
        Ok(config)
    }

    /// Reads and parses a config file without applying overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid TOML.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Overrides file values with `WEBHOOK_URL` and `NOTIFICATION_LEVEL`.
    ///
    /// # Errors
    ///
    /// Fails if `NOTIFICATION_LEVEL` is not a log level name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(webhook_url) = lookup("WEBHOOK_URL") {
            self.notifications.webhook_url = Some(webhook_url);
        }
        if let Some(level) = lookup("NOTIFICATION_LEVEL") {
            self.notifications.level = level.trim().parse()?;
        }
        Ok(())
    }

    /// The webhook URL, empty when not configured anywhere.
    #[must_use]
    pub fn webhook_url(&self) -> &str {
        self.notifications.webhook_url.as_deref().unwrap_or_default()
    }

    /// Every level at or above the configured notification level.
    #[must_use]
    pub fn notification_levels(&self) -> Vec<Level> {
        levels_at_or_above(self.notifications.level)
    }
}

fn default_path() -> Result<PathBuf, Error> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .ok_or_else(|| Error::Config("Could not determine the user config directory".to_string()))
}
