use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::paths::Paths;
use crate::supervisor::{DEFAULT_QUEUE_CAPACITY, ServiceOptions};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub protection: ProtectionConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Directory under the one-way policy. Empty means data_dir/protected.
    /// Overridden by COPYGUARD_ROOT.
    #[serde(default)]
    pub root: String,

    /// Refuse to start unless running as Administrator / root.
    #[serde(default = "default_true")]
    pub require_elevation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Events held between the channels and the enforcement worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Show popups on Windows; log-only elsewhere
    #[serde(default = "default_true")]
    pub desktop: bool,

    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" (default) or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_title() -> String {
    crate::guard::PROTECTION_TITLE.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            desktop: default_true(),
            title: default_title(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            require_elevation: default_true(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        Self::load_from(paths, |key| std::env::var(key))
    }

    /// Load from the resolved paths, creating a templated config on first run.
    pub fn load_from<F>(paths: Paths, env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        let path = paths.config_file();

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mut config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            config.paths = paths;
            config
        } else {
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            config
        };

        if let Ok(root) = env_fn("COPYGUARD_ROOT")
            && !root.trim().is_empty()
        {
            config.protection.root = root.trim().to_string();
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    /// Protected root with `~` expanded; falls back to data_dir/protected.
    pub fn root_path(&self) -> PathBuf {
        let configured = self.protection.root.trim();
        if configured.is_empty() {
            return self.paths.default_root();
        }
        PathBuf::from(shellexpand::tilde(configured).to_string())
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            queue_capacity: self.watcher.queue_capacity,
            require_elevation: self.protection.require_elevation,
        }
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["protection", "root"] => Ok(self.root_path().display().to_string()),
            ["protection", "require_elevation"] => {
                Ok(self.protection.require_elevation.to_string())
            }
            ["watcher", "queue_capacity"] => Ok(self.watcher.queue_capacity.to_string()),
            ["notifications", "desktop"] => Ok(self.notifications.desktop.to_string()),
            ["notifications", "title"] => Ok(self.notifications.title.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["protection", "root"] => self.protection.root = value.to_string(),
            ["protection", "require_elevation"] => {
                self.protection.require_elevation = value.parse()?
            }
            ["watcher", "queue_capacity"] => {
                let capacity: usize = value.parse()?;
                if capacity == 0 {
                    anyhow::bail!("watcher.queue_capacity must be at least 1");
                }
                self.watcher.queue_capacity = capacity;
            }
            ["notifications", "desktop"] => self.notifications.desktop = value.parse()?,
            ["notifications", "title"] => self.notifications.title = value.to_string(),
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => match value {
                "text" | "json" => self.logging.format = value.to_string(),
                _ => anyhow::bail!("logging.format must be \"text\" or \"json\""),
            },
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# copyguard configuration
# Auto-created on first run. Edit as needed.

[protection]
# Directory under the one-way policy: files may not be copied out via the
# clipboard, and foreign files created inside are removed.
# Default: XDG data dir (~/.local/share/copyguard/protected)
# Override with COPYGUARD_ROOT=/path/to/root
# root = "~/Protected"

# Refuse to start unless running as Administrator / root.
require_elevation = true

[watcher]
# Events buffered between the clipboard/filesystem observers and the
# enforcement worker. Overflow is logged and the event is dropped.
queue_capacity = 4096

[notifications]
# Popups on Windows; other platforms log only.
desktop = true
title = "File protection active"

[logging]
level = "info"
# format = "json"    # structured output for log collectors
"#;
