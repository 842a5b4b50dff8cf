use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

const DATA_DIR: &str = ".procflow";
const DEFAULT_DB_FILE: &str = "workflow.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Settings read from `~/.procflow/rc`
///
/// The file is line based, `key=value`, with `#` comments:
///
/// ```text
/// data.location=./workflow.db
/// db.busy_timeout_ms=5000
/// log.level=info
/// ```
///
/// Relative `data.location` paths resolve against the rc file's directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_location: PathBuf,
    pub busy_timeout_ms: u64,
    pub log_level: Option<String>,
}

impl Config {
    /// Directory holding the rc file and the default database
    pub fn data_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(DATA_DIR))
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("rc"))
    }

    /// Defaults rooted at `data_dir`
    pub fn defaults(data_dir: &Path) -> Self {
        Self {
            data_location: data_dir.join(DEFAULT_DB_FILE),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            log_level: None,
        }
    }

    /// Load the rc file, falling back to defaults when it does not exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let data_dir = Self::data_dir()?;

        if !config_path.exists() {
            return Ok(Self::defaults(&data_dir));
        }
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::parse(&content, &data_dir)
    }

    /// Parse rc file content. `base_dir` anchors relative paths.
    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config = Self::defaults(base_dir);

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                anyhow::bail!("Invalid config line {}: '{}' (expected key=value)", lineno + 1, line);
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "data.location" => {
                    let path = PathBuf::from(value);
                    config.data_location = if path.is_relative() {
                        base_dir.join(path)
                    } else {
                        path
                    };
                }
                "db.busy_timeout_ms" => {
                    config.busy_timeout_ms = value.parse().with_context(|| {
                        format!("Invalid db.busy_timeout_ms '{}' on line {}", value, lineno + 1)
                    })?;
                }
                "log.level" => config.log_level = Some(value.to_string()),
                other => log::debug!("Ignoring unknown config key '{}'", other),
            }
        }

        Ok(config)
    }
}
