//! Configuration loaded from `config.toml`

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::ContextOptions;
use crate::repository::DEFAULT_BULK_OFFLOAD_THRESHOLD;
use crate::retry::RetryPolicy;
use crate::storage::{LiteOptions, RelationalOptions};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "REPOKIT_CONFIG_DIR";

/// Repokit configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepokitConfig {
    pub retry: RetryConfig,
    pub context: ContextConfig,
    pub relational: RelationalConfig,
    pub lite: LiteConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub settle_delay_ms: u64,
    pub file_extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    pub wal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiteConfig {
    pub busy_timeout_secs: u64,
    pub wal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bulk_offload_threshold: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            backoff_factor: policy.backoff_factor,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        let options = ContextOptions::default();
        Self {
            settle_delay_ms: options.settle_delay.as_millis() as u64,
            file_extension: options.file_extension,
        }
    }
}

impl Default for RelationalConfig {
    fn default() -> Self {
        let options = RelationalOptions::default();
        Self {
            max_connections: options.max_connections,
            busy_timeout_secs: options.busy_timeout.as_secs(),
            wal: options.wal,
        }
    }
}

impl Default for LiteConfig {
    fn default() -> Self {
        let options = LiteOptions::default();
        Self {
            busy_timeout_secs: options.busy_timeout.as_secs(),
            wal: options.wal,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bulk_offload_threshold: DEFAULT_BULK_OFFLOAD_THRESHOLD,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .max_retries(self.max_retries)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .backoff_factor(self.backoff_factor)
    }
}

impl ContextConfig {
    pub fn options(&self) -> ContextOptions {
        ContextOptions {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            file_extension: self.file_extension.clone(),
        }
    }
}

impl RelationalConfig {
    pub fn options(&self) -> RelationalOptions {
        RelationalOptions {
            max_connections: self.max_connections,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
            wal: self.wal,
        }
    }
}

impl LiteConfig {
    pub fn options(&self) -> LiteOptions {
        LiteOptions {
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
            wal: self.wal,
        }
    }
}

impl RepokitConfig {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("repokit")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the config directory, or defaults if there is no file
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RepokitConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the config directory
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.backoff_factor == 0 {
            bail!("retry.backoff_factor must be at least 1");
        }
        if self.relational.max_connections == 0 {
            bail!("relational.max_connections must be at least 1");
        }
        let extension = self.context.file_extension.trim();
        if extension.is_empty() {
            bail!("context.file_extension cannot be empty");
        }
        if extension.starts_with('.') {
            bail!("context.file_extension must not start with a dot");
        }
        Ok(())
    }
}
