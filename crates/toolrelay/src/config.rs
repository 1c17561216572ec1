//! Runtime configuration: ledger windows, retention horizon, session idle
//! timeout and per-provider call timeouts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::ProviderKind;
use crate::error::{CoreError, CoreResult};

pub const RUNTIME_CONFIG_FILENAME: &str = "runtime.json";
pub const RUNTIME_CONFIG_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub version: String,
    #[serde(default)]
    pub ledger: LedgerPreferences,
    #[serde(default)]
    pub session: SessionPreferences,
    #[serde(default)]
    pub providers: ProviderPreferences,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerPreferences {
    /// Default staleness window for "did this tool succeed recently" queries.
    pub recent_window_ms: u64,
    pub retention_max_per_session: usize,
    pub retention_max_age_ms: u64,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPreferences {
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderPreferences {
    pub local_timeout_ms: u64,
    pub sandbox_timeout_ms: u64,
    pub remote_timeout_ms: u64,
}

impl Default for LedgerPreferences {
    fn default() -> Self {
        Self {
            recent_window_ms: 30_000,
            retention_max_per_session: 500,
            retention_max_age_ms: 3_600_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1_800_000,
        }
    }
}

impl Default for ProviderPreferences {
    fn default() -> Self {
        Self {
            local_timeout_ms: 10_000,
            sandbox_timeout_ms: 30_000,
            remote_timeout_ms: 30_000,
        }
    }
}

impl ProviderPreferences {
    pub fn timeout_for(&self, kind: ProviderKind) -> Duration {
        let millis = match kind {
            ProviderKind::Local => self.local_timeout_ms,
            ProviderKind::Sandboxed => self.sandbox_timeout_ms,
            ProviderKind::Remote => self.remote_timeout_ms,
        };
        Duration::from_millis(millis)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: RUNTIME_CONFIG_VERSION.to_string(),
            ledger: LedgerPreferences::default(),
            session: SessionPreferences::default(),
            providers: ProviderPreferences::default(),
        }
    }
}

pub fn load_or_create_runtime_config(dir: &Path) -> CoreResult<RuntimeConfig> {
    std::fs::create_dir_all(dir).map_err(|error| {
        CoreError::Internal(format!(
            "failed to create config directory {}: {error}",
            dir.display()
        ))
    })?;

    let path = runtime_config_path(dir);
    if !path.exists() {
        let config = RuntimeConfig::default();
        write_runtime_config(&path, &config)?;
        return Ok(config);
    }

    let data = std::fs::read_to_string(&path).map_err(|error| {
        CoreError::Internal(format!(
            "failed to read runtime config {}: {error}",
            path.display()
        ))
    })?;
    let config: RuntimeConfig = serde_json::from_str(&data).map_err(|error| {
        CoreError::InvalidInput(format!(
            "failed to parse runtime config {}: {error}",
            path.display()
        ))
    })?;

    if major_version(&config.version) != major_version(RUNTIME_CONFIG_VERSION) {
        return Err(CoreError::InvalidInput(format!(
            "unsupported runtime config version {} (expected {}.x)",
            config.version,
            major_version(RUNTIME_CONFIG_VERSION)
        )));
    }
    if config.ledger.sweep_interval_ms == 0 {
        return Err(CoreError::InvalidInput(format!(
            "ledger.sweep_interval_ms in {} must be greater than zero",
            path.display()
        )));
    }

    Ok(config)
}

pub fn runtime_config_path(dir: &Path) -> PathBuf {
    dir.join(RUNTIME_CONFIG_FILENAME)
}

pub fn write_runtime_config(path: &Path, config: &RuntimeConfig) -> CoreResult<()> {
    let data = serde_json::to_string_pretty(config).map_err(|error| {
        CoreError::Internal(format!(
            "failed to serialize runtime config {}: {error}",
            path.display()
        ))
    })?;
    std::fs::write(path, data).map_err(|error| {
        CoreError::Internal(format!(
            "failed to write runtime config {}: {error}",
            path.display()
        ))
    })?;
    Ok(())
}

fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}
