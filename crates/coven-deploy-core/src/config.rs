// ABOUTME: Configuration for the coven-deploy supervisor and its timing constants.
// ABOUTME: Loaded from TOML file with sensible defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Time units between supervisor polling passes.
pub const TICK_UNITS: u32 = 3;
/// Time units between the graceful terminate and the forceful kill.
pub const TERMINATE_GRACE_UNITS: u32 = 3;
/// Time units between the forceful kill and releasing the process.
pub const KILL_GRACE_UNITS: u32 = 1;

/// Length of the "time unit" every supervisor wait is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    unit: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Timing {
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis.max(1)))
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    pub fn units(&self, count: u32) -> Duration {
        self.unit * count
    }
}

/// The first workload deployed when the supervisor starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapConfig {
    #[serde(default = "default_bootstrap_module")]
    pub module: String,

    #[serde(default = "default_bootstrap_argument")]
    pub argument: String,

    /// Readiness timeout for the first workload, in time units
    #[serde(default = "default_bootstrap_timeout")]
    pub timeout_units: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            module: default_bootstrap_module(),
            argument: default_bootstrap_argument(),
            timeout_units: default_bootstrap_timeout(),
        }
    }
}

fn default_bootstrap_module() -> String {
    "echo".to_string()
}

fn default_bootstrap_argument() -> String {
    "master".to_string()
}

fn default_bootstrap_timeout() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Length of one time unit in milliseconds
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,

    /// Readiness timeout used when redeploying after a queued restart
    #[serde(default = "default_timeout_units")]
    pub default_timeout_units: u32,

    /// Directory holding `<module>.toml` definitions
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,

    /// Binary spawned for workers (defaults to the running executable)
    #[serde(default)]
    pub worker_executable: Option<String>,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

fn default_time_unit_ms() -> u64 {
    1000
}

fn default_timeout_units() -> u32 {
    30
}

fn default_modules_dir() -> String {
    "~/.config/coven/modules".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_unit_ms: default_time_unit_ms(),
            default_timeout_units: default_timeout_units(),
            modules_dir: default_modules_dir(),
            worker_executable: None,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load an explicit path, else the default path if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = Self::default_path()?;
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            tracing::debug!(path = %default_path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/coven/deploy.toml)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("coven");
        Ok(config_dir.join("deploy.toml"))
    }

    /// Expand ~ in the modules directory
    pub fn modules_dir_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.modules_dir).into_owned().into()
    }

    /// Expand ~ in the worker executable, if one is configured
    pub fn worker_executable_expanded(&self) -> Option<PathBuf> {
        self.worker_executable
            .as_ref()
            .map(|exe| shellexpand::tilde(exe).into_owned().into())
    }

    pub fn timing(&self) -> Timing {
        Timing::from_millis(self.time_unit_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            time_unit_ms = 250
            default_timeout_units = 10
            modules_dir = "/srv/modules"

            [bootstrap]
            module = "ticker"
            argument = "3"
        "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.time_unit_ms, 250);
        assert_eq!(config.default_timeout_units, 10);
        assert_eq!(config.bootstrap.module, "ticker");
        assert_eq!(config.bootstrap.argument, "3");
        assert_eq!(config.bootstrap.timeout_units, 60);
        assert_eq!(config.modules_dir_expanded(), PathBuf::from("/srv/modules"));
        assert_eq!(config.timing().unit(), Duration::from_millis(250));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bootstrap.module, "echo");
        assert_eq!(config.bootstrap.argument, "master");
        assert_eq!(config.timing(), Timing::default());
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deploy.toml");

        let config = Config {
            worker_executable: Some("/usr/local/bin/coven-deploy".to_string()),
            bootstrap: BootstrapConfig {
                module: "ticker".to_string(),
                argument: "5".to_string(),
                timeout_units: 20,
            },
            ..Config::default()
        };

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn test_path_expansion() {
        let config = Config {
            modules_dir: "~/modules".to_string(),
            worker_executable: Some("~/bin/worker".to_string()),
            ..Config::default()
        };

        let modules = config.modules_dir_expanded();
        assert!(!modules.to_string_lossy().contains('~'));
        let home = std::env::var("HOME").unwrap();
        assert!(modules.to_string_lossy().starts_with(&home));
        assert!(config.worker_executable_expanded().is_some());
        assert!(Config::default().worker_executable_expanded().is_none());
    }

    #[test]
    fn test_timing_units() {
        let timing = Timing::from_millis(200);
        assert_eq!(timing.units(TICK_UNITS), Duration::from_millis(600));
        assert_eq!(timing.units(KILL_GRACE_UNITS), Duration::from_millis(200));
        assert_eq!(Timing::from_millis(0).unit(), Duration::from_millis(1));
    }
}
