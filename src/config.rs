//! User configuration
//!
//! Read from `--config <path>` or `<config dir>/kubetap/config.toml`.
//! A missing file means defaults; command-line flags override file values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use kubetap_exec::{ExecOptions, ShellCommand};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Historical lines fetched per source
    pub tail_lines: i64,

    /// Entries kept for `--save`
    pub buffer_size: usize,

    /// Candidate shells for exec, tried in order
    pub shells: Vec<String>,

    pub connect_timeout_ms: u64,
    pub confirm_window_ms: u64,

    /// Container-engine base URL, e.g. `http://127.0.0.1:2375`
    pub engine_url: Option<String>,

    /// Request per-line timestamps
    pub timestamps: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tail_lines: 100,
            buffer_size: 10000,
            shells: vec!["/bin/bash".to_string(), "/bin/sh".to_string()],
            connect_timeout_ms: 5000,
            confirm_window_ms: 300,
            engine_url: None,
            timestamps: true,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("kubetap").join("config.toml"))
    }

    /// Load from an explicit path, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config {}", path.display()))?;
        Self::parse(&content).context(format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn shell_commands(&self) -> Vec<ShellCommand> {
        self.shells.iter().map(|s| ShellCommand::from(s.as_str())).collect()
    }

    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            confirm_window: Duration::from_millis(self.confirm_window_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse(
            r#"
            tail_lines = 20
            shells = ["/bin/zsh", "/busybox/sh -i"]
            engine_url = "http://127.0.0.1:2375"
            "#,
        )
        .unwrap();

        assert_eq!(config.tail_lines, 20);
        assert_eq!(config.buffer_size, 10000);
        assert_eq!(config.engine_url.as_deref(), Some("http://127.0.0.1:2375"));
        assert_eq!(
            config.shell_commands(),
            vec![
                ShellCommand::from("/bin/zsh"),
                ShellCommand::new(vec!["/busybox/sh".to_string(), "-i".to_string()]),
            ]
        );
    }

    #[test]
    fn test_exec_options() {
        let config = Config {
            connect_timeout_ms: 1500,
            confirm_window_ms: 50,
            ..Default::default()
        };
        let options = config.exec_options();
        assert_eq!(options.connect_timeout, Duration::from_millis(1500));
        assert_eq!(options.confirm_window, Duration::from_millis(50));
    }

    #[test]
    fn test_malformed_file_is_error() {
        assert!(Config::parse("tail_lines = \"many\"").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/kubetap.toml"))).is_err());
    }
}
