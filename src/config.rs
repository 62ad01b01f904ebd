//! Configuration loading for ptyterm.
//!
//! A session is described by a TOML file, typically at
//! `~/.ptyterm/config.toml`:
//!
//! ```toml
//! # Program to run (defaults to the platform shell)
//! program = "/bin/bash"
//! args = ["-l"]
//!
//! # Environment entries applied over the inherited environment
//! env = ["TERM=xterm-256color"]
//!
//! rows = 24
//! cols = 80
//! scrollback_limit = 10000
//! ```
//!
//! A missing or unreadable file yields the defaults; a file that fails
//! to parse is reported and the defaults are used.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pty::SpawnSpec;
use crate::term::state::Theme;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Program to run
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Working directory; empty means inherit
    pub working_dir: String,
    /// `KEY=VALUE` entries applied over the inherited environment
    pub env: Vec<String>,
    /// Initial screen rows
    pub rows: u16,
    /// Initial screen columns
    pub cols: u16,
    /// Maximum retained scrollback lines
    pub scrollback_limit: usize,
    /// Default colors
    pub theme: Theme,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            program: default_shell(),
            args: Vec::new(),
            working_dir: String::new(),
            env: Vec::new(),
            rows: 24,
            cols: 80,
            scrollback_limit: crate::term::scrollback::DEFAULT_SCROLLBACK_CAPACITY,
            theme: Theme::default(),
        }
    }
}

impl TerminalConfig {
    /// Load configuration from the default location
    pub fn load() -> Self {
        match config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a specific file, falling back to the
    /// defaults when the file is missing or malformed
    pub fn load_or_default(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "config parse failed; using defaults");
                Self::default()
            }
        }
    }

    /// Build the spawn description for this configuration
    pub fn spawn_spec(&self) -> SpawnSpec {
        let mut spec = SpawnSpec::new(&self.program);
        for arg in &self.args {
            spec = spec.arg(arg);
        }
        if !self.working_dir.is_empty() {
            spec = spec.working_dir(&self.working_dir);
        }
        for entry in &self.env {
            spec = spec.env(entry);
        }
        spec
    }
}

/// Platform shell used when no program is configured
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
}

fn config_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".ptyterm").join("config.toml"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TerminalConfig::default();
        assert_eq!(config.rows, 24);
        assert_eq!(config.cols, 80);
        assert_eq!(config.scrollback_limit, 10_000);
        assert!(!config.program.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: TerminalConfig = toml::from_str(
            r#"
            program = "/bin/bash"
            args = ["-l"]
            rows = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.program, "/bin/bash");
        assert_eq!(config.args, vec!["-l"]);
        assert_eq!(config.rows, 40);
        assert_eq!(config.cols, 80);
    }

    #[test]
    fn test_spawn_spec_carries_everything() {
        let config = TerminalConfig {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "true".into()],
            working_dir: "/tmp".into(),
            env: vec!["A=1".into()],
            ..Default::default()
        };
        let spec = config.spawn_spec();
        assert_eq!(spec.program, "/bin/sh");
        assert_eq!(spec.args, vec!["-c", "true"]);
        assert_eq!(spec.working_dir.to_string_lossy(), "/tmp");
        assert_eq!(spec.env, vec!["A=1"]);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = TerminalConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.rows, 24);
    }
}
