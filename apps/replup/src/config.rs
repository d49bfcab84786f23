//! Uploader configuration.
//!
//! Configuration is stored as TOML, looked up in this order:
//! - the file given with `--config`
//! - `./replup.toml` if present
//! - built-in defaults
//!
//! Command-line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use replup_connection::{ConnectionConfig, ResetMode};
use replup_protocol::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_BOOT_QUIET, DEFAULT_BOOT_TIMEOUT, DEFAULT_CHUNK_ATTEMPTS,
    DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT, DEFAULT_LINE_CAPACITY, DEFAULT_PROMPT_TIMEOUT,
    DEFAULT_READ_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
use replup_smash::SmashLevel;
use replup_upload::{ScanFilter, UploadOptions};

use crate::args::Args;

/// File looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "replup.toml";

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound for one serial read, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Wait for the raw or friendly REPL banner.
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    /// Wait for one chunk acknowledgement.
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Attempts per chunk, including the first.
    #[serde(default = "default_chunk_retries")]
    pub chunk_retries: u32,

    /// Longest line accepted from the board, in bytes.
    #[serde(default = "default_line_capacity")]
    pub line_capacity: usize,

    /// `none`, `soft` or `machine`.
    #[serde(default = "default_reset")]
    pub reset: String,

    #[serde(default = "default_boot_quiet_ms")]
    pub boot_quiet_ms: u64,

    #[serde(default = "default_boot_timeout_ms")]
    pub boot_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub smash: bool,

    #[serde(default = "default_smash_level")]
    pub smash_level: u8,

    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub includes: Vec<String>,

    #[serde(default)]
    pub fail_fast: bool,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    millis(DEFAULT_READ_TIMEOUT)
}

fn default_send_timeout_ms() -> u64 {
    millis(DEFAULT_SEND_TIMEOUT)
}

fn default_prompt_timeout_ms() -> u64 {
    millis(DEFAULT_PROMPT_TIMEOUT)
}

fn default_chunk_timeout_ms() -> u64 {
    millis(DEFAULT_CHUNK_TIMEOUT)
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_retries() -> u32 {
    DEFAULT_CHUNK_ATTEMPTS
}

fn default_line_capacity() -> usize {
    DEFAULT_LINE_CAPACITY
}

fn default_reset() -> String {
    ResetMode::None.to_string()
}

fn default_boot_quiet_ms() -> u64 {
    millis(DEFAULT_BOOT_QUIET)
}

fn default_boot_timeout_ms() -> u64 {
    millis(DEFAULT_BOOT_TIMEOUT)
}

fn default_true() -> bool {
    true
}

fn default_smash_level() -> u8 {
    SmashLevel::default().into()
}

fn default_excludes() -> Vec<String> {
    vec![CONFIG_FILE_NAME.into(), "__pycache__".into(), ".git".into()]
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            chunk_size: default_chunk_size(),
            chunk_retries: default_chunk_retries(),
            line_capacity: default_line_capacity(),
            reset: default_reset(),
            boot_quiet_ms: default_boot_quiet_ms(),
            boot_timeout_ms: default_boot_timeout_ms(),
            smash: true,
            smash_level: default_smash_level(),
            excludes: default_excludes(),
            includes: Vec::new(),
            fail_fast: false,
        }
    }
}

impl Config {
    /// Loads the configuration named by `explicit`, else `./replup.toml`,
    /// else defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = PathBuf::from(CONFIG_FILE_NAME);
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reads and parses one TOML file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, args: &Args) {
        if let Some(baud) = args.baud {
            self.baud_rate = baud;
        }
        if let Some(size) = args.chunk_size {
            self.chunk_size = size as usize;
        }
        if let Some(reset) = args.reset {
            self.reset = reset.to_string();
        }
        if args.no_smash {
            self.smash = false;
        }
        if let Some(level) = args.smash_level {
            self.smash_level = level;
        }
        if args.fail_fast {
            self.fail_fast = true;
        }
        for name in &args.excludes {
            if !self.excludes.contains(name) {
                self.excludes.push(name.clone());
            }
        }
        for name in &args.includes {
            if !self.includes.contains(name) {
                self.includes.push(name.clone());
            }
        }
    }

    pub fn reset_mode(&self) -> anyhow::Result<ResetMode> {
        self.reset.parse().map_err(anyhow::Error::msg)
    }

    /// Smash level to apply, `None` when smashing is off.
    pub fn smash_level(&self) -> anyhow::Result<Option<SmashLevel>> {
        let level = SmashLevel::try_from(self.smash_level)?;
        Ok((self.smash && level != SmashLevel::Off).then_some(level))
    }

    pub fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        Ok(ConnectionConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            line_capacity: self.line_capacity,
            write_timeout: Duration::from_millis(self.send_timeout_ms),
            reset: self.reset_mode()?,
            boot_quiet: Duration::from_millis(self.boot_quiet_ms),
            boot_timeout: Duration::from_millis(self.boot_timeout_ms),
            ..ConnectionConfig::default()
        })
    }

    pub fn upload_options(&self, dry_run: bool) -> anyhow::Result<UploadOptions> {
        Ok(UploadOptions {
            chunk_size: self.chunk_size.max(1),
            chunk_attempts: self.chunk_retries.max(1),
            prompt_timeout: Duration::from_millis(self.prompt_timeout_ms),
            chunk_timeout: Duration::from_millis(self.chunk_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            smash: self.smash_level()?,
            dry_run,
            fail_fast: self.fail_fast,
        })
    }

    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter::new(self.excludes.iter().cloned(), self.includes.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout_ms, 100);
        assert_eq!(config.send_timeout_ms, 2000);
        assert_eq!(config.prompt_timeout_ms, 5000);
        assert_eq!(config.chunk_timeout_ms, 5000);
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.chunk_retries, 3);
        assert_eq!(config.line_capacity, 100_000);
        assert_eq!(config.reset, "none");
        assert_eq!(config.boot_quiet_ms, 300);
        assert_eq!(config.boot_timeout_ms, 3000);
        assert!(config.smash);
        assert_eq!(config.smash_level, 2);
        assert_eq!(config.excludes, vec!["replup.toml", "__pycache__", ".git"]);
        assert!(config.includes.is_empty());
        assert!(!config.fail_fast);
    }

    #[test]
    fn config_partial_toml() {
        let config: Config = toml::from_str("chunk_size = 128\nreset = \"soft\"").unwrap();
        assert_eq!(config.chunk_size, 128);
        assert_eq!(config.reset_mode().unwrap(), ResetMode::Soft);
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.excludes.len(), 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            baud_rate: 921_600,
            smash: false,
            includes: vec!["main.py".into()],
            ..Config::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn explicit_file_is_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("board.toml");
        std::fs::write(&path, "fail_fast = true\nexcludes = [\"tests\"]\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert!(config.fail_fast);
        assert_eq!(config.excludes, vec!["tests"]);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(tmp.path().join("nope.toml").as_path())).is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("replup.toml");
        std::fs::write(&path, "chunk_size = \"big\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = Config {
            smash_level: 1,
            ..Config::default()
        };
        let args = Args::try_parse_from([
            "replup", "/dev/ttyACM0", "-e", "docs", "-e", ".git", "--chunk-size", "64",
            "--smash-level", "3", "--reset", "machine", "--fail-fast",
        ])
        .unwrap();
        config.apply(&args);

        assert_eq!(config.chunk_size, 64);
        assert_eq!(config.smash_level, 3);
        assert_eq!(config.reset, "machine");
        assert!(config.fail_fast);
        assert_eq!(
            config.excludes,
            vec!["replup.toml", "__pycache__", ".git", "docs"]
        );
    }

    #[test]
    fn smash_level_zero_or_no_smash_disables_smashing() {
        let config = Config {
            smash_level: 0,
            ..Config::default()
        };
        assert_eq!(config.smash_level().unwrap(), None);

        let config = Config {
            smash: false,
            ..Config::default()
        };
        assert_eq!(config.smash_level().unwrap(), None);

        let config = Config {
            smash_level: 9,
            ..Config::default()
        };
        assert!(config.smash_level().is_err());
    }

    #[test]
    fn unknown_reset_mode_is_an_error() {
        let config = Config {
            reset: "sideways".into(),
            ..Config::default()
        };
        assert!(config.connection_config().is_err());
    }

    #[test]
    fn options_carry_config_values() {
        let config = Config {
            chunk_size: 64,
            chunk_retries: 5,
            ..Config::default()
        };
        let options = config.upload_options(true).unwrap();
        assert_eq!(options.chunk_size, 64);
        assert_eq!(options.chunk_attempts, 5);
        assert!(options.dry_run);
        assert_eq!(options.smash, Some(SmashLevel::FullLineComments));
        assert_eq!(options.prompt_timeout, Duration::from_secs(5));
    }
}
