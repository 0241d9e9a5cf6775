//! Server configuration
//!
//! Loaded from a flat `KEY=VALUE` file. Lines starting with `#` and blank
//! lines are skipped, whitespace around keys and values is trimmed, unknown
//! keys are logged and ignored. Every key has a default, so an absent
//! default config file means "run with defaults".

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

/// Path tried when no config file is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "server.conf";

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found
    #[error("config file not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A line that is neither a comment nor `KEY=VALUE`
    #[error("line {line}: expected KEY=VALUE, got {text:?}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// The offending line, trimmed.
        text: String,
    },

    /// A numeric key with a non-numeric or out-of-range value
    #[error("line {line}: invalid value for {key}: {value:?}")]
    InvalidValue {
        /// 1-based line number.
        line: usize,
        /// The key being assigned.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// A structurally valid file describing an unusable server
    #[error("validation error: {0}")]
    Validation(String),
}

/// Runtime configuration for the master and every worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen port.
    pub port: u16,
    /// Filesystem prefix for request targets.
    pub document_root: PathBuf,
    /// Worker process count.
    pub num_workers: usize,
    /// Thread pool size per worker.
    pub threads_per_worker: usize,
    /// Per-connection receive/send timeout.
    pub timeout: Duration,
    /// Cache capacity per worker in MiB; 0 disables the cache.
    pub cache_size_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            document_root: PathBuf::from("/var/www/html"),
            num_workers: 4,
            threads_per_worker: 10,
            timeout: Duration::from_secs(30),
            cache_size_mb: 10,
        }
    }
}

impl Config {
    /// Loads configuration from an explicitly chosen file. A missing file is
    /// an error.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Loads configuration from the default path, falling back to built-in
    /// defaults when the file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if !path.exists() {
            info!("no {DEFAULT_CONFIG_PATH} found, using built-in defaults");
            return Ok(Config::default());
        }

        Self::load_file(path)
    }

    /// Parses `KEY=VALUE` configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Malformed {
                    line: idx + 1,
                    text: line.to_owned(),
                });
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "PORT" => config.port = parse_number(idx + 1, key, value)?,
                "DOCUMENT_ROOT" => config.document_root = PathBuf::from(value),
                "NUM_WORKERS" => config.num_workers = parse_number(idx + 1, key, value)?,
                "THREADS_PER_WORKER" => {
                    config.threads_per_worker = parse_number(idx + 1, key, value)?;
                }
                "TIMEOUT_SECONDS" => {
                    config.timeout = Duration::from_secs(parse_number(idx + 1, key, value)?);
                }
                "CACHE_SIZE_MB" => config.cache_size_mb = parse_number(idx + 1, key, value)?,
                _ => warn!("ignoring unknown configuration key {key:?}"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::Validation(
                "NUM_WORKERS must be at least 1".to_owned(),
            ));
        }
        if self.threads_per_worker == 0 {
            return Err(ConfigError::Validation(
                "THREADS_PER_WORKER must be at least 1".to_owned(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "TIMEOUT_SECONDS must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Cache capacity in bytes.
    #[inline]
    pub fn cache_bytes(&self) -> usize {
        self.cache_size_mb * 1024 * 1024
    }
}

fn parse_number<T: std::str::FromStr>(
    line: usize,
    key: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        line,
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::time::Duration;

    use super::{Config, ConfigError};

    #[test]
    fn empty_input_yields_defaults() {
        let config = Config::parse("").expect("empty config is valid");
        assert_eq!(8080, config.port);
        assert_eq!("/var/www/html", config.document_root.to_str().expect("utf8"));
        assert_eq!(4, config.num_workers);
        assert_eq!(10, config.threads_per_worker);
        assert_eq!(Duration::from_secs(30), config.timeout);
        assert_eq!(10, config.cache_size_mb);
    }

    #[test]
    fn recognized_keys_override_defaults() {
        let config = Config::parse(
            "PORT=9090\n\
             DOCUMENT_ROOT=/srv/www\n\
             NUM_WORKERS=2\n\
             THREADS_PER_WORKER=4\n\
             TIMEOUT_SECONDS=5\n\
             CACHE_SIZE_MB=1\n",
        )
        .expect("valid config");
        assert_eq!(9090, config.port);
        assert_eq!("/srv/www", config.document_root.to_str().expect("utf8"));
        assert_eq!(2, config.num_workers);
        assert_eq!(4, config.threads_per_worker);
        assert_eq!(Duration::from_secs(5), config.timeout);
        assert_eq!(1, config.cache_size_mb);
    }

    #[test]
    fn comments_blanks_and_padding_are_tolerated() {
        let config = Config::parse(
            "# main listener\n\
             \n\
             \t PORT =  8000  \n\
             # trailing comment\n",
        )
        .expect("valid config");
        assert_eq!(8000, config.port);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::parse("NOT_A_KEY=whatever\nPORT=81\n").expect("valid config");
        assert_eq!(81, config.port);
    }

    #[test]
    fn line_without_equals_is_rejected() {
        match Config::parse("PORT 8080\n") {
            Err(ConfigError::Malformed { line: 1, .. }) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        match Config::parse("PORT=eighty\n") {
            Err(ConfigError::InvalidValue { line: 1, ref key, .. }) if key == "PORT" => {}
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn zero_workers_fail_validation() {
        assert!(matches!(
            Config::parse("NUM_WORKERS=0\n"),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn load_file_reads_from_disk_and_missing_path_is_not_found() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("server.conf");
        let mut file = std::fs::File::create(&path).expect("create config");
        writeln!(file, "PORT=8888").expect("write config");

        let config = Config::load_file(&path).expect("load config");
        assert_eq!(8888, config.port);

        assert!(matches!(
            Config::load_file(dir.path().join("absent.conf")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn cache_bytes_converts_mebibytes() {
        let config = Config::parse("CACHE_SIZE_MB=2\n").expect("valid config");
        assert_eq!(2 * 1024 * 1024, config.cache_bytes());
    }
}
