use crate::error::{PaymentError, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an attempt may hold an idempotency key before others may take it over.
    pub lock_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        i64::try_from(self.lock_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// RocksDB directory. In-memory storage when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            PaymentError::ConfigError(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|err| PaymentError::ConfigError(err.to_string()))?;
        if config.engine.lock_timeout_secs == 0 {
            return Err(PaymentError::ConfigError(
                "engine.lock_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.lock_timeout(), Duration::minutes(5));
        assert!(config.storage.path.is_none());
        assert!(config.logging.filter.is_none());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config = Config::parse(
            r#"
            [engine]
            lock_timeout_secs = 30

            [logging]
            filter = "payrail=debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.lock_timeout(), Duration::seconds(30));
        assert_eq!(config.logging.filter.as_deref(), Some("payrail=debug"));
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_zero_lock_timeout_is_rejected() {
        let result = Config::parse("[engine]\nlock_timeout_secs = 0\n");
        assert!(matches!(result, Err(PaymentError::ConfigError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\npath = \"/tmp/payrail-db\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/payrail-db")));
        assert!(Config::load(Path::new("/definitely/missing.toml")).is_err());
    }
}
