//! Application configuration.
//!
//! Precedence: built-in defaults, then the YAML config file (a missing file
//! is not an error), then `ENGRAM_*` environment variables (empty values do
//! not override). Secrets are env-only: they are `#[serde(skip)]`, so they
//! can neither be read from nor serialized into YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Top-level configuration for the server and CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stores: StoresConfig,
    pub embedding: EmbeddingConfig,
    pub auth: AuthConfig,
    pub worker: WorkerConfig,
    pub log: LogConfig,
    pub dedup: DedupConfig,
    pub snapshot_storage: SnapshotStorageConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time to read a request.
    pub read_timeout_secs: u64,
    /// Maximum time to write a response.
    pub write_timeout_secs: u64,
    /// Grace period for draining in-flight requests at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs + self.write_timeout_secs)
    }
}

/// Primary database path (legacy single-store deployments).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.engram/engram.db".to_string(),
        }
    }
}

/// Multi-store root settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoresConfig {
    /// Directory all stores live under. `~/` expands to the home directory.
    pub root: String,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            root: "~/.engram/stores".to_string(),
        }
    }
}

impl StoresConfig {
    /// The root path with `~/` expanded.
    #[must_use]
    pub fn root_path(&self) -> PathBuf {
        expand_home(&self.root)
    }
}

/// Embedding vendor settings. The API key is env-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Vendor endpoint for batch embedding requests.
    pub endpoint: String,
    /// Model name sent with each request.
    pub model: String,
    /// Expected embedding dimensions.
    pub dimensions: usize,
    /// API key; `ENGRAM_EMBEDDING_API_KEY` only, never YAML.
    #[serde(skip)]
    pub api_key: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_key: String::new(),
        }
    }
}

/// Static bearer-key auth. Empty key disables auth (development mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// API key; `ENGRAM_API_KEY` only, never YAML.
    #[serde(skip)]
    pub api_key: String,
}

/// Background coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub snapshot_interval_secs: u64,
    pub decay_interval_secs: u64,
    pub embedding_retry_interval_secs: u64,
    pub compaction_interval_secs: u64,
    /// Embedding attempts before an entry is marked permanently failed.
    pub embedding_max_attempts: u32,
    /// Pending-embedding rows fetched per store per cycle.
    pub embedding_batch_size: usize,
    /// Confidence subtracted by each decay pass.
    pub decay_amount: f64,
    /// Change-log entries older than this are compaction candidates.
    pub compaction_retention_secs: u64,
    /// How long a push idempotency record answers replays.
    pub push_idempotency_ttl_secs: u64,
    /// Run the snapshot coordinator immediately on start instead of
    /// waiting for the first tick.
    pub snapshot_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 3_600,
            decay_interval_secs: 86_400,
            embedding_retry_interval_secs: 300,
            compaction_interval_secs: 86_400,
            embedding_max_attempts: 5,
            embedding_batch_size: 32,
            decay_amount: 0.02,
            compaction_retention_secs: 30 * 86_400,
            push_idempotency_ttl_secs: 86_400,
            snapshot_on_start: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `trace` | `debug` | `info` | `warn` | `error`.
    pub level: String,
    /// `text` | `json`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Dedup settings; consumed as configuration only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            similarity_threshold: 0.95,
        }
    }
}

/// Snapshot upload target. Credentials are env-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotStorageConfig {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub url_expiry_secs: u64,
    pub use_tls: bool,
    /// `ENGRAM_S3_ACCESS_KEY` only, never YAML.
    #[serde(skip)]
    pub access_key: String,
    /// `ENGRAM_S3_SECRET_KEY` only, never YAML.
    #[serde(skip)]
    pub secret_key: String,
}

impl Default for SnapshotStorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: String::new(),
            region: "us-east-1".to_string(),
            url_expiry_secs: 3_600,
            use_tls: true,
            access_key: String::new(),
            secret_key: String::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration with full precedence: defaults, then the YAML
    /// file at `path` (missing file is fine), then environment variables.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| EngramError::Meta(format!("config parse: {e}")))?
            }
            _ => Self::default(),
        };
        config.apply_env_with(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies environment overrides through an injectable lookup.
    ///
    /// Empty values do not override; unparsable numeric values are ignored
    /// in favor of the current value.
    pub fn apply_env_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        fn set_string(target: &mut String, value: Option<String>) {
            if let Some(value) = value {
                if !value.is_empty() {
                    *target = value;
                }
            }
        }
        fn set_parsed<T: std::str::FromStr>(target: &mut T, value: Option<String>) {
            if let Some(value) = value {
                if let Ok(parsed) = value.parse() {
                    *target = parsed;
                }
            }
        }

        set_string(&mut self.server.host, get("ENGRAM_HOST"));
        set_parsed(&mut self.server.port, get("ENGRAM_PORT"));
        set_parsed(&mut self.server.read_timeout_secs, get("ENGRAM_READ_TIMEOUT"));
        set_parsed(
            &mut self.server.write_timeout_secs,
            get("ENGRAM_WRITE_TIMEOUT"),
        );
        set_parsed(
            &mut self.server.shutdown_timeout_secs,
            get("ENGRAM_SHUTDOWN_TIMEOUT"),
        );

        set_string(&mut self.database.path, get("ENGRAM_DATABASE_PATH"));
        set_string(&mut self.stores.root, get("ENGRAM_STORES_ROOT"));

        set_string(&mut self.embedding.endpoint, get("ENGRAM_EMBEDDING_ENDPOINT"));
        set_string(&mut self.embedding.model, get("ENGRAM_EMBEDDING_MODEL"));
        set_parsed(
            &mut self.embedding.dimensions,
            get("ENGRAM_EMBEDDING_DIMENSIONS"),
        );
        set_string(&mut self.embedding.api_key, get("ENGRAM_EMBEDDING_API_KEY"));

        set_string(&mut self.auth.api_key, get("ENGRAM_API_KEY"));

        set_parsed(
            &mut self.worker.snapshot_interval_secs,
            get("ENGRAM_SNAPSHOT_INTERVAL"),
        );
        set_parsed(
            &mut self.worker.decay_interval_secs,
            get("ENGRAM_DECAY_INTERVAL"),
        );
        set_parsed(
            &mut self.worker.embedding_retry_interval_secs,
            get("ENGRAM_EMBEDDING_RETRY_INTERVAL"),
        );
        set_parsed(
            &mut self.worker.compaction_interval_secs,
            get("ENGRAM_COMPACTION_INTERVAL"),
        );
        set_parsed(
            &mut self.worker.compaction_retention_secs,
            get("ENGRAM_COMPACTION_RETENTION"),
        );

        set_string(&mut self.log.level, get("ENGRAM_LOG_LEVEL"));
        set_string(&mut self.log.format, get("ENGRAM_LOG_FORMAT"));

        set_string(&mut self.snapshot_storage.bucket, get("ENGRAM_S3_BUCKET"));
        set_string(&mut self.snapshot_storage.endpoint, get("ENGRAM_S3_ENDPOINT"));
        set_string(&mut self.snapshot_storage.region, get("ENGRAM_S3_REGION"));
        set_string(
            &mut self.snapshot_storage.access_key,
            get("ENGRAM_S3_ACCESS_KEY"),
        );
        set_string(
            &mut self.snapshot_storage.secret_key,
            get("ENGRAM_S3_SECRET_KEY"),
        );
    }
}

/// Expands a leading `~/` to the user's home directory.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.worker.embedding_max_attempts, 5);
        assert!(!config.worker.snapshot_on_start);
        assert!(config.auth.api_key.is_empty());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/engram.yaml"))).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.yaml");
        std::fs::write(
            &path,
            "server:\n  port: 9999\nstores:\n  root: /data/stores\nlog:\n  level: debug\n",
        )
        .unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.stores.root, "/data/stores");
        assert_eq!(config.log.level, "debug");
        // Untouched sections keep defaults.
        assert_eq!(config.worker.embedding_batch_size, 32);
    }

    #[test]
    fn env_overrides_yaml() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("ENGRAM_PORT", "7070"),
            ("ENGRAM_API_KEY", "secret-key"),
            ("ENGRAM_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();
        config.apply_env_with(|name| env.get(name).map(ToString::to_string));
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.auth.api_key, "secret-key");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn empty_env_does_not_override() {
        let mut config = AppConfig::default();
        config.stores.root = "/data/stores".to_string();
        let env: HashMap<&str, &str> = [("ENGRAM_STORES_ROOT", "")].into_iter().collect();
        config.apply_env_with(|name| env.get(name).map(ToString::to_string));
        assert_eq!(config.stores.root, "/data/stores");
    }

    #[test]
    fn secrets_never_serialize() {
        let mut config = AppConfig::default();
        config.auth.api_key = "super-secret".to_string();
        config.embedding.api_key = "embed-secret".to_string();
        config.snapshot_storage.secret_key = "s3-secret".to_string();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("super-secret"));
        assert!(!yaml.contains("embed-secret"));
        assert!(!yaml.contains("s3-secret"));
    }

    #[test]
    fn secrets_never_deserialize_from_yaml() {
        let yaml = "auth:\n  api_key: sneaky\n";
        // serde(skip) means the field is absent from the YAML shape entirely;
        // an explicit key in the file is rejected as unknown-but-ignored by
        // serde_yaml's default behavior, and the field stays empty.
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap_or_default();
        assert!(config.auth.api_key.is_empty());
    }

    #[test]
    fn home_expansion() {
        let expanded = expand_home("~/stores");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
