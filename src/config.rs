//! Configuration management for Mocri Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub inventory: InventoryConfig,
    pub models: ModelConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body (images travel base64-encoded)
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// Local inventory snapshot read at startup
    pub snapshot_path: PathBuf,
    /// Write a freshly fetched inventory back to `snapshot_path`
    pub persist_snapshot: bool,
    /// Base URL of the model registry
    pub registry_url: String,
    /// Timeout for registry requests (listing and downloads)
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Directory holding downloaded model files
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// External recognizer command line, e.g. `python3 -m mocri_bridge`
    pub recognizer_command: Option<String>,
    /// Upper bound on concurrently running OCR jobs
    pub max_jobs: usize,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: env::temp_dir().join("kraken_models.json"),
            persist_snapshot: false,
            registry_url: "http://localhost:8600/registry".to_string(),
            http_timeout_secs: 300,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("kraken"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recognizer_command: None,
            max_jobs: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            inventory: InventoryConfig::default(),
            models: ModelConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let max_jobs: usize = parse_var("MOCRI_MAX_JOBS")?.unwrap_or(defaults.engine.max_jobs);
        if max_jobs == 0 {
            return Err(ConfigError::Invalid {
                var: "MOCRI_MAX_JOBS",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT")?.unwrap_or(defaults.server.port),
                max_body_bytes: parse_var("MOCRI_MAX_BODY_BYTES")?
                    .unwrap_or(defaults.server.max_body_bytes),
            },
            inventory: InventoryConfig {
                snapshot_path: env::var("MOCRI_SNAPSHOT_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.inventory.snapshot_path),
                persist_snapshot: parse_var("MOCRI_PERSIST_SNAPSHOT")?
                    .unwrap_or(defaults.inventory.persist_snapshot),
                registry_url: env::var("MOCRI_REGISTRY_URL")
                    .unwrap_or(defaults.inventory.registry_url),
                http_timeout_secs: parse_var("MOCRI_HTTP_TIMEOUT_SECS")?
                    .unwrap_or(defaults.inventory.http_timeout_secs),
            },
            models: ModelConfig {
                model_dir: env::var("MOCRI_MODEL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.models.model_dir),
            },
            engine: EngineConfig {
                recognizer_command: env::var("MOCRI_RECOGNIZER_CMD")
                    .ok()
                    .filter(|cmd| !cmd.trim().is_empty()),
                max_jobs,
            },
        })
    }
}

/// Read and parse an optional environment variable
fn parse_var<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(None),
    }
}
