use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::inference::PreprocessConfig;
use crate::inference::artifacts::ArtifactConfig;
use crate::storage::UploadConfig;

const DEFAULT_CONFIG_PATH: &str = "config/leafguard.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub uploads: UploadConfig,
    pub artifacts: ArtifactConfig,
    pub preprocessing: PreprocessConfig,
    /// External knowledge base replacing the embedded table.
    pub knowledge_base: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            static_dir: None,
        }
    }
}

impl AppConfig {
    /// Reads `LEAFGUARD_CONFIG` (or the default path), then applies
    /// environment overrides. A missing file means built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("LEAFGUARD_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        let mut config = if path.exists() {
            log::info!("Reading configuration from {}", path.display());
            Self::from_file(path)?
        } else {
            log::info!("No configuration at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_override("PORT", &port)?;
        }
        if let Some(dir) = lookup("UPLOAD_FOLDER") {
            self.uploads.dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("MAX_UPLOAD_BYTES") {
            self.uploads.max_bytes = parse_override("MAX_UPLOAD_BYTES", &max)?;
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            self.artifacts.dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("KNOWLEDGE_BASE_PATH") {
            self.knowledge_base = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.preprocessing.width == 0 || self.preprocessing.height == 0 {
            return Err(ConfigError::Invalid(
                "preprocessing width and height must be non-zero".into(),
            ));
        }
        if self.uploads.max_bytes == 0 {
            return Err(ConfigError::Invalid("uploads.max_bytes must be non-zero".into()));
        }
        if self.uploads.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "uploads.allowed_extensions must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}
