//! Effective configuration with provenance
//!
//! The merged configuration plus the list of sources it came from, resolved
//! once per command into a typed [`ToolConfig`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use mender_format::{Compression, FORMAT_NAME, SUPPORTED_VERSIONS};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

/// Typed settings every command works from
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub output_path: PathBuf,
    pub format_name: String,
    pub format_version: u32,
    pub compression: Compression,
    /// Parent for per-command scratch directories; system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

impl EffectiveConfig {
    /// Build effective config from layers.
    ///
    /// A config file that was asked for explicitly must exist.
    pub fn build(
        config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        if let Some(path) = config_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let config = Self {
            config: merge_layers(layers),
            sources,
        };
        tracing::debug!(sources = config.sources.len(), "configuration merged");
        Ok(config)
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    /// Validate the merged values and convert them to [`ToolConfig`]
    pub fn resolve(&self) -> Result<ToolConfig, ConfigError> {
        let output_path = self.required_str("output_path")?;
        let format_name = self.required_str("format.name")?;
        if format_name != FORMAT_NAME {
            return Err(ConfigError::ValidationError(format!(
                "format.name must be '{}', got '{}'",
                FORMAT_NAME, format_name
            )));
        }

        let format_version = self
            .get_u64("format.version")
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| SUPPORTED_VERSIONS.contains(v))
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "format.version must be one of {:?}",
                    SUPPORTED_VERSIONS
                ))
            })?;

        let compression = self
            .get_str("format.compression")
            .ok_or_else(|| {
                ConfigError::ValidationError("format.compression must be a string".to_string())
            })?
            .parse::<Compression>()
            .map_err(|e| ConfigError::ValidationError(format!("format.compression: {}", e)))?;

        let scratch_dir = match self.get("scratch_dir") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.is_empty() => Some(PathBuf::from(s)),
            Some(_) => {
                return Err(ConfigError::ValidationError(
                    "scratch_dir must be a non-empty string".to_string(),
                ))
            }
        };

        Ok(ToolConfig {
            output_path: PathBuf::from(output_path),
            format_name: format_name.to_string(),
            format_version,
            compression,
            scratch_dir,
        })
    }

    fn required_str(&self, path: &str) -> Result<&str, ConfigError> {
        self.get_str(path)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::ValidationError(format!("{} must be a non-empty string", path)))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
