//! Configuration parser for loading desired-state documents.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, ConvergeError, Result};
use std::path::Path;
use tracing::{debug, info};

use super::spec::InfraConfig;

/// Configuration parser for loading the desired-state document.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<InfraConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConvergeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<InfraConfig> {
        debug!("Parsing YAML configuration");

        let config: InfraConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for project {} with {} resources",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `CONVERGE_<SECTION>_<KEY>` (e.g., `CONVERGE_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// holds an unusable value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<InfraConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut InfraConfig) -> Result<()> {
        if let Ok(name) = std::env::var("CONVERGE_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Ok(env) = std::env::var("CONVERGE_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Ok(path) = std::env::var("CONVERGE_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Ok(raw) = std::env::var("CONVERGE_MAX_PARALLELISM") {
            debug!("Overriding engine.max_parallelism from environment");
            config.engine.max_parallelism = raw.parse().map_err(|_| {
                ConvergeError::Config(ConfigError::InvalidEnvVar {
                    name: String::from("CONVERGE_MAX_PARALLELISM"),
                    value: raw.clone(),
                })
            })?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConvergeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Resolves a path from the document against the base path.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> std::path::PathBuf {
        let candidate = Path::new(path);
        match &self.base_path {
            Some(base) if candidate.is_relative() => base.join(candidate),
            _ => candidate.to_path_buf(),
        }
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "converge.yaml",
    "converge.yml",
    "infra.yaml",
    "infra.yml",
];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConvergeError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::StateBackend;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("minimal config parses");

        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert!(config.resources.is_empty());
        assert_eq!(config.engine.max_parallelism, 8);
    }

    #[test]
    fn test_parse_api_gateway_config() {
        let yaml = r#"
project:
  name: orders
  environment: prod

engine:
  max_parallelism: 4
  retry:
    max_attempts: 6

schemas:
  api_gateway_api:
    mutable: [display_name, labels]

resources:
  api:
    type: api_gateway_api
    attributes:
      api_id: orders-api
      display_name: Orders
  api_config:
    type: api_gateway_api_config
    attributes:
      api: "${api_gateway_api.api.id}"
      openapi_document: openapi.yaml
    lifecycle:
      create_before_destroy: true
  gateway:
    type: api_gateway_gateway
    attributes:
      api_config: "${api_gateway_api_config.api_config.id}"
      region: us-central1
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("config parses");

        assert_eq!(config.resources.len(), 3);
        assert_eq!(config.engine.max_parallelism, 4);
        assert_eq!(config.engine.retry.max_attempts, 6);
        assert_eq!(config.engine.retry.initial_backoff_ms, 200);
        assert!(config.resources["api_config"].lifecycle.create_before_destroy);
        assert_eq!(
            config.schemas["api_gateway_api"].mutable,
            vec![String::from("display_name"), String::from("labels")]
        );
        assert_eq!(
            config.resources["api"].attributes["display_name"],
            serde_json::json!("Orders")
        );
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let parser = ConfigParser::new();
        let result = parser.parse_yaml("project: [unterminated", None);
        assert!(matches!(
            result,
            Err(ConvergeError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().expect("temp dir");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("nested dirs");
        std::fs::write(temp.path().join("converge.yaml"), "project:\n  name: x\n")
            .expect("write config");

        let found = find_config_file(&nested).expect("config found");
        assert_eq!(found, temp.path().join("converge.yaml"));
    }

    #[test]
    fn test_resolve_path_uses_base() {
        let parser = ConfigParser::new().with_base_path("/srv/project");
        assert_eq!(
            parser.resolve_path(".converge/state.json"),
            std::path::PathBuf::from("/srv/project/.converge/state.json")
        );
        assert_eq!(
            parser.resolve_path("/abs/state.json"),
            std::path::PathBuf::from("/abs/state.json")
        );
    }
}
