//! Configuration validation for desired-state documents.
//!
//! This module checks names, engine settings, and schema declarations before
//! a graph is built. Reference integrity (unknown targets, cycles) is left to
//! the graph builder, which reports it as a structural graph error.

use crate::error::{ConfigError, ConvergeError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{EngineConfig, InfraConfig, ResourceConfig, SchemaConfig, StateBackend};

/// Validator for desired-state documents.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a desired-state document.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &InfraConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ConvergeError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every check and collects all findings without failing.
    #[must_use]
    pub fn check(&self, config: &InfraConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_engine(&config.engine, &mut result);
        Self::validate_resources(config, &mut result);
        Self::validate_schemas(config, &mut result);

        result
    }

    /// Validates project configuration.
    fn validate_project(config: &InfraConfig, result: &mut ValidationResult) {
        let project = &config.project;
        if project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates state configuration.
    fn validate_state(config: &InfraConfig, result: &mut ValidationResult) {
        match config.state.backend {
            StateBackend::Local => {
                if config.state.path.as_ref().is_some_and(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.path"),
                        message: String::from("State path cannot be empty"),
                    });
                }
            }
            StateBackend::Memory => {
                result.warnings.push(String::from(
                    "state.backend: memory state is discarded when the process exits",
                ));
            }
        }
    }

    /// Validates engine tuning.
    fn validate_engine(engine: &EngineConfig, result: &mut ValidationResult) {
        if engine.max_parallelism == 0 {
            result.errors.push(ValidationError {
                field: String::from("engine.max_parallelism"),
                message: String::from("Maximum parallelism must be at least 1"),
            });
        }

        if engine.parallelism == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("engine.parallelism"),
                message: String::from("Parallelism must be at least 1"),
            });
        }

        let retry = &engine.retry;
        if retry.max_attempts == 0 {
            result.errors.push(ValidationError {
                field: String::from("engine.retry.max_attempts"),
                message: String::from("Retry attempts must be at least 1"),
            });
        }

        if retry.multiplier < 1.0 {
            result.errors.push(ValidationError {
                field: String::from("engine.retry.multiplier"),
                message: String::from("Backoff multiplier must be at least 1.0"),
            });
        }

        if retry.initial_backoff_ms > retry.max_backoff_ms {
            result.errors.push(ValidationError {
                field: String::from("engine.retry.initial_backoff_ms"),
                message: format!(
                    "Initial backoff ({}ms) exceeds maximum backoff ({}ms)",
                    retry.initial_backoff_ms, retry.max_backoff_ms
                ),
            });
        }

        if retry.max_attempts > 10 {
            result.warnings.push(format!(
                "engine.retry.max_attempts: {} attempts can stall a run for a long time",
                retry.max_attempts
            ));
        }
    }

    /// Validates all resource declarations.
    fn validate_resources(config: &InfraConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        for (name, resource) in &config.resources {
            let prefix = format!("resources.{name}");

            if !is_valid_resource_name(name) {
                result.errors.push(ValidationError {
                    field: prefix.clone(),
                    message: format!(
                        "Resource name '{name}' is invalid. Must start with a letter and contain only lowercase letters, digits, '_' or '-'."
                    ),
                });
            }

            Self::validate_resource(name, resource, &prefix, result);
        }
    }

    /// Validates a single resource declaration.
    fn validate_resource(
        name: &str,
        resource: &ResourceConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        if resource.resource_type.is_empty() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.type"),
                message: String::from("Resource type cannot be empty"),
            });
        } else if !is_valid_type_name(&resource.resource_type) {
            result.errors.push(ValidationError {
                field: format!("{prefix}.type"),
                message: format!(
                    "Resource type '{}' is invalid. Must be lowercase alphanumeric with underscores.",
                    resource.resource_type
                ),
            });
        }

        let mut seen = HashSet::new();
        for (i, dep) in resource.depends_on.iter().enumerate() {
            if dep == name {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.depends_on[{i}]"),
                    message: format!("Resource '{name}' cannot depend on itself"),
                });
            }
            if !seen.insert(dep) {
                result.warnings.push(format!(
                    "{prefix}.depends_on[{i}]: Duplicate dependency '{dep}'"
                ));
            }
        }

        if resource.attributes.is_empty() {
            result
                .warnings
                .push(format!("{prefix}.attributes: Resource has no attributes"));
        }
    }

    /// Validates schema declarations.
    fn validate_schemas(config: &InfraConfig, result: &mut ValidationResult) {
        let used_types: HashSet<&str> = config
            .resources
            .values()
            .map(|r| r.resource_type.as_str())
            .collect();

        for (resource_type, schema) in &config.schemas {
            let prefix = format!("schemas.{resource_type}");

            if !is_valid_type_name(resource_type) {
                result.errors.push(ValidationError {
                    field: prefix.clone(),
                    message: format!("Schema type '{resource_type}' is invalid"),
                });
            }

            if !used_types.contains(resource_type.as_str()) {
                result.warnings.push(format!(
                    "{prefix}: No resource of type '{resource_type}' is declared"
                ));
            }

            Self::validate_schema(schema, &prefix, result);
        }

        for resource_type in used_types {
            if !config.schemas.contains_key(resource_type) {
                result.warnings.push(format!(
                    "schemas.{resource_type}: No schema declared; every change will replace the resource"
                ));
            }
        }
    }

    /// Validates a single schema descriptor.
    fn validate_schema(schema: &SchemaConfig, prefix: &str, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, attribute) in schema.mutable.iter().enumerate() {
            if attribute.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.mutable[{i}]"),
                    message: String::from("Attribute name cannot be empty"),
                });
            } else if !seen.insert(attribute) {
                result.warnings.push(format!(
                    "{prefix}.mutable[{i}]: Duplicate attribute '{attribute}'"
                ));
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Logical resource names: a lowercase letter, then lowercase letters,
/// digits, underscores or hyphens. Dots are reserved for reference syntax.
fn is_valid_resource_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Resource type names: a lowercase letter, then lowercase letters, digits
/// or underscores.
fn is_valid_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> InfraConfig {
        ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("test config parses")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("api-gateway"));
        assert!(is_valid_name("orders-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Api-Gateway")); // uppercase
        assert!(!is_valid_name("123-api")); // starts with number
        assert!(!is_valid_name("api-")); // ends with hyphen
        assert!(!is_valid_name("api--gw")); // consecutive hyphens
    }

    #[test]
    fn test_resource_and_type_names() {
        assert!(is_valid_resource_name("api_config"));
        assert!(is_valid_resource_name("gw-1"));
        assert!(!is_valid_resource_name("api.config"));
        assert!(!is_valid_resource_name("_hidden"));
        assert!(is_valid_type_name("api_gateway_api"));
        assert!(!is_valid_type_name("api-gateway"));
    }

    #[test]
    fn test_valid_document_passes() {
        let config = parse(
            r"
project:
  name: orders
schemas:
  bucket:
    mutable: [labels]
resources:
  assets:
    type: bucket
    attributes:
      location: eu
",
        );
        let result = ConfigValidator::new()
            .validate(&config)
            .expect("document is valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let config = parse(
            r"
project:
  name: orders
resources:
  loop:
    type: bucket
    attributes: { a: 1 }
    depends_on: [loop]
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "resources.loop.depends_on[0]");
    }

    #[test]
    fn test_engine_settings_rejected() {
        let config = parse(
            r"
project:
  name: orders
engine:
  max_parallelism: 0
  retry:
    max_attempts: 0
    multiplier: 0.5
resources: {}
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"engine.max_parallelism"));
        assert!(fields.contains(&"engine.retry.max_attempts"));
        assert!(fields.contains(&"engine.retry.multiplier"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_missing_schema_warns() {
        let config = parse(
            r"
project:
  name: orders
resources:
  gw:
    type: api_gateway_gateway
    attributes: { region: eu }
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("schemas.api_gateway_gateway")));
    }
}
