//! Configuration module for the Converge engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `converge.yaml`
//! - Validation of configuration values
//! - Computing content hashes for plans and state

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    EngineConfig, InfraConfig, LifecycleConfig, ProjectConfig, ProviderBackend, ProviderConfig,
    ResourceConfig, RetryConfig, SchemaConfig, StateBackend, StateConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
