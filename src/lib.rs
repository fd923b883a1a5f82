// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(dead_code)]                   // Unused code is flagged
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Test code may unwrap and panic freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A declarative infrastructure reconciliation engine.
//!
//! ## Overview
//!
//! Converge reads a desired-state document, compares it with what it last
//! applied, and makes the provider match:
//!
//! - Resources reference each other's outputs with `${type.name.attribute}`
//! - References and `depends_on` form a dependency graph, checked for cycles
//! - Each resource is classified as no-op, create, update, replace or delete
//! - Independent actions run concurrently; a failure only blocks dependents
//! - Every confirmed change is persisted immediately, one entry at a time
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `converge.yaml`
//! 2. **Applied State**: Versioned entries in the state store
//! 3. **Reconciler**: Plans the difference and executes it
//!
//! ## Modules
//!
//! - [`config`]: Document parsing, validation and hashing
//! - [`graph`]: Reference extraction, graph building and ordering
//! - [`schema`]: Per-type mutability rules
//! - [`planner`]: Diffing, plan construction and concurrent execution
//! - [`provider`]: Provider interface, retries and the sandbox provider
//! - [`state`]: State storage backends (local, memory)
//! - [`reconciler`]: Apply, destroy and drift detection
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: api-gateway
//!   environment: dev
//!
//! resources:
//!   api:
//!     type: api_gateway_api
//!     attributes:
//!       api_id: orders
//!   config:
//!     type: api_gateway_api_config
//!     attributes:
//!       api: "${api_gateway_api.api.id}"
//!     lifecycle:
//!       create_before_destroy: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod schema;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, InfraConfig, ResourceConfig};
pub use error::{ConvergeError, Result};
pub use graph::{DependencyResolver, GraphBuilder, ResourceGraph};
pub use planner::{ApplyExecutor, ApplyReport, DiffEngine, Plan, ResourceStatus};
pub use provider::{Provider, RetryPolicy, SandboxProvider};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler};
pub use schema::SchemaRegistry;
pub use state::{AppliedState, LocalStateStore, MemoryStateStore, StateStore};
