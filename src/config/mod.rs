//! Configuration resolution subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML/JSON)
//!     → loader.rs (parse & deserialize)
//!     → normalize.rs (defaults → template → explicit, variables, expansion)
//!     → validation.rs (semantic checks, full violation list)
//!     → Vec<CheckSpec> (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Checks stay untyped JSON until the layered merge completes
//! - Violations are collected across all checks; one run surfaces every
//!   problem
//! - A spec that passes validation is never mutated again

pub mod loader;
pub mod normalize;
pub mod schema;
pub mod validation;

pub use loader::{load_document, ConfigError};
pub use normalize::normalize;
pub use schema::{CheckKind, CheckSpec, DeployDoc};
pub use validation::{validate_specs, Violation};
