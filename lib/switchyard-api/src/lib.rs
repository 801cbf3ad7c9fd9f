//! Switchyard API types for declarative routing configuration
//!
//! This library defines:
//! - Instance: a discovered backend address with version/locality tags
//! - RouteConfig: one gateway route (match, target, rewrite, mock)
//! - ConfigError: registration-time validation failures

pub mod error;
pub mod v1alpha1;

pub use error::{ConfigError, Result};
pub use v1alpha1::*;

/// JSON schema of a single route entry, for config tooling
pub fn route_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RouteConfig)
}
