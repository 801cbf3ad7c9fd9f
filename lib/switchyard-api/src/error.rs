use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Registration-time validation failures. Each one rejects a single route.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unsupported target type: {0}")]
    UnsupportedTargetType(String),

    #[error("Unsupported fetcher source: {0}")]
    UnsupportedFetcher(String),

    #[error("Invalid route configuration: {0}")]
    InvalidRouteConfig(String),
}
