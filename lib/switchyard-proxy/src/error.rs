use hyper::StatusCode;
use switchyard_api::ConfigError;
use switchyard_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: StatusCode, message: String },

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Stream proxy failed: {0}")]
    Stream(String),

    #[error("Invalid upstream URI: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("Failed to read request body: {0}")]
    Body(String),
}

impl ProxyError {
    /// Status code returned to the caller for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Core(CoreError::EmptyNodes)
            | ProxyError::Core(CoreError::ServiceUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::Core(_) | ProxyError::Config(_) | ProxyError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream { status, .. } if status.is_server_error() => *status,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Body(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream { .. } | ProxyError::Stream(_) | ProxyError::InvalidUri(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}
