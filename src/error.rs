/// Error type for API calls, cache reads and mutations.
///
/// Every failure path in the crate ends in one of these variants. The type is
/// `Clone` so the last error can be kept on a cache entry next to the last
/// good value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("network error: {message}")]
    Network { message: String },
    /// HTTP 404.
    #[error("[{status}] not found: {message}")]
    NotFound { status: u16, message: String },
    /// Any other HTTP 4xx.
    #[error("[{status}] rejected: {message}")]
    Validation { status: u16, message: String },
    /// HTTP 5xx.
    #[error("[{status}] server error: {message}")]
    Server { status: u16, message: String },
    /// The body was not the JSON we expected.
    #[error("decode error: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        ApiError::Decode {
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status with an already extracted message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => ApiError::NotFound { status, message },
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Validation { status, message },
        }
    }

    /// The HTTP status embedded in the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound { status, .. }
            | ApiError::Validation { status, .. }
            | ApiError::Server { status, .. } => Some(*status),
            ApiError::Network { .. } | ApiError::Decode { .. } => None,
        }
    }

    /// The normalized `{ message }` part of the error.
    pub fn message(&self) -> &str {
        match self {
            ApiError::Network { message }
            | ApiError::NotFound { message, .. }
            | ApiError::Validation { message, .. }
            | ApiError::Server { message, .. }
            | ApiError::Decode { message } => message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// Transport failures and 5xx responses may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::Server { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApiError::decode(err.to_string());
        }
        match err.status() {
            Some(status) => ApiError::from_status(status.as_u16(), err.to_string()),
            None => ApiError::network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::decode(err.to_string())
    }
}

/// Error raised while loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Failed to build HTTP client: {0}")]
    Http(#[source] ApiError),
}
