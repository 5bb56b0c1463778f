use thiserror::Error;

/// Default body of a throttled response.
pub const LIMIT_REACHED_MESSAGE: &str = "Request limit reached, Cooldown a bit !";

#[derive(Debug, Error)]
pub enum ThrottlerError {
    /// The key resolver could not turn the request into a key
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// No live counter exists for the key
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A live counter already exists for the key
    #[error("Key already exists: {0}")]
    KeyExists(String),

    /// The request exceeded its threshold; carries the response body
    #[error("{0}")]
    LimitReached(String),

    #[error("Invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(i64),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottlerError {
    /// Whether this error should turn into a rejected request.
    ///
    /// Everything else fails open: the throttle attempt is abandoned and the
    /// request goes through.
    pub fn is_limit_reached(&self) -> bool {
        matches!(self, ThrottlerError::LimitReached(_))
    }
}

impl From<validator::ValidationErrors> for ThrottlerError {
    fn from(err: validator::ValidationErrors) -> Self {
        ThrottlerError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for ThrottlerError {
    fn from(err: serde_json::Error) -> Self {
        ThrottlerError::Configuration(format!("Invalid config file: {}", err))
    }
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;
