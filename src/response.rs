use crate::error::ThrottlerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

impl ThrottlerError {
    /// Only a reached limit is a client-facing outcome; anything else that
    /// escapes to a handler calling [`crate::Throttler::check`] is a server
    /// fault.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ThrottlerError::LimitReached(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors render as plain text; a throttled request gets exactly the
/// configured message as its body.
impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
