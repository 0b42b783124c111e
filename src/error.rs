use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the rule engine and its Gmail side effects
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned an unexpected non-success status
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// No credential could be obtained; aborts a batch before any remote call
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Credential rejected by the server (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists (409), e.g. a label created by a parallel run
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limited (429). Treated as a client error and not retried.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Retry attempts exhausted for one remote operation
    #[error("Remote operation '{operation}' failed after {attempts} attempt(s): {source}")]
    RemoteOperationFailed {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<GmailError>,
    },

    /// A rule pattern is not a valid regular expression
    #[error("Invalid {field} pattern '{pattern}': {reason}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        reason: String,
    },

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// Key-value storage read/write failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Scheduler is gone or rejected a command
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input handed to the engine (rules file, messages file, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl GmailError {
    /// Check if the error is transient and the call should be retried
    ///
    /// Only server-side failures (HTTP 5xx) and network-level failures qualify.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::ServerError { .. } | GmailError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// HTTP status carried by this error, if it came from an HTTP response
    pub fn status(&self) -> Option<u16> {
        match self {
            GmailError::ServerError { status, .. } => Some(*status),
            GmailError::BadRequest(_) => Some(400),
            GmailError::Unauthorized(_) => Some(401),
            GmailError::Forbidden(_) => Some(403),
            GmailError::NotFound(_) => Some(404),
            GmailError::Conflict(_) => Some(409),
            GmailError::RateLimited(_) => Some(429),
            GmailError::RemoteOperationFailed { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Map an HTTP status code and message to the matching error variant
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => GmailError::BadRequest(message),
            401 => GmailError::Unauthorized(message),
            403 => GmailError::Forbidden(message),
            404 => GmailError::NotFound(message),
            409 => GmailError::Conflict(message),
            429 => GmailError::RateLimited(message),
            500..=599 => GmailError::ServerError { status, message },
            _ => GmailError::ApiError(format!("HTTP {}: {}", status, message)),
        }
    }
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // HTTP response with status code (non-success responses)
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                GmailError::from_status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                )
            }
            // Any non-success response with a JSON body lands here, whatever its status
            google_gmail1::Error::BadRequest(ref body) => from_error_body(body),
            // Network/connection errors - transient
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            google_gmail1::Error::MissingToken(ref err) => {
                GmailError::AuthError(format!("Missing token: {}", err))
            }
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}

/// Map a Google JSON error body (`{"error": {"code": 500, "message": ...}}`)
fn from_error_body(body: &serde_json::Value) -> GmailError {
    let error = body.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    match error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_u64())
        .and_then(|c| u16::try_from(c).ok())
    {
        Some(status) => GmailError::from_status(status, message),
        None => GmailError::BadRequest(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_uses_embedded_status() {
        let body = serde_json::json!({
            "error": { "code": 503, "message": "Backend Error", "status": "UNAVAILABLE" }
        });
        let err = GmailError::from(google_gmail1::Error::BadRequest(body));
        assert!(matches!(err, GmailError::ServerError { status: 503, .. }));
        assert!(err.is_transient());

        let body = serde_json::json!({
            "error": { "code": 409, "message": "Label name exists or conflicts" }
        });
        let err = GmailError::from(google_gmail1::Error::BadRequest(body));
        assert!(matches!(err, GmailError::Conflict(ref m) if m.contains("exists")));

        let err = GmailError::from(google_gmail1::Error::BadRequest(serde_json::json!("oops")));
        assert!(matches!(err, GmailError::BadRequest(_)));
    }

    #[test]
    fn test_transient_errors() {
        let server_error = GmailError::ServerError {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert!(server_error.is_transient());
        assert!(!server_error.is_permanent());

        let network_error = GmailError::NetworkError("Connection reset".to_string());
        assert!(network_error.is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400u16, 401, 403, 404, 409, 429] {
            let err = GmailError::from_status(status, "nope");
            assert!(err.is_permanent(), "status {} should not be retried", status);
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn test_from_status_server_range() {
        let err = GmailError::from_status(502, "Bad Gateway");
        assert!(matches!(err, GmailError::ServerError { status: 502, .. }));

        let err = GmailError::from_status(302, "Found");
        assert!(matches!(err, GmailError::ApiError(_)));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_remote_operation_failed_keeps_source() {
        let err = GmailError::RemoteOperationFailed {
            operation: "modify_message".to_string(),
            attempts: 3,
            source: Box::new(GmailError::from_status(500, "Internal")),
        };
        assert!(err.is_permanent());
        assert_eq!(err.status(), Some(500));
        let display = err.to_string();
        assert!(display.contains("modify_message"));
        assert!(display.contains("3 attempt"));
    }

    #[test]
    fn test_error_display() {
        let err = GmailError::InvalidPattern {
            field: "subject",
            pattern: "[".to_string(),
            reason: "unclosed character class".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("Invalid subject pattern"));

        let auth_error = GmailError::AuthError("Not authenticated".to_string());
        assert!(auth_error.to_string().contains("Authentication failed"));
    }
}
