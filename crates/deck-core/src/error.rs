use thiserror::Error;

/// Errors produced by the control deck gateway and its control endpoints.
#[derive(Debug, Error)]
pub enum DeckError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("message too large: {size} bytes (limit: {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded, retry after {retry_after_secs:.3}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("action not found: {0}")]
    ActionNotFound(String),

    /// Failure reported by an action handler. Displayed verbatim so the
    /// message can be surfaced to the client unchanged.
    #[error("{0}")]
    Action(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DeckError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            DeckError::Validation(_) => "VALIDATION_ERROR",
            DeckError::MessageTooLarge { .. } => "MESSAGE_TOO_LARGE",
            DeckError::Authentication(_) => "AUTHENTICATION_ERROR",
            DeckError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            DeckError::ActionNotFound(_) => "ACTION_NOT_FOUND",
            DeckError::Action(_) => "ACTION_FAILED",
            DeckError::NotFound(_) => "NOT_FOUND",
            DeckError::Transport(_) => "TRANSPORT_ERROR",
            DeckError::Config(_) => "CONFIG_ERROR",
            DeckError::Io(_) => "IO_ERROR",
            DeckError::Json(_) => "INVALID_JSON",
            DeckError::Other(_) => "UNKNOWN_ERROR",
        }
    }

    /// HTTP status used when this error is returned by a control endpoint.
    pub fn http_status(&self) -> u16 {
        match self {
            DeckError::Validation(_) | DeckError::MessageTooLarge { .. } | DeckError::Json(_) => 400,
            DeckError::Authentication(_) => 401,
            DeckError::NotFound(_) | DeckError::ActionNotFound(_) => 404,
            DeckError::RateLimited { .. } => 429,
            _ => 500,
        }
    }
}

pub type DeckResult<T> = Result<T, DeckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_error_displays_verbatim() {
        let err = DeckError::Action("volume out of range".into());
        assert_eq!(err.to_string(), "volume out of range");
        assert_eq!(err.code(), "ACTION_FAILED");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(DeckError::Validation("x".into()).http_status(), 400);
        assert_eq!(DeckError::Authentication("x".into()).http_status(), 401);
        assert_eq!(DeckError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            DeckError::RateLimited {
                retry_after_secs: 1.0
            }
            .http_status(),
            429
        );
        assert_eq!(DeckError::Other("x".into()).http_status(), 500);
    }

    #[test]
    fn message_too_large_is_a_validation_failure() {
        let err = DeckError::MessageTooLarge {
            size: 200,
            limit: 100,
        };
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.to_string(), "message too large: 200 bytes (limit: 100)");
    }
}
