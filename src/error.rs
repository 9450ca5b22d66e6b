use std::process::ExitCode;

/// Errors that cause fleetdeck to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("server unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{message}")]
    WithCode { code: u8, message: String },

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn new(code: u8, message: String) -> Self {
        ExitError::WithCode { code, message }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::Unreachable { .. } => ExitCode::from(3),
            ExitError::Validation(_) => ExitCode::from(4),
            ExitError::Cancelled => ExitCode::from(130),
            ExitError::WithCode { code, .. } => ExitCode::from(*code),
            ExitError::Other(_) => ExitCode::from(1),
        }
    }
}

/// Failures talking to the dashboard backend.
///
/// Three user-facing kinds exist: the fetch failed (`Transport`, `Status`),
/// the input was rejected before sending (`Validation`), or the server
/// reported a business error (`Conflict`). `Aborted` marks a request whose
/// result was superseded by navigation and must be dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("decoding response: {0}")]
    Decode(String),

    #[error("aborted")]
    Aborted,
}

impl ApiError {
    /// True for superseded requests, which are never surfaced to the user.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ApiError::Aborted)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }
}

impl From<ApiError> for ExitError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Validation(msg) => ExitError::Validation(msg),
            ApiError::Aborted => ExitError::Cancelled,
            ApiError::Conflict(msg) => ExitError::new(5, msg),
            other => ExitError::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_validation_exit() {
        let exit: ExitError = ApiError::Validation("title is required".into()).into();
        assert!(matches!(exit, ExitError::Validation(_)));
        assert_eq!(exit.to_string(), "title is required");
    }

    #[test]
    fn conflict_keeps_server_message() {
        let exit: ExitError = ApiError::Conflict("task already exists in web".into()).into();
        assert_eq!(exit.to_string(), "task already exists in web");
    }

    #[test]
    fn aborted_is_distinguished() {
        assert!(ApiError::Aborted.is_aborted());
        assert!(!ApiError::Transport("refused".into()).is_aborted());
    }

    #[test]
    fn not_found_detection() {
        let err = ApiError::Status { status: 404, message: "no such task".into() };
        assert!(err.is_not_found());
        let err = ApiError::Status { status: 500, message: "boom".into() };
        assert!(!err.is_not_found());
    }
}
