use thiserror::Error;

/// Errors that abort an assist session.
///
/// Everything except [`AssistError::Internal`] is shown to the client as-is.
/// Internal errors are logged in full and replaced by a support id.
#[derive(Debug, Error)]
pub enum AssistError {
    #[error("{0}")]
    UserCancelled(String),

    #[error("{0}")]
    ProtocolViolation(String),

    #[error("{0}")]
    AssistantUnavailable(String),

    #[error("{0}")]
    Validation(String),

    #[error("process exited with code {code}")]
    ProcessExit { code: u32 },

    #[error("Not authorized")]
    NotAuthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = AssistError> = std::result::Result<T, E>;

impl AssistError {
    pub fn cancelled() -> Self {
        Self::UserCancelled("analysis canceled".to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Text sent to the client for this error.
    pub fn client_message(&self, support_id: &str) -> String {
        match self {
            Self::Internal(_) => format!("Internal Error: Support ID: {}", support_id),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for AssistError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.into())
    }
}
