use openai_realtime::SignalingError;

/// Failures of a capture call.
///
/// Startup failures (`Credential`, `PermissionDenied`, `AudioCapture`,
/// `Signaling`) are returned from `start_call` after everything acquired so
/// far has been released. `Transport`, `Protocol` and `ToolArgument` happen
/// while the call runs and are only recorded or logged.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("a call is already in progress")]
    AlreadyActive,
    #[error("call start was cancelled")]
    Cancelled,
    #[error("credential request failed: {0}")]
    Credential(String),
    #[error("microphone access was denied")]
    PermissionDenied,
    #[error("audio capture failed: {0}")]
    AudioCapture(String),
    #[error("signaling failed: {0}")]
    Signaling(String),
    #[error("transport lost: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("malformed tool arguments: {0}")]
    ToolArgument(String),
}

impl CallError {
    /// Message suitable for showing to the user.
    ///
    /// Only a refused microphone gets its own actionable text; everything
    /// else collapses to a generic connection failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::PermissionDenied => {
                "Microphone access was denied. Allow microphone access for this app and try again."
            }
            CallError::AlreadyActive => "A call is already in progress.",
            CallError::Cancelled => "The call was cancelled.",
            _ => "Connection failed. Please try again.",
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CallError::PermissionDenied)
    }
}

impl From<SignalingError> for CallError {
    fn from(e: SignalingError) -> Self {
        CallError::Signaling(e.to_string())
    }
}
