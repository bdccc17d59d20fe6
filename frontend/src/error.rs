use thiserror::Error;

/// Failures of the transport itself, before or instead of a server-signaled
/// outcome. During the streaming phase these trigger the single-shot
/// fallback; during the fallback they are terminal.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {status} - {message}")]
    Status { status: u16, message: String },

    /// The event stream ended before a terminal record arrived.
    #[error("Analysis stream ended before a result was delivered")]
    Truncated,

    #[error("Failed to parse response: {0}")]
    Body(String),
}

/// Terminal error delivered to the caller, exactly once per job.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// The backend explicitly reported a failed analysis. Surfaced verbatim
    /// and never retried over the fallback path.
    #[error("{0}")]
    Analysis(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_render_with_code_and_message() {
        let err = TransportError::Status {
            status: 503,
            message: "model unavailable".into(),
        };
        assert_eq!(err.to_string(), "Server error: 503 - model unavailable");
    }

    #[test]
    fn analysis_errors_surface_the_server_message_verbatim() {
        let err = UploadError::Analysis("model failed".into());
        assert_eq!(err.to_string(), "model failed");
    }

    #[test]
    fn transport_errors_pass_through_transparently() {
        let err = UploadError::from(TransportError::Network("connection refused".into()));
        assert_eq!(err.to_string(), "Network error: connection refused");
    }
}
