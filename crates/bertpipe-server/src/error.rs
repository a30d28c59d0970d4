use bertpipe_protocol::CodecError;
use bertpipe_transport::TransportError;

/// Errors that stop the control process.
///
/// Per-connection failures never surface here; they reset the affected
/// channel and the loop carries on.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Setting up the listener, capture pipes or wakers failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The multiplexed wait itself failed; the loop cannot continue.
    #[error("multiplexed wait failed: {0}")]
    Wait(#[source] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The embedded runtime failed to start.
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Whether this is the unrecoverable wait failure.
    pub fn is_wait_failure(&self) -> bool {
        matches!(self, ServerError::Wait(_))
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
