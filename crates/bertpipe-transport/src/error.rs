use std::path::PathBuf;

/// Errors that can occur in pipe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listening endpoint.
    #[error("failed to bind pipe {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a listening endpoint.
    #[error("failed to connect to pipe {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming client.
    #[error("failed to accept client: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pipe path does not fit in `sockaddr_un`.
    #[error("pipe path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The multiplexed wait itself failed.
    #[error("multiplexed wait failed: {0}")]
    Poll(std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
