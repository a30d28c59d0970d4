/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not enough bytes for a whole frame yet; retry once more arrive.
    #[error("incomplete frame ({needed} more bytes needed)")]
    Incomplete { needed: usize },

    /// The declared payload exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for the benign "keep buffering" case.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FrameError::Incomplete { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
