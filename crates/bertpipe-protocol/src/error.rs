use bertpipe_frame::FrameError;

/// Errors from turning bytes into messages and back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not enough bytes for a whole frame yet; keep buffering.
    #[error("incomplete frame ({needed} more bytes needed)")]
    Incomplete { needed: usize },

    /// A whole frame arrived but its payload is not a valid message.
    /// `consumed` covers exactly that frame so the caller can skip it.
    #[error("malformed payload in {consumed}-byte frame: {source}")]
    MalformedPayload {
        consumed: usize,
        source: serde_json::Error,
    },

    /// The declared length exceeds the limit; the stream cannot be resynchronised.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for CodecError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Incomplete { needed } => CodecError::Incomplete { needed },
            FrameError::PayloadTooLarge { size, max } => CodecError::PayloadTooLarge { size, max },
            FrameError::Io(io) => CodecError::Io(io),
            FrameError::ConnectionClosed => {
                CodecError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
            }
        }
    }
}

/// Errors seen by a control-channel client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] bertpipe_transport::TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server closed the pipe.
    #[error("server disconnected")]
    Disconnected,

    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, ClientError>;
