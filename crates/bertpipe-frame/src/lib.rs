//! Length-prefixed framing for the bertpipe control channel.
//!
//! Every message on a pipe is a 4-byte little-endian length followed by that
//! many payload bytes. Decoding distinguishes "not enough bytes yet" from a
//! real protocol error so a non-blocking reader can keep buffering.

pub mod codec;
pub mod error;
pub mod reader;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
#[cfg(feature = "async")]
pub use tokio_codec::length_prefix_codec;
pub use writer::FrameWriter;

pub(crate) fn transport_to_frame_error(err: bertpipe_transport::TransportError) -> FrameError {
    match err {
        bertpipe_transport::TransportError::Io(io)
        | bertpipe_transport::TransportError::Accept(io) => FrameError::Io(io),
        bertpipe_transport::TransportError::Bind { source, .. }
        | bertpipe_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
