use std::io::{ErrorKind, Read};

use bertpipe_transport::IpcStream;
use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frame payloads from a blocking stream.
///
/// Handles partial reads internally; callers always get whole payloads.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next payload (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at end-of-stream, including
    /// when the stream ends partway through a frame.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            let decoded =
                decode_frame(&self.buf, self.config.max_payload_size).map(|(_, consumed)| consumed);
            match decoded {
                Ok(consumed) => {
                    let mut frame = self.buf.split_to(consumed);
                    frame.advance(crate::codec::HEADER_SIZE);
                    tracing::trace!(len = frame.len(), "frame read");
                    return Ok(frame.freeze());
                }
                Err(FrameError::Incomplete { .. }) => {}
                Err(err) => return Err(err),
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameReader<IpcStream> {
    /// Create a reader for a pipe stream and apply the configured read timeout.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(crate::transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the read timeout for subsequent reads.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.config.read_timeout = timeout;
        self.inner
            .set_read_timeout(timeout)
            .map_err(crate::transport_to_frame_error)
    }
}
