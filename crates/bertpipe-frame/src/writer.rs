use std::io::{ErrorKind, Write};

use bertpipe_transport::IpcStream;
use bytes::BytesMut;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to a blocking stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
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

    /// Frame `payload` and write it out (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;
        self.write_buffered()?;
        self.flush()
    }

    /// Write bytes that are already framed.
    pub fn send_raw(&mut self, framed: &[u8]) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(framed);
        self.write_buffered()?;
        self.flush()
    }

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<IpcStream> {
    /// Create a writer for a pipe stream and apply the configured write timeout.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(crate::transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::{decode_frame, DEFAULT_MAX_PAYLOAD};
    use crate::reader::FrameReader;

    #[test]
    fn written_frames_decode_in_order() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"one").unwrap();
        writer.send(b"two").unwrap();

        let wire = writer.into_inner().into_inner();
        let (first, consumed) = decode_frame(&wire, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(first, b"one");
        let (second, _) = decode_frame(&wire[consumed..], DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(second, b"two");
    }

    #[test]
    fn payload_over_limit_is_rejected() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn send_raw_passes_bytes_through() {
        let mut framed = BytesMut::new();
        encode_frame(b"pre-framed", &mut framed).unwrap();

        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send_raw(&framed).unwrap();
        assert_eq!(writer.get_ref().get_ref().as_slice(), &framed[..]);
    }

    #[test]
    fn interrupted_write_is_retried() {
        let sink = InterruptOnce {
            interrupted: false,
            data: Vec::new(),
        };
        let mut writer = FrameWriter::new(sink);
        writer.send(b"retry").unwrap();
        assert_eq!(writer.into_inner().data.len(), 4 + 5);
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        assert!(matches!(
            writer.send(b"x").unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_stream_pair() {
        let (left, right) = IpcStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send(b"ping").unwrap();
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"ping");
    }

    struct InterruptOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
